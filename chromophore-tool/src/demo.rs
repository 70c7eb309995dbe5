//! A scripted walk through every kind of operation on a persisted tree.

use std::io::Write;
use std::sync::Arc;

use chromophore_core::{BackingStore, Callable, Coordinator, Entry, Error, Observed, Value};
use serde_json::json;
use tracing::info;

use crate::error::ToolError;

/// The record a fresh demo store starts from.
pub fn default_record() -> Value {
    let mut record = Value::from(json!({
        "id": 1,
        "name": "Default User",
        "isActive": true,
        "tags": ["admin", "developer"],
        "settings": {
            "theme": "dark",
            "notifications": true,
            "preferences": {
                "sound": 50,
                "language": "he",
                "features": ["featureA", "featureB"]
            }
        },
        "userList": [
            { "id": 101, "name": "Alice" },
            { "id": 102, "name": "Bob" }
        ]
    }));
    if let Some(map) = record.as_mapping_mut() {
        map.insert("complexFunction".into(), Value::from(sum()));
    }
    record
}

fn sum() -> Callable {
    Callable::from_fn("complexFunction", |_, args| {
        Ok(Entry::from(args.iter().filter_map(Value::as_f64).sum::<f64>()))
    })
}

fn node(root: &Observed, path: &str) -> Result<Option<Observed>, ToolError> {
    Ok(root.at_path(path)?.and_then(|e| e.as_node().cloned()))
}

fn show(entry: Option<Entry>) -> Result<String, ToolError> {
    Ok(match entry {
        Some(entry) => entry.to_value()?.to_json().to_string(),
        None => "(missing)".to_string(),
    })
}

fn step(out: &mut impl Write, n: u32, title: &str) -> Result<(), ToolError> {
    info!(step = n, title, "demo step");
    writeln!(out, "\n--- {n}. {title} ---")?;
    Ok(())
}

/// Runs the walkthrough against `store`, writing a transcript to `out`.
pub fn run<S>(store: Arc<S>, out: &mut impl Write) -> Result<(), ToolError>
where
    S: BackingStore + Send + Sync + 'static,
{
    let coordinator = Coordinator::open(store.clone())?;
    let root = coordinator.root();

    // Callables never reach the store, so a reloaded root needs it back.
    if !root.has("complexFunction")? {
        root.set("complexFunction", sum())?;
    }

    step(out, 1, "initial reads")?;
    writeln!(out, "name: {}", show(root.get("name")?)?)?;
    writeln!(out, "first tag: {}", show(root.at_path("tags[0]")?)?)?;
    writeln!(out, "language: {}", show(root.at_path("settings.preferences.language")?)?)?;
    writeln!(out, "first user: {}", show(root.at_path("userList[0].name")?)?)?;
    let result = root.invoke("complexFunction", &[Value::from(5), Value::from(3)])?;
    writeln!(out, "complexFunction(5, 3): {}", show(Some(result))?)?;

    step(out, 2, "top-level write")?;
    root.set("name", "New App Name")?;
    writeln!(out, "name: {}", show(root.get("name")?)?)?;

    step(out, 3, "sequence element write")?;
    if let Some(tags) = node(&root, "tags")? {
        tags.set(1usize, "tester")?;
        writeln!(out, "tags: {}", tags.to_value()?.to_json())?;
    }

    step(out, 4, "sequence push")?;
    if let Some(tags) = node(&root, "tags")? {
        tags.push("admin")?;
        writeln!(out, "tags: {}", tags.to_value()?.to_json())?;
    }

    step(out, 5, "nested write")?;
    if let Some(prefs) = node(&root, "settings.preferences")? {
        prefs.set("language", "en")?;
        writeln!(out, "language: {}", show(prefs.get("language")?)?)?;
    }

    step(out, 6, "nested sequence write")?;
    if let Some(features) = node(&root, "settings.preferences.features")? {
        features.set(0usize, "newFeatureX")?;
        writeln!(out, "features: {}", features.to_value()?.to_json())?;
    }

    step(out, 7, "push an object")?;
    if let Some(users) = node(&root, "userList")? {
        users.push(json!({"id": 103, "name": "Charlie"}))?;
        writeln!(out, "users: {}", users.to_value()?.to_json())?;
    }

    step(out, 8, "write inside a sequence element")?;
    if let Some(first) = node(&root, "userList[0]")? {
        first.set("name", "Alice Smith")?;
        writeln!(out, "first user: {}", show(first.get("name")?)?)?;
    }

    step(out, 9, "delete")?;
    root.delete("isActive")?;
    writeln!(out, "isActive present: {}", root.has("isActive")?)?;

    step(out, 10, "add a property")?;
    root.set("newGlobalProp", "Global Value")?;
    writeln!(out, "newGlobalProp: {}", show(root.get("newGlobalProp")?)?)?;

    step(out, 11, "own keys")?;
    let keys: Vec<String> = root.keys()?.iter().map(|k| k.to_name()).collect();
    writeln!(out, "keys: {}", keys.join(", "))?;

    step(out, 12, "property descriptor")?;
    if let Some(d) = root.descriptor("name")? {
        writeln!(
            out,
            "name: value={} writable={} enumerable={} configurable={}",
            show(Some(d.value))?,
            d.attributes.writable,
            d.attributes.enumerable,
            d.attributes.configurable
        )?;
    }

    step(out, 13, "replace a subtree")?;
    root.set(
        "settings",
        json!({
            "theme": "light",
            "notifications": false,
            "preferences": { "sound": 100, "language": "fr", "features": ["featureC"] }
        }),
    )?;
    writeln!(out, "language: {}", show(root.at_path("settings.preferences.language")?)?)?;

    step(out, 14, "write into the replacement")?;
    if let Some(prefs) = node(&root, "settings.preferences")? {
        prefs.set("sound", 75)?;
        writeln!(out, "sound: {}", show(prefs.get("sound")?)?)?;
    }

    step(out, 15, "invoke")?;
    let result = root.invoke("complexFunction", &[Value::from(10), Value::from(20)])?;
    writeln!(out, "complexFunction(10, 20): {}", show(Some(result))?)?;

    step(out, 16, "extensibility")?;
    writeln!(out, "extensible: {}", root.is_extensible()?)?;

    step(out, 17, "prevent extensions")?;
    root.prevent_extensions()?;
    writeln!(out, "extensible: {}", root.is_extensible()?)?;

    step(out, 18, "add after prevent extensions")?;
    match root.set("anotherNewProp", "Should fail") {
        Err(Error::Rejected(reason)) => writeln!(out, "rejected as expected: {reason}")?,
        Err(e) => return Err(e.into()),
        Ok(()) => writeln!(out, "unexpectedly accepted")?,
    }
    writeln!(out, "anotherNewProp present: {}", root.has("anotherNewProp")?)?;

    step(out, 19, "reload from the store")?;
    let saved = store.load().map_err(Error::store)?;
    writeln!(out, "name: {}", saved.get("name").map(Value::to_json).unwrap_or_default())?;
    writeln!(out, "tags: {}", saved.get("tags").map(Value::to_json).unwrap_or_default())?;
    let language = saved
        .get("settings")
        .and_then(|s| s.get("preferences"))
        .and_then(|p| p.get("language"));
    writeln!(out, "language: {}", language.map(Value::to_json).unwrap_or_default())?;
    let first_user = saved
        .get("userList")
        .and_then(|u| u.get(0usize))
        .and_then(|u| u.get("name"));
    writeln!(out, "first user: {}", first_user.map(Value::to_json).unwrap_or_default())?;
    writeln!(out, "isActive saved: {}", saved.get("isActive").is_some())?;
    writeln!(out, "newGlobalProp saved: {}", saved.get("newGlobalProp").is_some())?;

    info!(mutations = coordinator.mutations(), "demo finished");
    coordinator.close()?;
    Ok(())
}
