mod config;
mod demo;
mod error;
mod store;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use chromophore_core::{Coordinator, Key, Observed, Value, parse_path};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::config::{load_defaults, resolve};
use crate::error::ToolError;
use crate::store::{AnyStore, StoreType};

#[derive(Parser)]
#[command(name = "chro")]
#[command(about = "Inspect and edit a persisted Chromophore tree", long_about = None)]
struct Cli {
    /// Store type: json or rocks
    #[arg(long, global = true)]
    store_type: Option<StoreType>,

    /// Path to the store (a JSON file or a RocksDB directory)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// JSON file a new store is initialized from
    #[arg(long, global = true)]
    defaults: Option<PathBuf>,

    /// Log more (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(flatten)]
    Tree(TreeCommand),
    /// Run the scripted walkthrough against the default user record
    Demo,
}

#[derive(Subcommand)]
enum TreeCommand {
    /// Print the whole tree
    Show,
    /// Print the value at a path, e.g. `settings.preferences.language`
    Get { path: String },
    /// Write a value at a path. VALUE is JSON; anything else is taken as a string
    Set { path: String, value: String },
    /// Delete the property at a path
    Delete { path: String },
    /// List the own keys of the node at a path (the root if omitted)
    Keys { path: Option<String> },
    /// Append a value to the sequence at a path
    Push { path: String, value: String },
    /// Freeze the node at a path (the root if omitted)
    Freeze { path: Option<String> },
}

fn init_tracing(verbose: u8) {
    let fallback = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Parses a command-line value as JSON, falling back to a plain string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str::<serde_json::Value>(raw)
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(raw))
}

/// Splits a path into the node that holds the last key, and that key.
fn parent_of(root: &Observed, path: &str) -> Result<(Observed, Key), ToolError> {
    let mut keys = parse_path(path)?;
    let last = keys.pop().ok_or_else(|| ToolError::EmptyPath(path.to_string()))?;
    let parent = root
        .at(keys)?
        .ok_or_else(|| ToolError::NotFound(path.to_string()))?
        .into_node()?;
    Ok((parent, last))
}

fn node_at(root: &Observed, path: Option<&str>) -> Result<Observed, ToolError> {
    match path {
        None => Ok(root.clone()),
        Some(path) => Ok(root
            .at_path(path)?
            .ok_or_else(|| ToolError::NotFound(path.to_string()))?
            .into_node()?),
    }
}

fn print_json(out: &mut impl Write, value: &Value) -> Result<(), ToolError> {
    writeln!(out, "{}", serde_json::to_string_pretty(value)?)?;
    Ok(())
}

fn execute(command: TreeCommand, root: &Observed, out: &mut impl Write) -> Result<(), ToolError> {
    match command {
        TreeCommand::Show => print_json(out, &root.to_value()?)?,
        TreeCommand::Get { path } => {
            let entry = root
                .at_path(&path)?
                .ok_or_else(|| ToolError::NotFound(path.clone()))?;
            print_json(out, &entry.to_value()?)?;
        }
        TreeCommand::Set { path, value } => {
            let (parent, key) = parent_of(root, &path)?;
            parent.set(key, parse_value(&value))?;
        }
        TreeCommand::Delete { path } => {
            let (parent, key) = parent_of(root, &path)?;
            if !parent.delete(key)? {
                return Err(ToolError::NotFound(path));
            }
        }
        TreeCommand::Keys { path } => {
            for key in node_at(root, path.as_deref())?.keys()? {
                writeln!(out, "{key}")?;
            }
        }
        TreeCommand::Push { path, value } => {
            let index = node_at(root, Some(&path))?.push(parse_value(&value))?;
            writeln!(out, "{index}")?;
        }
        TreeCommand::Freeze { path } => node_at(root, path.as_deref())?.freeze()?,
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let resolved = resolve(cli.store_type, cli.store, cli.defaults);
    debug!(?resolved, "resolved store");

    let mut stdout = std::io::stdout().lock();

    match cli.command {
        Command::Demo => {
            let store =
                AnyStore::open(resolved.store_type, &resolved.store_path, demo::default_record())?;
            demo::run(Arc::new(store), &mut stdout)?;
        }
        Command::Tree(command) => {
            let defaults = load_defaults(resolved.defaults.as_deref())?;
            let store = AnyStore::open(resolved.store_type, &resolved.store_path, defaults)?;
            let coordinator = Coordinator::open(store)?;

            execute(command, &coordinator.root(), &mut stdout)?;

            coordinator.close()?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chromophore_core::MemoryStore;
    use serde_json::json;

    fn tree() -> (Coordinator, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new(demo::default_record()));
        (Coordinator::open(store.clone()).unwrap(), store)
    }

    fn run(root: &Observed, command: TreeCommand) -> String {
        let mut out = Vec::new();
        execute(command, root, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn parse_value_falls_back_to_string() {
        assert_eq!(parse_value("42"), Value::from(42));
        assert_eq!(parse_value("\"quoted\""), Value::from("quoted"));
        assert_eq!(parse_value("plain words"), Value::from("plain words"));
        assert_eq!(parse_value("[1]").to_json(), json!([1]));
    }

    #[test]
    fn get_prints_json() {
        let (coordinator, _) = tree();
        let text = run(&coordinator.root(), TreeCommand::Get { path: "tags".into() });
        assert_eq!(serde_json::from_str::<serde_json::Value>(&text).unwrap(), json!(["admin", "developer"]));
    }

    #[test]
    fn set_nested_value() {
        let (coordinator, store) = tree();
        run(
            &coordinator.root(),
            TreeCommand::Set {
                path: "settings.preferences.language".into(),
                value: "en".into(),
            },
        );
        assert_eq!(store.save_count(), 1);
        assert_eq!(
            store.snapshot().unwrap().to_json()["settings"]["preferences"]["language"],
            json!("en")
        );
    }

    #[test]
    fn delete_sequence_element() {
        let (coordinator, store) = tree();
        run(&coordinator.root(), TreeCommand::Delete { path: "tags[1]".into() });
        assert_eq!(store.snapshot().unwrap().to_json()["tags"], json!(["admin", null]));

        let mut out = Vec::new();
        let err = execute(TreeCommand::Delete { path: "missing".into() }, &coordinator.root(), &mut out)
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
        assert_eq!(store.save_count(), 1);
    }

    #[test]
    fn keys_and_push() {
        let (coordinator, _) = tree();
        let root = coordinator.root();
        let text = run(&root, TreeCommand::Keys { path: Some("userList[0]".into()) });
        assert_eq!(text, "id\nname\n");

        let text = run(
            &root,
            TreeCommand::Push {
                path: "userList".into(),
                value: r#"{"id": 103, "name": "Charlie"}"#.into(),
            },
        );
        assert_eq!(text, "2\n");
    }

    #[test]
    fn freeze_rejects_later_writes() {
        let (coordinator, store) = tree();
        let root = coordinator.root();
        run(&root, TreeCommand::Freeze { path: Some("settings".into()) });

        let mut out = Vec::new();
        let err = execute(
            TreeCommand::Set { path: "settings.theme".into(), value: "light".into() },
            &root,
            &mut out,
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::Tree(chromophore_core::Error::Rejected(_))));
        assert_eq!(store.save_count(), 1);
    }

    #[test]
    fn huge_index_is_refused() {
        let (coordinator, store) = tree();
        let root = coordinator.root();
        for path in ["tags[100000000000]", "tags[18446744073709551615]"] {
            let mut out = Vec::new();
            let err = execute(TreeCommand::Set { path: path.into(), value: "x".into() }, &root, &mut out)
                .unwrap_err();
            assert!(matches!(err, ToolError::Tree(chromophore_core::Error::Rejected(_))));
        }
        assert_eq!(store.save_count(), 0);
        assert_eq!(store.snapshot().unwrap().to_json()["tags"], json!(["admin", "developer"]));
    }

    #[test]
    fn empty_path_is_refused() {
        let (coordinator, _) = tree();
        let mut out = Vec::new();
        let err = execute(TreeCommand::Set { path: "".into(), value: "1".into() }, &coordinator.root(), &mut out)
            .unwrap_err();
        assert!(matches!(err, ToolError::EmptyPath(_)));
    }

    #[test]
    fn show_omits_callables() {
        let (coordinator, _) = tree();
        let text = run(&coordinator.root(), TreeCommand::Show);
        let shown: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert!(shown.get("complexFunction").is_none());
        assert_eq!(shown["name"], json!("Default User"));
    }
}
