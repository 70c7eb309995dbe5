use std::path::{Path, PathBuf};

use chromophore_core::Value;
use serde::Deserialize;

use crate::error::ToolError;
use crate::store::{StoreType, default_store_path};

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    /// JSON file holding the value a new store starts from.
    pub defaults: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub r#type: StoreType,
    pub path: Option<PathBuf>,
}

fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("chromophore").join("config.toml"))
}

pub fn load_config() -> Config {
    let Some(path) = config_path() else {
        return Config::default();
    };

    let Ok(content) = std::fs::read_to_string(path) else {
        return Config::default();
    };

    parse_config(&content)
}

fn parse_config(content: &str) -> Config {
    toml::from_str(content).unwrap_or_default()
}

/// Where the tool keeps its data and what a fresh store starts from.
#[derive(Debug)]
pub struct Resolved {
    pub store_type: StoreType,
    pub store_path: PathBuf,
    pub defaults: Option<PathBuf>,
}

/// Command-line flags override the config file.
pub fn resolve(
    cli_type: Option<StoreType>,
    cli_path: Option<PathBuf>,
    cli_defaults: Option<PathBuf>,
) -> Resolved {
    resolve_with(load_config(), cli_type, cli_path, cli_defaults)
}

fn resolve_with(
    config: Config,
    cli_type: Option<StoreType>,
    cli_path: Option<PathBuf>,
    cli_defaults: Option<PathBuf>,
) -> Resolved {
    let store_type = cli_type.unwrap_or(config.store.r#type);
    let store_path = cli_path
        .or(config.store.path)
        .unwrap_or_else(|| default_store_path(store_type));

    Resolved {
        store_type,
        store_path,
        defaults: cli_defaults.or(config.defaults),
    }
}

/// Reads the default root from a JSON file, or starts from an empty mapping.
pub fn load_defaults(path: Option<&Path>) -> Result<Value, ToolError> {
    let Some(path) = path else {
        return Ok(Value::mapping());
    };
    let content = std::fs::read_to_string(path)?;
    let value = Value::from(serde_json::from_str::<serde_json::Value>(&content)?);
    if !value.is_composite() {
        return Err(ToolError::InvalidDefaults(path.display().to_string()));
    }
    Ok(value)
}
