//! Configuration Management
//!
//! This module handles loading and saving sqlsentry configuration.
//!
//! # Configuration Locations
//! - Local: `.sqlsentry/config.json` (per-project)
//! - Global: `~/.config/sqlsentry/config.json` (per-user)
//!
//! # Resolution Precedence
//! 1. Explicit `--config` path (used alone)
//! 2. Local config file
//! 3. Global config file
//! 4. Built-in defaults
//!
//! Local and global files are merged key by key, local winning. A local file
//! that only sets `ai.model_id` keeps every other global setting.
//!
//! # Secrets
//! `ai.api_key_env` names an environment variable holding the API key, so
//! the key itself never has to live in a config file.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SentryError};
use crate::guard::SqlDialect;

const CONFIG_DIR_NAME: &str = "sqlsentry";
const LOCAL_DIR_NAME: &str = ".sqlsentry";
const CONFIG_FILE_NAME: &str = "config.json";

/// Database settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// `SQLite` database file
    pub file: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self { file: PathBuf::from("sqlsentry.db") }
    }
}

/// Text-generation backend settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiSettings {
    /// Model identifier sent with each completion request
    pub model_id: String,

    /// Base URL of an OpenAI-compatible API (`.../v1`)
    pub endpoint: String,

    /// API key stored inline
    /// WARNING: Sensitive data, do not log or include in error messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable holding the API key (takes precedence over `api_key`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            model_id: String::new(),
            endpoint: "http://localhost:11434/v1".to_string(),
            api_key: None,
            api_key_env: None,
        }
    }
}

impl AiSettings {
    /// Resolve the API key, reading `api_key_env` if set
    pub fn resolve_api_key(&self) -> Result<Option<String>> {
        match &self.api_key_env {
            Some(var) => std::env::var(var).map(Some).map_err(|_| {
                SentryError::config_error(format!("Environment variable {var} not found for API key"))
            }),
            None => Ok(self.api_key.clone()),
        }
    }
}

/// Query guard settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardSettings {
    pub dialect: SqlDialect,
}

/// Schema cache settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub ttl_seconds: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { ttl_seconds: 3600 }
    }
}

impl CacheSettings {
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// Time and size limits applied per request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitSettings {
    pub generation_timeout_ms: u64,

    pub execution_timeout_ms: u64,

    /// Maximum rows materialized per query; None means no limit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_rows: Option<usize>,

    /// `SQLite` busy timeout; None leaves the driver default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub busy_timeout_ms: Option<u64>,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            generation_timeout_ms: 60_000,
            execution_timeout_ms: 30_000,
            max_rows: None,
            busy_timeout_ms: None,
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseSettings,
    pub ai: AiSettings,
    pub guard: GuardSettings,
    pub cache: CacheSettings,
    pub limits: LimitSettings,
}

/// Configuration file location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLocation {
    /// Local config: `.sqlsentry/config.json`
    Local,
    /// Global config: `~/.config/sqlsentry/config.json`
    Global,
}

/// Get path to local config file
pub fn local_config_path() -> Result<PathBuf> {
    let current_dir = std::env::current_dir().map_err(|e| {
        SentryError::config_error(format!("Could not determine current directory: {e}"))
    })?;

    Ok(current_dir.join(LOCAL_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Get path to global config file
pub fn global_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| SentryError::config_error("Could not determine user config directory"))?;

    Ok(config_dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Path for a location
pub fn config_path(location: ConfigLocation) -> Result<PathBuf> {
    match location {
        ConfigLocation::Local => local_config_path(),
        ConfigLocation::Global => global_config_path(),
    }
}

/// Read a config file as raw JSON; a missing file is an empty object
fn read_raw(path: &Path) -> Result<Value> {
    if !path.exists() {
        return Ok(Value::Object(serde_json::Map::new()));
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        SentryError::config_error(format!("Could not read config file {}: {e}", path.display()))
    })?;

    let value: Value = serde_json::from_str(&contents).map_err(|e| {
        SentryError::config_error(format!("Invalid config file {}: {e}", path.display()))
    })?;

    if value.is_object() {
        Ok(value)
    } else {
        Err(SentryError::config_error(format!(
            "Invalid config file {}: top level must be an object",
            path.display()
        )))
    }
}

/// Recursively overlay `overlay` onto `base`; objects merge, everything else replaces
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn from_raw(raw: Value) -> Result<AppConfig> {
    serde_json::from_value(raw)
        .map_err(|e| SentryError::config_error(format!("Invalid configuration: {e}")))
}

/// Load a single config file (missing file yields defaults)
pub fn load_config(path: &Path) -> Result<AppConfig> {
    from_raw(read_raw(path)?)
}

/// Load global then local config, merged with local taking precedence
pub fn load_with_precedence() -> Result<AppConfig> {
    load_layered(&global_config_path()?, &local_config_path()?)
}

/// Merge two config files key by key, `local` winning
pub fn load_layered(global: &Path, local: &Path) -> Result<AppConfig> {
    let mut merged = read_raw(global)?;
    merge_json(&mut merged, read_raw(local)?);
    from_raw(merged)
}

/// Resolve configuration for a run
///
/// An explicit path is used on its own and must exist.
pub fn resolve_config(explicit: Option<&Path>) -> Result<AppConfig> {
    match explicit {
        Some(path) if !path.exists() => Err(SentryError::config_error(format!(
            "Config file {} does not exist",
            path.display()
        ))),
        Some(path) => load_config(path),
        None => load_with_precedence(),
    }
}

/// Save configuration to a file, creating parent directories
pub fn save_config_to(path: &Path, config: &AppConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            SentryError::config_error(format!("Could not create config directory: {e}"))
        })?;
    }

    let contents = serde_json::to_string_pretty(config)
        .map_err(|e| SentryError::config_error(format!("Could not serialize config: {e}")))?;

    fs::write(path, contents)
        .map_err(|e| SentryError::config_error(format!("Could not write config file: {e}")))?;

    Ok(())
}

/// Save configuration to a standard location and return the path written
pub fn save_config(config: &AppConfig, location: ConfigLocation) -> Result<PathBuf> {
    let path = config_path(location)?;
    save_config_to(&path, config)?;
    Ok(path)
}
