//! Configuration loading and storage path resolution

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// TOML configuration for the harvesting core
///
/// Every field has a usable default so a missing config file is not an
/// error; a consortium deployment normally sets at least `consortium_id`,
/// `save_raw_responses` and `raw_response_key`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Identifier used as the top-level directory of the raw-response store
    pub consortium_id: String,
    /// SQLite database path; falls back to the platform data directory
    pub database_path: Option<PathBuf>,
    /// Root directory for persisted raw responses
    pub storage_root: Option<PathBuf>,
    /// Keep compressed+encrypted copies of vendor responses for audit
    pub save_raw_responses: bool,
    /// 32-byte hex key for raw-response encryption at rest
    pub raw_response_key: Option<String>,
    /// Total request timeout applied to the SUSHI client, seconds
    pub request_timeout_secs: u64,
    /// Connection timeout applied to the SUSHI client, seconds
    pub connect_timeout_secs: u64,
    /// Budget consulted before decoding very large response bodies
    pub decode_memory_budget_bytes: u64,
    /// Truncation limit for short dimension names
    pub short_field_max: usize,
    /// Truncation limit for title and identifier fields
    pub long_field_max: usize,
    /// Optional TOML file overriding the built-in SUSHI error-code table
    pub error_codes_file: Option<PathBuf>,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            consortium_id: "consortium".to_string(),
            database_path: None,
            storage_root: None,
            save_raw_responses: false,
            raw_response_key: None,
            request_timeout_secs: 30,
            connect_timeout_secs: 5,
            decode_memory_budget_bytes: 1 << 30,
            short_field_max: 191,
            long_field_max: 512,
            error_codes_file: None,
        }
    }
}

/// Load configuration following the priority order:
/// 1. Command-line argument (highest priority)
/// 2. `CUSH_CONFIG` environment variable
/// 3. Platform config directory (`<config_dir>/cush/config.toml`)
/// 4. Compiled defaults (fallback)
pub fn load_config(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    if let Some(path) = cli_arg {
        return read_config_file(path);
    }

    if let Ok(path) = std::env::var("CUSH_CONFIG") {
        return read_config_file(Path::new(&path));
    }

    if let Some(dir) = dirs::config_dir() {
        let path = dir.join("cush").join("config.toml");
        if path.exists() {
            return read_config_file(&path);
        }
    }

    Ok(TomlConfig::default())
}

fn read_config_file(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("cannot parse {}: {}", path.display(), e)))
}

/// Fixed, descriptive user-agent for all outbound SUSHI requests
///
/// Several vendor platforms answer HTTP 403 to generic client agents, so
/// every request identifies the harvester and a contact URL.
pub fn get_user_agent() -> String {
    format!(
        "CUSH/{} (COUNTER usage harvester; +https://github.com/cush/cush)",
        env!("CARGO_PKG_VERSION")
    )
}

/// Default database location under the platform data directory
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("cush"))
        .unwrap_or_else(|| PathBuf::from("./cush_data"))
        .join("cush.db")
}

/// Default raw-response storage root under the platform data directory
pub fn default_storage_root() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("cush"))
        .unwrap_or_else(|| PathBuf::from("./cush_data"))
        .join("raw")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TomlConfig::default();
        assert_eq!(config.consortium_id, "consortium");
        assert!(!config.save_raw_responses);
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.short_field_max, 191);
        assert!(config.long_field_max > config.short_field_max);
    }

    #[test]
    fn test_user_agent_is_descriptive() {
        let ua = get_user_agent();
        assert!(ua.starts_with("CUSH/"));
        assert!(ua.contains("github.com"));
    }

    #[test]
    fn test_partial_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "consortium_id = \"nc\"\nsave_raw_responses = true\n",
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.consortium_id, "nc");
        assert!(config.save_raw_responses);
        // untouched fields keep their defaults
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_missing_cli_file_is_an_error() {
        let result = load_config(Some(Path::new("/nonexistent/cush.toml")));
        assert!(result.is_err());
    }
}
