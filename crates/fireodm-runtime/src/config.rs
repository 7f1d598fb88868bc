use anyhow::{Context, Result};
use confyg::{env, Confygery};
use fireodm_core::codec::OnCodecError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::odm::Settings;
use crate::relation::{OnMissing, PopulateOptions};

/// Configuration for fireodm.
///
/// Configuration is loaded from multiple sources with the following priority:
/// 1. CLI arguments (highest priority)
/// 2. Environment variables (FIREODM_* prefix)
/// 3. Config file (~/.config/fireodm/config.toml)
/// 4. Built-in defaults (lowest priority)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the SQLite database.
    ///
    /// Can be set via:
    /// - CLI: --db /path/to/db
    /// - ENV: FIREODM_DATABASE_PATH
    /// - Config: database_path = "/path/to/db"
    /// - Default: ~/.local/share/fireodm/fireodm.db
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,

    /// TOML file declaring the models.
    ///
    /// Can be set via:
    /// - CLI: --schema /path/to/models.toml
    /// - ENV: FIREODM_SCHEMA_PATH
    /// - Default: ~/.config/fireodm/models.toml
    #[serde(default = "default_schema_path")]
    pub schema_path: PathBuf,

    /// Timeout applied to every storage call, in milliseconds.
    #[serde(default = "default_storage_timeout_ms")]
    pub storage_timeout_ms: u64,

    /// Default expansion depth for relation population.
    #[serde(default = "default_populate_max_depth")]
    pub populate_max_depth: usize,

    /// Default policy for references whose target is missing.
    #[serde(default)]
    pub populate_on_missing: OnMissing,

    /// What to do with stored values that no longer match their field.
    #[serde(default)]
    pub on_codec_error: OnCodecError,

    /// Default log filter; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_db_path(),
            schema_path: default_schema_path(),
            storage_timeout_ms: default_storage_timeout_ms(),
            populate_max_depth: default_populate_max_depth(),
            populate_on_missing: OnMissing::default(),
            on_codec_error: OnCodecError::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Searches for config file at: ~/.config/fireodm/config.toml
    /// Reads environment variables with FIREODM_ prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_path = config_file_path();

        let mut builder = Confygery::new().context("Failed to create config builder")?;

        if config_path.exists() {
            let path_str = config_path
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("Config path contains invalid UTF-8"))?;
            builder
                .add_file(path_str)
                .context("Failed to load config file")?;
        }

        let env_opts = env::Options::with_top_level("fireodm");
        builder
            .add_env(env_opts)
            .context("Failed to load environment variables")?;

        let config: Self = builder
            .build()
            .context("Failed to build configuration")?;

        Ok(config)
    }

    /// Load configuration, overriding paths given on the command line.
    pub fn load_with_overrides(
        db_path: Option<PathBuf>,
        schema_path: Option<PathBuf>,
    ) -> Result<Self> {
        let mut config = Self::load()?;
        if let Some(db_path) = db_path {
            config.database_path = db_path;
        }
        if let Some(schema_path) = schema_path {
            config.schema_path = schema_path;
        }
        Ok(config)
    }

    /// Runtime settings derived from this configuration.
    pub fn settings(&self) -> Settings {
        Settings {
            storage_timeout: Duration::from_millis(self.storage_timeout_ms),
            populate: PopulateOptions::new(self.populate_max_depth, self.populate_on_missing),
            on_codec_error: self.on_codec_error,
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fireodm")
        .join("fireodm.db")
}

fn default_schema_path() -> PathBuf {
    config_dir().join("models.toml")
}

const fn default_storage_timeout_ms() -> u64 {
    5000
}

const fn default_populate_max_depth() -> usize {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fireodm")
}

/// Get the config file path.
///
/// Returns:
/// - Linux: ~/.config/fireodm/config.toml
/// - macOS: ~/Library/Application Support/fireodm/config.toml
/// - Windows: %APPDATA%\fireodm\config.toml
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Get the example config file content.
pub fn example_config() -> &'static str {
    r#"# fireodm Configuration File
#
# Configuration is loaded from multiple sources with the following priority:
# 1. CLI arguments (highest priority)
# 2. Environment variables (FIREODM_* prefix)
# 3. This config file
# 4. Built-in defaults (lowest priority)

# Path to the SQLite database holding document bodies
#
# Can also be set via:
# - CLI: fireodm --db /custom/path.db list User
# - Environment: FIREODM_DATABASE_PATH=/custom/path.db
#
# Default: Platform-specific data directory
#database_path = "/path/to/custom/fireodm.db"

# Schema file declaring the models ([[models]] tables)
#
# Can also be set via:
# - CLI: fireodm --schema ./models.toml schema show
# - Environment: FIREODM_SCHEMA_PATH=./models.toml
#schema_path = "/path/to/models.toml"

# Timeout for every storage call, in milliseconds.
# A write whose storage call times out is rejected.
storage_timeout_ms = 5000

# Relation population defaults
# populate_on_missing: "skip" leaves missing targets out, "fail" raises an error
populate_max_depth = 3
populate_on_missing = "skip"

# Stored values that no longer decode: "abort", "skip_field" or "use_default"
on_codec_error = "abort"

# Default log filter (overridden by RUST_LOG)
log_level = "info"
"#
}

/// Create default config file if it doesn't exist.
///
/// Returns true if a new file was created, false if it already existed.
pub fn ensure_config_file() -> Result<bool> {
    let config_path = config_file_path();

    if config_path.exists() {
        return Ok(false);
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create config directory")?;
    }

    std::fs::write(&config_path, example_config()).context("Failed to write config file")?;

    Ok(true)
}
