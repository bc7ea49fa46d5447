//! # Configuration Management
//!
//! Configuration for the package index server. A single [`Config`] is built once at
//! startup and shared by reference; nothing reads settings from global state.
//!
//! ## Configuration Structure
//!
//! - [`ServerConfig`]: Bind address
//! - [`StorageConfig`]: Storage root, overwrite policy, digest caching
//! - [`IndexConfig`]: Link hash algorithm, download cache headers, welcome message
//! - [`FallbackConfig`]: Redirect unknown projects to another index
//! - [`LimitsConfig`]: Upload size limits
//! - [`LoggingConfig`]: Log level, format and optional log file
//!
//! ## Loading Configuration
//!
//! Sources are layered: embedded defaults, then an optional JSON file, then
//! `PYPI_SERVER_*` environment variables, then command-line flags.
//!
//! ```rust,no_run
//! # use pypi_server::config::Config;
//! let mut config = Config::load_or_default("pypi-server.json")?;
//! config.apply_env_overrides()?;
//! # Ok::<(), pypi_server::AppError>(())
//! ```

use crate::error::{AppError, AppResult};
use crate::hash_utils::HashAlgo;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_DATA_DIR: &str = "PYPI_SERVER_DATA_DIR";
pub const ENV_ENABLE_CACHE: &str = "PYPI_SERVER_ENABLE_CACHE";
pub const ENV_OVERWRITE: &str = "PYPI_SERVER_OVERWRITE";
pub const ENV_CACHE_CONTROL: &str = "PYPI_SERVER_CACHE_CONTROL";
pub const ENV_HASH_ALGO: &str = "PYPI_SERVER_HASH_ALGO";

/// Main configuration structure for the package index server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host/IP address to bind to (e.g., "0.0.0.0" or "localhost")
    pub host: String,
    pub port: u16,
}

/// Storage configuration for package files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory holding the distribution files
    pub data_dir: PathBuf,
    /// Allow uploads to replace an existing file of the same name
    #[serde(default)]
    pub overwrite: bool,
    /// Cache file digests between listings
    #[serde(default = "default_true")]
    pub enable_cache: bool,
}

/// Settings that shape index pages and downloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Algorithm for the `#algo=digest` fragment on download links
    #[serde(default)]
    pub hash_algo: HashAlgo,
    /// `Cache-Control: public, max-age=N` on downloads; `None` or 0 disables the header
    pub cache_control: Option<u64>,
    pub welcome_message: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            hash_algo: HashAlgo::default(),
            cache_control: Some(86400),
            welcome_message: "Welcome to pypi-server!".to_string(),
        }
    }
}

/// Fallback index for projects that aren't stored locally.
///
/// When enabled, an unknown project is answered with a redirect to the fallback
/// index instead of a 404. Nothing is ever fetched from the fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    pub enabled: bool,
    pub url: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        FallbackConfig {
            enabled: false,
            url: "https://pypi.org/simple/".to_string(),
        }
    }
}

/// Upload and request limits configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub max_upload_size_mb: usize,
    pub max_request_body_size_mb: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            max_upload_size_mb: 100,
            max_request_body_size_mb: 150,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence when set
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Also write logs to this file, rotated daily
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            format: LogFormat::Human,
            file: None,
        }
    }
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or doesn't match the configuration format.
    pub fn load<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)?;
        serde_json::from_str(&config_str)
            .map_err(|e| AppError::Config(format!("{}: {e}", path.display())))
    }

    /// Load configuration from file with fallback to defaults.
    ///
    /// A missing file yields the defaults; a file that exists but can't be parsed is
    /// an error.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply `PYPI_SERVER_*` environment variables on top of the current values.
    pub fn apply_env_overrides(&mut self) -> AppResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> AppResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(value) = lookup(ENV_ENABLE_CACHE) {
            self.storage.enable_cache = parse_bool(ENV_ENABLE_CACHE, &value)?;
        }
        if let Some(value) = lookup(ENV_OVERWRITE) {
            self.storage.overwrite = parse_bool(ENV_OVERWRITE, &value)?;
        }
        if let Some(value) = lookup(ENV_CACHE_CONTROL) {
            let seconds = value.trim().parse::<u64>().map_err(|_| {
                AppError::Config(format!("{ENV_CACHE_CONTROL}: expected seconds, got '{value}'"))
            })?;
            self.index.cache_control = Some(seconds);
        }
        if let Some(value) = lookup(ENV_HASH_ALGO) {
            self.index.hash_algo = value
                .parse()
                .map_err(|e| AppError::Config(format!("{ENV_HASH_ALGO}: {e}")))?;
        }
        Ok(())
    }

    /// `max-age` for download responses, if the header is enabled.
    pub fn cache_control_max_age(&self) -> Option<u64> {
        self.index.cache_control.filter(|&seconds| seconds > 0)
    }

    /// Get the maximum upload size in bytes.
    pub fn max_upload_size_bytes(&self) -> u64 {
        self.limits.max_upload_size_mb as u64 * 1024 * 1024
    }

    /// Get the maximum request body size in bytes.
    pub fn max_request_body_size_bytes(&self) -> usize {
        self.limits.max_request_body_size_mb * 1024 * 1024
    }
}

fn parse_bool(key: &str, value: &str) -> AppResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AppError::Config(format!(
            "{key}: expected a boolean, got '{value}'"
        ))),
    }
}

impl Default for Config {
    fn default() -> Self {
        serde_json::from_str(include_str!("../config.json"))
            .expect("Failed to parse embedded config.json")
    }
}
