//! Configuration loading and types for imagestore.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Every field has a default, so an empty file (or no
//! file at all) yields a working server.

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// API token authentication settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Image storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Listing defaults and limits.
    #[serde(default)]
    pub listing: ListingConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings (metrics + health probe).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,

    /// Maximum upload request body in bytes (default 20 MiB).
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
            max_upload_size: default_max_upload_size(),
        }
    }
}

/// Authentication settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Require a valid API token on every image route.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Path to the SQLite token database.
    #[serde(default = "default_token_database")]
    pub database: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            database: default_token_database(),
        }
    }
}

/// Image storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory holding one subdirectory per user.
    #[serde(default = "default_storage_root")]
    pub root_dir: String,

    /// Serialize uploads and deletes per user.
    #[serde(default = "default_true")]
    pub serialize_writes: bool,

    /// Accepted image extensions (case-sensitive).
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: default_storage_root(),
            serialize_writes: true,
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

/// Listing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ListingConfig {
    /// Page size used when the request has no `offset`.
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    /// Larger requested page sizes are clamped to this.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
///
/// Controls Prometheus metrics collection and the health probe.
/// Both are enabled by default.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,

    /// Enable the `/health` probe.
    #[serde(default = "default_true")]
    pub health_check: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: true,
            health_check: true,
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_upload_size() -> u64 {
    20 * 1024 * 1024
}

fn default_token_database() -> String {
    "./data/tokens.db".to_string()
}

fn default_storage_root() -> String {
    "./images".to_string()
}

fn default_allowed_extensions() -> Vec<String> {
    crate::storage::validation::DEFAULT_EXTENSIONS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_page_size() -> usize {
    10
}

fn default_max_page_size() -> usize {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    parse_config(&contents)
}

/// Parse configuration from YAML text.  Empty input yields the defaults.
pub fn parse_config(contents: &str) -> anyhow::Result<Config> {
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.storage.root_dir, "./images");
        assert_eq!(config.storage.allowed_extensions, ["jpg", "jpeg", "png"]);
        assert_eq!(config.listing.default_page_size, 10);
        assert!(config.auth.enabled);
        assert!(config.observability.metrics);
    }

    #[test]
    fn test_partial_config() {
        let yaml = "
server:
  port: 8080
storage:
  root_dir: /var/lib/imagestore
  serialize_writes: false
listing:
  max_page_size: 25
logging:
  format: json
";
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.storage.root_dir, "/var/lib/imagestore");
        assert!(!config.storage.serialize_writes);
        assert_eq!(config.listing.max_page_size, 25);
        assert_eq!(config.listing.default_page_size, 10);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_example_config_parses() {
        let config = parse_config(include_str!("../imagestore.example.yaml")).unwrap();
        assert_eq!(config.server.max_upload_size, 20 * 1024 * 1024);
        assert_eq!(config.listing.max_page_size, 100);
        assert!(config.observability.health_check);
    }

    #[test]
    fn test_invalid_yaml_is_error() {
        assert!(parse_config("server: [unclosed").is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("imagestore.yaml");
        std::fs::write(&path, "auth:\n  enabled: false\n").unwrap();
        let config = load_config(&path).unwrap();
        assert!(!config.auth.enabled);
        assert_eq!(config.auth.database, "./data/tokens.db");
    }
}
