//! Server configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use larder_core::{RetryPolicy, SyncOptions};

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server settings.
    pub server: ServerConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Remote backend settings.
    pub remote: RemoteConfig,
    /// Sync engine tuning.
    pub sync: SyncConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return every problem found.
    ///
    /// # Example
    ///
    /// ```
    /// use larder_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.remote.validate());
        errors.extend(self.sync.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError::new("server.bind", "bind address cannot be empty"));
            return errors;
        }

        match self.bind.rsplit_once(':') {
            None => errors.push(ValidationError::new(
                "server.bind",
                format!("invalid bind address '{}': expected format 'host:port'", self.bind),
            )),
            Some((_, port)) => match port.parse::<u16>() {
                Ok(0) => errors.push(ValidationError::new("server.bind", "port cannot be 0")),
                Err(_) => errors.push(ValidationError::new(
                    "server.bind",
                    format!("invalid port '{}': must be a number 1-65535", port),
                )),
                Ok(_) => {}
            },
        }

        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Queue database file path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: larder_store::default_db_path(),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError::new("storage.path", "database path cannot be empty"));
        }
        errors
    }
}

/// Remote backend configuration.
///
/// Without a `base_url` the service runs local-only: operations are queued
/// and stay pending until a backend is configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Backend base URL.
    pub base_url: Option<String>,
    /// API key sent with every request.
    pub api_key: Option<String>,
    /// Per-request HTTP timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            request_timeout_secs: 30,
        }
    }
}

impl RemoteConfig {
    /// Validate remote configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Some(url) = &self.base_url
            && !url.starts_with("http://")
            && !url.starts_with("https://")
        {
            errors.push(ValidationError::new(
                "remote.base_url",
                format!("'{}' must start with http:// or https://", url),
            ));
        }

        if let Some(key) = &self.api_key
            && key.is_empty()
        {
            errors.push(ValidationError::new(
                "remote.api_key",
                "api key cannot be empty string (omit it instead)",
            ));
        }

        if self.request_timeout_secs == 0 {
            errors.push(ValidationError::new(
                "remote.request_timeout_secs",
                "request timeout must be at least 1 second",
            ));
        }

        errors
    }

    /// Request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Sync engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Upper bound on a single remote call, in seconds.
    pub call_timeout_secs: u64,
    /// Attempts before an operation is dead-lettered.
    pub max_attempts: u32,
    /// Backoff after the first failure, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Backoff ceiling, in seconds.
    pub max_backoff_secs: u64,
    pub backoff_multiplier: f64,
    /// Interval between background drain attempts, in seconds.
    pub retry_interval_secs: u64,
    /// Age under which a cached snapshot counts as fresh, in seconds.
    pub freshness_window_secs: u64,
    /// Age after which cached snapshots and synced operations are purged, in seconds.
    pub cache_retention_secs: u64,
    /// Assume connectivity at startup.
    pub start_online: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 30,
            max_attempts: 8,
            initial_backoff_ms: 1000,
            max_backoff_secs: 300,
            backoff_multiplier: 2.0,
            retry_interval_secs: 30,
            freshness_window_secs: 300,
            cache_retention_secs: 7 * 24 * 60 * 60,
            start_online: true,
        }
    }
}

impl SyncConfig {
    /// Validate sync configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.call_timeout_secs == 0 {
            errors.push(ValidationError::new(
                "sync.call_timeout_secs",
                "call timeout must be at least 1 second",
            ));
        }
        if self.max_attempts == 0 {
            errors.push(ValidationError::new(
                "sync.max_attempts",
                "max attempts must be at least 1",
            ));
        }
        if self.initial_backoff_ms > self.max_backoff_secs.saturating_mul(1000) {
            errors.push(ValidationError::new(
                "sync.initial_backoff_ms",
                format!(
                    "initial backoff {}ms exceeds max backoff {}s",
                    self.initial_backoff_ms, self.max_backoff_secs
                ),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            errors.push(ValidationError::new(
                "sync.backoff_multiplier",
                format!("multiplier {} must be at least 1.0", self.backoff_multiplier),
            ));
        }
        if self.retry_interval_secs == 0 {
            errors.push(ValidationError::new(
                "sync.retry_interval_secs",
                "retry interval must be at least 1 second",
            ));
        }
        if self.freshness_window_secs > self.cache_retention_secs {
            errors.push(ValidationError::new(
                "sync.freshness_window_secs",
                format!(
                    "freshness window {}s exceeds cache retention {}s",
                    self.freshness_window_secs, self.cache_retention_secs
                ),
            ));
        }

        errors
    }

    /// Build engine options from this section.
    pub fn to_sync_options(&self) -> SyncOptions {
        let retry = RetryPolicy::new(self.max_attempts)
            .initial_delay(Duration::from_millis(self.initial_backoff_ms))
            .max_delay(Duration::from_secs(self.max_backoff_secs))
            .backoff_multiplier(self.backoff_multiplier);

        SyncOptions::default()
            .call_timeout(Duration::from_secs(self.call_timeout_secs))
            .retry(retry)
            .retry_interval(Duration::from_secs(self.retry_interval_secs))
            .freshness_window(Duration::from_secs(self.freshness_window_secs))
            .cache_retention(Duration::from_secs(self.cache_retention_secs))
            .start_online(self.start_online)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `sync.max_attempts`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("larder")
        .join("server.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert_eq!(config.storage.path, larder_store::default_db_path());
        assert!(config.remote.base_url.is_none());
        assert_eq!(config.sync.max_attempts, 8);
        assert_eq!(config.sync.cache_retention_secs, 604_800);
        assert!(config.sync.start_online);
    }

    #[test]
    fn test_default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_full_toml() {
        let toml = r#"
            [server]
            bind = "0.0.0.0:9090"

            [storage]
            path = "/data/larder/queue.db"

            [remote]
            base_url = "https://db.example.com"
            api_key = "service-key"
            request_timeout_secs = 10

            [sync]
            max_attempts = 3
            initial_backoff_ms = 500
            start_online = false
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:9090");
        assert_eq!(config.storage.path, PathBuf::from("/data/larder/queue.db"));
        assert_eq!(config.remote.base_url.as_deref(), Some("https://db.example.com"));
        assert_eq!(config.remote.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.sync.max_attempts, 3);
        // Unset keys keep their defaults.
        assert_eq!(config.sync.retry_interval_secs, 30);
        assert!(!config.sync.start_online);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("server.toml");

        let mut config = Config::default();
        config.server.bind = "127.0.0.1:9999".to_string();
        config.remote.base_url = Some("http://localhost:3000".to_string());
        config.sync.max_attempts = 4;

        config.save(&config_path).unwrap();
        let loaded = Config::load_validated(&config_path).unwrap();

        assert_eq!(loaded.server.bind, "127.0.0.1:9999");
        assert_eq!(loaded.remote.base_url.as_deref(), Some("http://localhost:3000"));
        assert_eq!(loaded.sync.max_attempts, 4);
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/server.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("invalid.toml");
        std::fs::write(&config_path, "this is not valid { toml").unwrap();

        let result = Config::load(&config_path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_default_config_path() {
        assert!(default_config_path().ends_with("larder/server.toml"));
    }

    #[test]
    fn test_server_bind_validation() {
        let ok = |bind: &str| {
            ServerConfig {
                bind: bind.to_string(),
            }
            .validate()
        };

        assert!(ok("127.0.0.1:8080").is_empty());
        assert!(ok("[::1]:8080").is_empty());
        assert!(ok("localhost:8080").is_empty());
        assert!(ok("")[0].message.contains("cannot be empty"));
        assert!(ok("127.0.0.1")[0].message.contains("host:port"));
        assert!(ok("127.0.0.1:0")[0].message.contains("cannot be 0"));
        assert!(ok("127.0.0.1:abc")[0].message.contains("must be a number"));
    }

    #[test]
    fn test_remote_validation() {
        let mut remote = RemoteConfig {
            base_url: Some("db.example.com".to_string()),
            api_key: Some(String::new()),
            request_timeout_secs: 0,
        };
        let errors = remote.validate();
        assert_eq!(errors.len(), 3);

        remote.base_url = Some("https://db.example.com".to_string());
        remote.api_key = None;
        remote.request_timeout_secs = 5;
        assert!(remote.validate().is_empty());
    }

    #[test]
    fn test_sync_validation_collects_all_errors() {
        let sync = SyncConfig {
            call_timeout_secs: 0,
            max_attempts: 0,
            backoff_multiplier: 0.5,
            freshness_window_secs: 10,
            cache_retention_secs: 5,
            ..SyncConfig::default()
        };
        let fields: Vec<_> = sync.validate().into_iter().map(|e| e.field).collect();
        assert!(fields.contains(&"sync.call_timeout_secs".to_string()));
        assert!(fields.contains(&"sync.max_attempts".to_string()));
        assert!(fields.contains(&"sync.backoff_multiplier".to_string()));
        assert!(fields.contains(&"sync.freshness_window_secs".to_string()));
    }

    #[test]
    fn test_to_sync_options() {
        let sync = SyncConfig {
            max_attempts: 3,
            initial_backoff_ms: 250,
            retry_interval_secs: 5,
            start_online: false,
            ..SyncConfig::default()
        };
        let options = sync.to_sync_options();
        assert_eq!(options.retry.max_attempts, 3);
        assert_eq!(options.retry.initial_delay, Duration::from_millis(250));
        assert_eq!(options.retry_interval, Duration::from_secs(5));
        assert!(!options.start_online);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_config_validation_error_display() {
        let error = ConfigError::Validation(vec![
            ValidationError::new("server.bind", "port cannot be 0"),
            ValidationError::new("sync.max_attempts", "max attempts must be at least 1"),
        ]);
        let display = format!("{}", error);
        assert!(display.contains("server.bind"));
        assert!(display.contains("sync.max_attempts"));
    }
}
