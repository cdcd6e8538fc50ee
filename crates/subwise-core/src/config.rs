//! Runtime configuration
//!
//! ## Configuration Resolution
//!
//! Config is loaded with a two-layer resolution:
//! 1. An explicit path, or the override in the config dir
//!    (~/.config/subwise/config.toml on Linux)
//! 2. Fall back to embedded defaults (compiled into binary)
//!
//! Values missing from an override file keep their defaults. Environment
//! variables are applied last: `SUBWISE_URL`, `SUBWISE_API_KEY`,
//! `SUBWISE_ACCESS_TOKEN` and `SUBWISE_USER_ID`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::aggregate::DEFAULT_UPCOMING_WINDOW_DAYS;
use crate::error::{Error, Result};

/// Embedded default config (compiled into binary)
const DEFAULT_CONFIG: &str = include_str!("../../../config/default.toml");

pub const ENV_URL: &str = "SUBWISE_URL";
pub const ENV_API_KEY: &str = "SUBWISE_API_KEY";
pub const ENV_ACCESS_TOKEN: &str = "SUBWISE_ACCESS_TOKEN";
pub const ENV_USER_ID: &str = "SUBWISE_USER_ID";

/// Hosted backend connection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendConfig {
    pub url: String,
    pub api_key: String,
    /// User session token; the api key is used when absent
    pub access_token: Option<String>,
    pub user_id: Option<String>,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardConfig {
    pub upcoming_window_days: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub reevaluate_interval: Duration,
}

/// Profile picture storage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageConfig {
    pub bucket: String,
    pub signed_url_ttl_secs: u64,
    pub max_upload_attempts: u32,
    pub retry_base_delay: Duration,
    pub max_picture_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub backend: BackendConfig,
    pub dashboard: DashboardConfig,
    pub notifications: NotificationConfig,
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendConfig {
                url: String::new(),
                api_key: String::new(),
                access_token: None,
                user_id: None,
                poll_interval: Duration::from_secs(15),
            },
            dashboard: DashboardConfig {
                upcoming_window_days: DEFAULT_UPCOMING_WINDOW_DAYS,
            },
            notifications: NotificationConfig {
                enabled: true,
                reevaluate_interval: Duration::from_secs(24 * 60 * 60),
            },
            storage: StorageConfig {
                bucket: "profile-pictures".to_string(),
                signed_url_ttl_secs: 3600,
                max_upload_attempts: 3,
                retry_base_delay: Duration::from_secs(1),
                max_picture_bytes: 5 * 1024 * 1024,
            },
        }
    }
}

impl Config {
    /// Load from the default override location, then the environment
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load from an explicit file (or the default location when `None`)
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut config = load_config(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply overrides from a variable lookup
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty(ENV_URL) {
            self.backend.url = url;
        }
        if let Some(key) = non_empty(ENV_API_KEY) {
            self.backend.api_key = key;
        }
        if let Some(token) = non_empty(ENV_ACCESS_TOKEN) {
            self.backend.access_token = Some(token);
        }
        if let Some(user) = non_empty(ENV_USER_ID) {
            self.backend.user_id = Some(user);
        }
    }

    /// Whether a hosted backend is configured
    pub fn has_backend(&self) -> bool {
        !self.backend.url.trim().is_empty()
    }
}

/// Default config override path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("subwise").join("config.toml"))
}

/// Load configuration (override first, then default)
fn load_config(override_path: Option<&Path>) -> Result<Config> {
    let path = override_path
        .map(Path::to_path_buf)
        .or_else(default_config_path)
        .filter(|p| p.exists());

    let mut config = parse_config(DEFAULT_CONFIG)?;
    if let Some(path) = path {
        let content = fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        merge(&mut config, toml::from_str(&content)?);
        validate(&config)?;
        tracing::debug!(path = %path.display(), "Loaded config override");
    }
    Ok(config)
}

/// Raw config structure for TOML parsing
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    backend: Option<RawBackend>,
    dashboard: Option<RawDashboard>,
    notifications: Option<RawNotifications>,
    storage: Option<RawStorage>,
}

#[derive(Debug, Deserialize)]
struct RawBackend {
    url: Option<String>,
    api_key: Option<String>,
    access_token: Option<String>,
    user_id: Option<String>,
    poll_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawDashboard {
    upcoming_window_days: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawNotifications {
    enabled: Option<bool>,
    reevaluate_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawStorage {
    bucket: Option<String>,
    signed_url_ttl_secs: Option<u64>,
    max_upload_attempts: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    max_picture_bytes: Option<usize>,
}

/// Parse config from TOML content on top of the built-in defaults
fn parse_config(content: &str) -> Result<Config> {
    let raw: RawConfig = toml::from_str(content)?;
    let mut config = Config::default();
    merge(&mut config, raw);
    validate(&config)?;
    Ok(config)
}

fn merge(config: &mut Config, raw: RawConfig) {
    if let Some(backend) = raw.backend {
        if let Some(url) = backend.url {
            config.backend.url = url.trim_end_matches('/').to_string();
        }
        if let Some(key) = backend.api_key {
            config.backend.api_key = key;
        }
        if backend.access_token.is_some() {
            config.backend.access_token = backend.access_token;
        }
        if backend.user_id.is_some() {
            config.backend.user_id = backend.user_id;
        }
        if let Some(secs) = backend.poll_interval_secs {
            config.backend.poll_interval = Duration::from_secs(secs.max(1));
        }
    }

    if let Some(days) = raw.dashboard.and_then(|d| d.upcoming_window_days) {
        config.dashboard.upcoming_window_days = days;
    }

    if let Some(notifications) = raw.notifications {
        if let Some(enabled) = notifications.enabled {
            config.notifications.enabled = enabled;
        }
        if let Some(secs) = notifications.reevaluate_interval_secs {
            config.notifications.reevaluate_interval = Duration::from_secs(secs.max(1));
        }
    }

    if let Some(storage) = raw.storage {
        if let Some(bucket) = storage.bucket {
            config.storage.bucket = bucket;
        }
        if let Some(ttl) = storage.signed_url_ttl_secs {
            config.storage.signed_url_ttl_secs = ttl;
        }
        if let Some(attempts) = storage.max_upload_attempts {
            config.storage.max_upload_attempts = attempts;
        }
        if let Some(ms) = storage.retry_base_delay_ms {
            config.storage.retry_base_delay = Duration::from_millis(ms);
        }
        if let Some(bytes) = storage.max_picture_bytes {
            config.storage.max_picture_bytes = bytes;
        }
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.storage.max_upload_attempts == 0 {
        return Err(Error::Config(
            "storage.max_upload_attempts must be at least 1".into(),
        ));
    }
    if config.storage.bucket.trim().is_empty() {
        return Err(Error::Config("storage.bucket must not be empty".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_default_config() {
        let config = parse_config(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.dashboard.upcoming_window_days, 30);
        assert_eq!(config.storage.bucket, "profile-pictures");
        assert_eq!(config.storage.max_upload_attempts, 3);
        assert_eq!(config.storage.retry_base_delay, Duration::from_secs(1));
        assert_eq!(config.storage.max_picture_bytes, 5 * 1024 * 1024);
        assert_eq!(
            config.notifications.reevaluate_interval,
            Duration::from_secs(86400)
        );
        assert!(!config.has_backend());
    }

    #[test]
    fn test_override_file_keeps_missing_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[backend]\nurl = \"https://db.example.com/\"\n\n[dashboard]\nupcoming_window_days = 14\n",
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.backend.url, "https://db.example.com");
        assert_eq!(config.dashboard.upcoming_window_days, 14);
        assert_eq!(config.storage.bucket, "profile-pictures");
        assert!(config.has_backend());
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(parse_config("[backend\nurl = ").is_err());
        assert!(parse_config("[storage]\nmax_upload_attempts = 0").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_URL, "https://env.example.com"),
            (ENV_USER_ID, "user-42"),
            (ENV_API_KEY, "  "),
        ]);
        let mut config = Config::default();
        config.backend.api_key = "from-file".into();
        config.apply_env(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.backend.url, "https://env.example.com");
        assert_eq!(config.backend.user_id.as_deref(), Some("user-42"));
        assert_eq!(config.backend.api_key, "from-file");
        assert!(config.backend.access_token.is_none());
    }
}
