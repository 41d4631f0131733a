//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use thiserror::Error;
use watchtower_push::VapidCredentials;
use watchtower_snapshots::DEFAULT_MAX_IMAGE_BYTES;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Snapshot storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Snapshot retention settings.
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Web push settings.
    #[serde(default)]
    pub push: PushConfig,

    /// Detection notification settings.
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds to wait for connections to drain before forcing exit.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// Directory with the browser client, served as a fallback.
    #[serde(default = "default_public_dir")]
    pub public_dir: PathBuf,
}

/// Where and how snapshots are stored.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_recordings_dir")]
    pub recordings_dir: PathBuf,

    /// Largest accepted decoded image, in bytes.
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,
}

/// Background retention sweep settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    /// Number of newest snapshots kept by each sweep.
    #[serde(default = "default_retention_max_count")]
    pub max_count: usize,

    /// Seconds between sweeps.
    #[serde(default = "default_retention_interval_secs")]
    pub interval_secs: u64,
}

/// VAPID keys and push message options.
///
/// Push is disabled unless both keys are set.
#[derive(Clone, Deserialize)]
pub struct PushConfig {
    #[serde(default)]
    pub public_key: Option<String>,

    #[serde(default)]
    pub private_key: Option<String>,

    /// Contact address for the VAPID `sub` claim.
    #[serde(default)]
    pub contact_email: Option<String>,

    /// How long push services hold an undelivered message, in seconds.
    #[serde(default = "default_push_ttl_secs")]
    pub ttl_secs: u32,
}

/// Automatic detection notification settings.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    /// Minimum seconds between two automatic detection notifications.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "watchtower_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    3000
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

fn default_public_dir() -> PathBuf {
    PathBuf::from("public")
}

fn default_recordings_dir() -> PathBuf {
    PathBuf::from("public/recordings")
}

fn default_max_image_bytes() -> usize {
    DEFAULT_MAX_IMAGE_BYTES
}

fn default_retention_max_count() -> usize {
    1000
}

fn default_retention_interval_secs() -> u64 {
    3600
}

fn default_push_ttl_secs() -> u32 {
    86_400
}

fn default_cooldown_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            public_dir: default_public_dir(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            recordings_dir: default_recordings_dir(),
            max_image_bytes: default_max_image_bytes(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_count: default_retention_max_count(),
            interval_secs: default_retention_interval_secs(),
        }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            public_key: None,
            private_key: None,
            contact_email: None,
            ttl_secs: default_push_ttl_secs(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl fmt::Debug for PushConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushConfig")
            .field("public_key", &self.public_key)
            .field(
                "private_key",
                &self.private_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("contact_email", &self.contact_email)
            .field("ttl_secs", &self.ttl_secs)
            .finish()
    }
}

impl PushConfig {
    /// VAPID credentials, if both keys are configured.
    pub fn vapid_credentials(&self) -> Option<VapidCredentials> {
        VapidCredentials::from_parts(
            self.public_key.as_deref(),
            self.private_key.as_deref(),
            self.contact_email.as_deref(),
        )
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but cannot be used.
    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `PORT` overrides `server.port`
/// - `WATCHTOWER_HOST` overrides `server.host`
/// - `WATCHTOWER_PUBLIC_DIR` overrides `server.public_dir`
/// - `WATCHTOWER_RECORDINGS_DIR` overrides `storage.recordings_dir`
/// - `WATCHTOWER_RETENTION_MAX_COUNT` overrides `retention.max_count`
/// - `WATCHTOWER_RETENTION_INTERVAL_SECS` overrides `retention.interval_secs`
/// - `VAPID_PUBLIC_KEY`, `VAPID_PRIVATE_KEY`, `VAPID_EMAIL` override the `push` keys
/// - `WATCHTOWER_NOTIFY_COOLDOWN_SECS` overrides `notifications.cooldown_secs`
/// - `WATCHTOWER_LOG_LEVEL` overrides `logging.level`
/// - `WATCHTOWER_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// Values that fail to parse are ignored.
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed,
/// or if the merged values are unusable (a zero retention interval).
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.retention.interval_secs == 0 {
        return Err(ConfigError::Invalid(
            "retention.interval_secs must be at least 1".to_string(),
        ));
    }
    Ok(())
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("WATCHTOWER_HOST").and_then(|v| v.parse().ok()) {
        config.server.host = host;
    }
    if let Some(port) = var("PORT").and_then(|v| v.parse().ok()) {
        config.server.port = port;
    }
    if let Some(dir) = var("WATCHTOWER_PUBLIC_DIR") {
        config.server.public_dir = dir.into();
    }
    if let Some(dir) = var("WATCHTOWER_RECORDINGS_DIR") {
        config.storage.recordings_dir = dir.into();
    }
    if let Some(max) = var("WATCHTOWER_RETENTION_MAX_COUNT").and_then(|v| v.parse().ok()) {
        config.retention.max_count = max;
    }
    if let Some(secs) = var("WATCHTOWER_RETENTION_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
        config.retention.interval_secs = secs;
    }
    if let Some(key) = var("VAPID_PUBLIC_KEY") {
        config.push.public_key = Some(key);
    }
    if let Some(key) = var("VAPID_PRIVATE_KEY") {
        config.push.private_key = Some(key);
    }
    if let Some(email) = var("VAPID_EMAIL") {
        config.push.contact_email = Some(email);
    }
    if let Some(secs) = var("WATCHTOWER_NOTIFY_COOLDOWN_SECS").and_then(|v| v.parse().ok()) {
        config.notifications.cooldown_secs = secs;
    }
    if let Some(level) = var("WATCHTOWER_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("WATCHTOWER_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}
