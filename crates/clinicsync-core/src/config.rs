//! Configuration module for clinicsync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

/// Environment variable overriding `remote.url`.
pub const ENV_REMOTE_URL: &str = "CLINICSYNC_REMOTE_URL";
/// Environment variable overriding `remote.api_key`.
pub const ENV_API_KEY: &str = "CLINICSYNC_API_KEY";

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for clinicsync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub storage: StorageConfig,
    pub sync: SyncConfig,
    pub connectivity: ConnectivityConfig,
    pub logging: LoggingConfig,
}

/// Hosted data store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the project, e.g. `https://xyz.supabase.co`.
    pub url: String,
    /// Anonymous/service API key sent as `apikey` and bearer token.
    pub api_key: String,
    /// Upper bound for a single HTTP call, in seconds.
    pub request_timeout_secs: u64,
    /// Table read by the reachability probe.
    pub probe_table: String,
}

/// Local persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file holding the queue and the read cache.
    pub database_path: PathBuf,
}

/// Drain pass and retention settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between periodic drain passes.
    pub interval_secs: u64,
    /// Upper bound for replaying one operation, in seconds.
    pub operation_timeout_secs: u64,
    /// Connectivity failures tolerated before an operation is dead-lettered.
    pub max_attempts: u32,
    /// Days a synced operation is kept before pruning.
    pub retention_days: u32,
    /// Hours a read cache entry is kept.
    pub cache_max_age_hours: u32,
    pub weekly_flush: WeeklyFlushConfig,
}

/// Fixed weekly drain pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeeklyFlushConfig {
    pub enabled: bool,
    /// Three-letter weekday: `mon` .. `sun`.
    pub weekday: String,
    /// UTC time of day, `HH:MM`.
    pub time: String,
}

/// Reachability probe settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// Seconds between background probes.
    pub probe_interval_secs: u64,
    /// Extra probe attempts before declaring the store unreachable.
    pub probe_retries: u32,
    /// Delay between probe attempts, in milliseconds.
    pub probe_retry_delay_ms: u64,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Output format: `pretty` or `json`.
    pub format: String,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/clinicsync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("clinicsync")
            .join("config.yaml")
    }

    /// Overrides remote credentials from `CLINICSYNC_REMOTE_URL` and
    /// `CLINICSYNC_API_KEY` when they are set and non-empty.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_REMOTE_URL).filter(|v| !v.is_empty()) {
            self.remote.url = url;
        }
        if let Some(key) = lookup(ENV_API_KEY).filter(|v| !v.is_empty()) {
            self.remote.api_key = key;
        }
    }
}

impl RemoteConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }

    pub fn cache_max_age(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.cache_max_age_hours))
    }
}

impl WeeklyFlushConfig {
    /// Parsed weekday, `None` when the value is not recognised.
    pub fn weekday(&self) -> Option<Weekday> {
        self.weekday.parse().ok()
    }

    /// Parsed time of day, `None` when not `HH:MM`.
    pub fn time(&self) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(&self.time, "%H:%M").ok()
    }
}

impl ConnectivityConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn probe_retry_delay(&self) -> Duration {
        Duration::from_millis(self.probe_retry_delay_ms)
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            request_timeout_secs: 5,
            probe_table: "patients".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("clinicsync");
        Self {
            database_path: data_dir.join("offline.db"),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            operation_timeout_secs: 5,
            max_attempts: 10,
            retention_days: 7,
            cache_max_age_hours: 24,
            weekly_flush: WeeklyFlushConfig::default(),
        }
    }
}

impl Default for WeeklyFlushConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            weekday: "sun".to_string(),
            time: "23:00".to_string(),
        }
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: 30,
            probe_retries: 1,
            probe_retry_delay_ms: 500,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.interval_secs"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `logging.format`.
const VALID_LOG_FORMATS: &[&str] = &["pretty", "json"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut push = |field: &str, message: &str| {
            errors.push(ValidationError {
                field: field.into(),
                message: message.into(),
            })
        };

        // --- remote ---
        if self.remote.url.is_empty() {
            push("remote.url", "must be set");
        } else if !(self.remote.url.starts_with("http://")
            || self.remote.url.starts_with("https://"))
        {
            push("remote.url", "must start with http:// or https://");
        }
        if self.remote.request_timeout_secs == 0 {
            push("remote.request_timeout_secs", "must be greater than 0");
        }
        if self.remote.probe_table.is_empty() {
            push("remote.probe_table", "must be set");
        }

        // --- storage ---
        if self.storage.database_path.as_os_str().is_empty() {
            push("storage.database_path", "must be set");
        }

        // --- sync ---
        if self.sync.interval_secs == 0 {
            push("sync.interval_secs", "must be greater than 0");
        }
        if self.sync.operation_timeout_secs == 0 {
            push("sync.operation_timeout_secs", "must be greater than 0");
        }
        if self.sync.max_attempts == 0 {
            push("sync.max_attempts", "must be greater than 0");
        }
        if self.sync.retention_days == 0 {
            push("sync.retention_days", "must be greater than 0");
        }
        if self.sync.cache_max_age_hours == 0 {
            push("sync.cache_max_age_hours", "must be greater than 0");
        }
        if self.sync.weekly_flush.weekday().is_none() {
            push("sync.weekly_flush.weekday", "must be a weekday such as mon or sun");
        }
        if self.sync.weekly_flush.time().is_none() {
            push("sync.weekly_flush.time", "must be HH:MM");
        }

        // --- connectivity ---
        if self.connectivity.probe_interval_secs == 0 {
            push("connectivity.probe_interval_secs", "must be greater than 0");
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            push(
                "logging.level",
                &format!("must be one of: {}", VALID_LOG_LEVELS.join(", ")),
            );
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            push(
                "logging.format",
                &format!("must be one of: {}", VALID_LOG_FORMATS.join(", ")),
            );
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from defaults; each setter overrides one field.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- remote ---

    pub fn remote_url(mut self, url: impl Into<String>) -> Self {
        self.config.remote.url = url.into();
        self
    }

    pub fn remote_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.remote.api_key = key.into();
        self
    }

    pub fn remote_request_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.remote.request_timeout_secs = seconds;
        self
    }

    pub fn remote_probe_table(mut self, table: impl Into<String>) -> Self {
        self.config.remote.probe_table = table.into();
        self
    }

    // --- storage ---

    pub fn database_path(mut self, path: PathBuf) -> Self {
        self.config.storage.database_path = path;
        self
    }

    // --- sync ---

    pub fn sync_interval_secs(mut self, seconds: u64) -> Self {
        self.config.sync.interval_secs = seconds;
        self
    }

    pub fn sync_operation_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.sync.operation_timeout_secs = seconds;
        self
    }

    pub fn sync_max_attempts(mut self, attempts: u32) -> Self {
        self.config.sync.max_attempts = attempts;
        self
    }

    pub fn sync_retention_days(mut self, days: u32) -> Self {
        self.config.sync.retention_days = days;
        self
    }

    pub fn sync_cache_max_age_hours(mut self, hours: u32) -> Self {
        self.config.sync.cache_max_age_hours = hours;
        self
    }

    pub fn weekly_flush(mut self, weekday: impl Into<String>, time: impl Into<String>) -> Self {
        self.config.sync.weekly_flush.weekday = weekday.into();
        self.config.sync.weekly_flush.time = time.into();
        self
    }

    pub fn weekly_flush_enabled(mut self, enabled: bool) -> Self {
        self.config.sync.weekly_flush.enabled = enabled;
        self
    }

    // --- connectivity ---

    pub fn probe_interval_secs(mut self, seconds: u64) -> Self {
        self.config.connectivity.probe_interval_secs = seconds;
        self
    }

    pub fn probe_retries(mut self, retries: u32) -> Self {
        self.config.connectivity.probe_retries = retries;
        self
    }

    pub fn probe_retry_delay_ms(mut self, millis: u64) -> Self {
        self.config.connectivity.probe_retry_delay_ms = millis;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_format(mut self, format: impl Into<String>) -> Self {
        self.config.logging.format = format.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
