//! Configuration module for the backup daemon.
//!
//! Typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder for programmatic use.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration of the daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backup: BackupConfig,
    pub remote: RemoteConfig,
    pub logging: LoggingConfig,
}

/// Timings of the backup control loop, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Quiet window after a filesystem change before a turn starts.
    pub debounce_ms: u64,
    /// Pause between a successful turn and the next check.
    pub cooldown_ms: u64,
    /// Base of the quadratic retry back-off (`base * n²`).
    pub retry_base_ms: u64,
    /// Progress sampling period.
    pub progress_interval_ms: u64,
    /// Number of samples kept for the throughput estimate.
    pub progress_window: usize,
    /// Delay between a login and the backup restart.
    pub login_restart_delay_ms: u64,
}

/// NAS endpoint settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the NAS REST API, e.g. `http://192.168.1.20:3000`.
    pub base_url: String,
    /// Bearer token of the logged-in user. `None` until a client logs in.
    pub token: Option<String>,
    /// Machine identifier override; `/etc/machine-id` is used when absent.
    pub machine_id: Option<String>,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
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
    /// Typically `$XDG_CONFIG_HOME/nasbackup/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("nasbackup")
            .join("config.yaml")
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 2_000,
            cooldown_ms: 1_000,
            retry_base_ms: 1_000,
            progress_interval_ms: 1_000,
            progress_window: 10,
            login_restart_delay_ms: 1_000,
        }
    }
}

impl BackupConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// Back-off before the `retry_count`-th consecutive retry.
    pub fn retry_delay(&self, retry_count: u32) -> Duration {
        let n = u64::from(retry_count);
        Duration::from_millis(self.retry_base_ms.saturating_mul(n.saturating_mul(n)))
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn login_restart_delay(&self) -> Duration {
        Duration::from_millis(self.login_restart_delay_ms)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"backup.debounce_ms"`.
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

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut positive = |field: &str, value: u64| {
            if value == 0 {
                errors.push(ValidationError {
                    field: field.into(),
                    message: "must be greater than 0".into(),
                });
            }
        };

        // --- backup ---
        positive("backup.debounce_ms", self.backup.debounce_ms);
        positive("backup.retry_base_ms", self.backup.retry_base_ms);
        positive("backup.progress_interval_ms", self.backup.progress_interval_ms);

        if self.backup.progress_window < 2 {
            errors.push(ValidationError {
                field: "backup.progress_window".into(),
                message: "must keep at least 2 samples".into(),
            });
        }

        // --- remote ---
        if !self.remote.base_url.is_empty()
            && !(self.remote.base_url.starts_with("http://")
                || self.remote.base_url.starts_with("https://"))
        {
            errors.push(ValidationError {
                field: "remote.base_url".into(),
                message: "must be an http:// or https:// URL".into(),
            });
        }
        if let Some(id) = &self.remote.machine_id {
            if id.len() < 8 {
                errors.push(ValidationError {
                    field: "remote.machine_id".into(),
                    message: "must be at least 8 characters long".into(),
                });
            }
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "must be one of {}, got '{}'",
                    VALID_LOG_LEVELS.join(", "),
                    self.logging.level
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use nasbackup_core::config::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .remote_base_url("http://nas.local:3000")
///     .backup_debounce_ms(500)
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- backup ---

    pub fn backup_debounce_ms(mut self, ms: u64) -> Self {
        self.config.backup.debounce_ms = ms;
        self
    }

    pub fn backup_cooldown_ms(mut self, ms: u64) -> Self {
        self.config.backup.cooldown_ms = ms;
        self
    }

    pub fn backup_retry_base_ms(mut self, ms: u64) -> Self {
        self.config.backup.retry_base_ms = ms;
        self
    }

    pub fn backup_progress_interval_ms(mut self, ms: u64) -> Self {
        self.config.backup.progress_interval_ms = ms;
        self
    }

    pub fn backup_progress_window(mut self, samples: usize) -> Self {
        self.config.backup.progress_window = samples;
        self
    }

    pub fn backup_login_restart_delay_ms(mut self, ms: u64) -> Self {
        self.config.backup.login_restart_delay_ms = ms;
        self
    }

    // --- remote ---

    pub fn remote_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.remote.base_url = url.into();
        self
    }

    pub fn remote_token(mut self, token: impl Into<String>) -> Self {
        self.config.remote.token = Some(token.into());
        self
    }

    pub fn remote_machine_id(mut self, id: impl Into<String>) -> Self {
        self.config.remote.machine_id = Some(id.into());
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_json(mut self, json: bool) -> Self {
        self.config.logging.json = json;
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
