use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ── Top-level config ──────────────────────────────────────────

/// Full configuration for the task scheduler and its background worker.
///
/// Parsed from TOML with serde defaults for every key, then overridden by
/// `OFFLOAD_*` environment variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OffloadConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl OffloadConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Build config from defaults plus environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// - `OFFLOAD_WORKER_ENABLED` -> `scheduler.worker_enabled`
    /// - `OFFLOAD_DEFAULT_TIMEOUT_MS` -> `scheduler.default_timeout_ms`
    /// - `OFFLOAD_HEARTBEAT_THRESHOLD_MS` -> `scheduler.heartbeat_threshold_ms`
    /// - `OFFLOAD_HEALTH_CHECK_INTERVAL_MS` -> `scheduler.health_check_interval_ms`
    /// - `OFFLOAD_MAX_PENDING` -> `scheduler.max_pending`
    /// - `OFFLOAD_WORKER_NAME` -> `worker.name`
    /// - `OFFLOAD_WORKER_HEARTBEAT_INTERVAL_MS` -> `worker.heartbeat_interval_ms`
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(env_opt);
    }

    pub(crate) fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("OFFLOAD_WORKER_ENABLED").as_deref().and_then(parse_bool) {
            self.scheduler.worker_enabled = v;
        }
        if let Some(v) = lookup("OFFLOAD_DEFAULT_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.scheduler.default_timeout_ms = v;
        }
        if let Some(v) = lookup("OFFLOAD_HEARTBEAT_THRESHOLD_MS").and_then(|v| v.parse().ok()) {
            self.scheduler.heartbeat_threshold_ms = v;
        }
        if let Some(v) = lookup("OFFLOAD_HEALTH_CHECK_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.scheduler.health_check_interval_ms = v;
        }
        if let Some(v) = lookup("OFFLOAD_MAX_PENDING").and_then(|v| v.parse().ok()) {
            self.scheduler.max_pending = v;
        }
        if let Some(v) = lookup("OFFLOAD_WORKER_NAME") {
            self.worker.name = v;
        }
        if let Some(v) = lookup("OFFLOAD_WORKER_HEARTBEAT_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.worker.heartbeat_interval_ms = v;
        }
    }

    /// Validate the config: non-zero durations, heartbeat cadence under the liveness threshold.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.scheduler;
        if s.default_timeout_ms == 0 {
            return Err(ConfigError::Invalid("scheduler.default_timeout_ms must be > 0".into()));
        }
        if s.heartbeat_threshold_ms == 0 {
            return Err(ConfigError::Invalid("scheduler.heartbeat_threshold_ms must be > 0".into()));
        }
        if s.health_check_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.health_check_interval_ms must be > 0".into(),
            ));
        }
        if self.worker.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid("worker.heartbeat_interval_ms must be > 0".into()));
        }
        if s.worker_enabled && self.worker.heartbeat_interval_ms >= s.heartbeat_threshold_ms {
            return Err(ConfigError::Invalid(format!(
                "worker.heartbeat_interval_ms ({}) must be below scheduler.heartbeat_threshold_ms ({})",
                self.worker.heartbeat_interval_ms, s.heartbeat_threshold_ms
            )));
        }
        Ok(())
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!(
            "  scheduler: worker_enabled={}, default_timeout={}ms, max_pending={}",
            self.scheduler.worker_enabled,
            self.scheduler.default_timeout_ms,
            self.scheduler.max_pending
        );
        tracing::info!(
            "  health:    threshold={}ms, check_every={}ms",
            self.scheduler.heartbeat_threshold_ms,
            self.scheduler.health_check_interval_ms
        );
        tracing::info!(
            "  worker:    name={}, heartbeat_every={}ms",
            self.worker.name,
            self.worker.heartbeat_interval_ms
        );
    }

    /// JSON view of the effective config.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "scheduler": {
                "worker_enabled": self.scheduler.worker_enabled,
                "default_timeout_ms": self.scheduler.default_timeout_ms,
                "heartbeat_threshold_ms": self.scheduler.heartbeat_threshold_ms,
                "health_check_interval_ms": self.scheduler.health_check_interval_ms,
                "max_pending": self.scheduler.max_pending,
            },
            "worker": {
                "name": self.worker.name,
                "heartbeat_interval_ms": self.worker.heartbeat_interval_ms,
            },
        })
    }
}

// ── Scheduler ─────────────────────────────────────────────────

/// Scheduler configuration, typically parsed from the `[scheduler]` TOML section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Feature flag: when false every task runs through the inline fallback.
    #[serde(default = "default_worker_enabled")]
    pub worker_enabled: bool,
    /// Timeout applied when a caller does not pass one.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Silence from the worker longer than this marks it unhealthy.
    #[serde(default = "default_heartbeat_threshold_ms")]
    pub heartbeat_threshold_ms: u64,
    /// How often the health check runs.
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    /// Maximum tracked (queued + dispatched) tasks. 0 = unbounded.
    #[serde(default)]
    pub max_pending: usize,
}

fn default_worker_enabled() -> bool { true }
fn default_timeout_ms() -> u64 { 30_000 }
fn default_heartbeat_threshold_ms() -> u64 { 30_000 }
fn default_health_check_interval_ms() -> u64 { 5_000 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_enabled: default_worker_enabled(),
            default_timeout_ms: default_timeout_ms(),
            heartbeat_threshold_ms: default_heartbeat_threshold_ms(),
            health_check_interval_ms: default_health_check_interval_ms(),
            max_pending: 0,
        }
    }
}

impl SchedulerConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn heartbeat_threshold(&self) -> Duration {
        Duration::from_millis(self.heartbeat_threshold_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    /// Config with worker dispatch switched off.
    pub fn disabled() -> Self {
        Self {
            worker_enabled: false,
            ..Self::default()
        }
    }
}

// ── Worker ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Name used for the worker thread and in logs.
    #[serde(default = "default_worker_name")]
    pub name: String,
    /// How often an idle worker reports that it is alive.
    #[serde(default = "default_worker_heartbeat_ms")]
    pub heartbeat_interval_ms: u64,
}

fn default_worker_name() -> String {
    "offload-worker".into()
}

fn default_worker_heartbeat_ms() -> u64 { 5_000 }

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: default_worker_name(),
            heartbeat_interval_ms: default_worker_heartbeat_ms(),
        }
    }
}

impl WorkerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}
