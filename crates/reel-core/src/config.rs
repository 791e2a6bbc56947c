use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8282;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 2_000; // scheduler precision vs. CPU
pub const DEFAULT_HISTORY_RETENTION: usize = 50; // executions kept per job
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64; // updates buffered per live subscriber
pub const DEFAULT_KEEPALIVE_SECS: u64 = 30; // SSE ping after this much silence

/// Lower bound for the scheduler tick so a typo cannot spin the loop.
const MIN_TICK_INTERVAL_MS: u64 = 10;

/// Top-level config (reel.toml + REEL_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReelConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Jobs created at startup when they are not already known.
    #[serde(default)]
    pub jobs: Vec<JobSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

/// Job manager tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often the scheduler loop looks for due jobs.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Maximum executions retained per job (oldest evicted first).
    #[serde(default = "default_history_retention")]
    pub history_retention: usize,
    /// Per-subscriber buffer; updates are dropped for a subscriber once full.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
    /// Idle time before the event stream emits a `ping`.
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            history_retention: DEFAULT_HISTORY_RETENTION,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            keepalive_secs: DEFAULT_KEEPALIVE_SECS,
        }
    }
}

impl SchedulerConfig {
    /// Clamp values that would break the manager (zero buffers, a busy loop).
    pub fn normalized(mut self) -> Self {
        self.tick_interval_ms = self.tick_interval_ms.max(MIN_TICK_INTERVAL_MS);
        self.history_retention = self.history_retention.max(1);
        self.subscriber_buffer = self.subscriber_buffer.max(1);
        self.keepalive_secs = self.keepalive_secs.max(1);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    /// When false, job definitions live only in memory for the process lifetime.
    #[serde(default = "bool_true")]
    pub persist: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            persist: true,
        }
    }
}

/// A job definition declared in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSeed {
    /// Stable id; keeps the job addressable across restarts.
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub job_type: String,
    /// Schedule expression, e.g. `every 6h`, `daily 04:30`, `0 */15 * * * *`, `manual`.
    #[serde(default = "default_schedule")]
    pub schedule: String,
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "empty_object")]
    pub config: serde_json::Value,
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}
fn default_history_retention() -> usize {
    DEFAULT_HISTORY_RETENTION
}
fn default_subscriber_buffer() -> usize {
    DEFAULT_SUBSCRIBER_BUFFER
}
fn default_keepalive_secs() -> u64 {
    DEFAULT_KEEPALIVE_SECS
}
fn default_schedule() -> String {
    "manual".to_string()
}
fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.reel/reel.db", home)
}

impl ReelConfig {
    /// Load config from a TOML file with REEL_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g. `REEL_SCHEDULER__TICK_INTERVAL_MS=500`.
    /// Falls back to `~/.reel/reel.toml` when no path is given.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let mut config: ReelConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("REEL_").split("__"))
            .extract()
            .map_err(|e| crate::error::ReelError::Config(e.to_string()))?;

        config.scheduler = config.scheduler.normalized();
        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.reel/reel.toml", home)
}
