use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub engine: EngineConfig,
    pub queue: QueueConfig,
    pub worker: WorkerSettings,
    pub pool: PoolSettings,
    pub storage: StorageConfig,
    pub nats: NatsConfig,
    pub session: SessionSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

/// Connection parameters for the external recognition engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub url: String,
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub enable_partials: bool,
    /// Maximum delay before the engine must emit a final, in seconds
    pub max_delay: f64,
    pub connect_timeout_secs: u64,
    pub reconnect_base_ms: u64,
    pub max_reconnect_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Base delay for exponential retry backoff, in milliseconds
    pub backoff_base_ms: u64,
    pub max_attempts: u32,
    pub stall_timeout_secs: u64,
    /// How long terminal tasks are kept for inspection
    pub finished_retention_secs: u64,
    pub reaper_interval_secs: u64,
    /// Delay on the summary enqueue after audio completes
    pub summary_settle_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub concurrency: usize,
    pub task_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub health_check_interval_secs: u64,
    pub memory_threshold_mb: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub auto_restart: bool,
    pub max_restart_attempts: u32,
    pub restart_delay_ms: u64,
    pub restart_reset_window_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for filesystem-backed artifact storage
    pub artifacts_path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    pub enabled: bool,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub sweep_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            engine: EngineConfig::default(),
            queue: QueueConfig::default(),
            worker: WorkerSettings::default(),
            pool: PoolSettings::default(),
            storage: StorageConfig::default(),
            nats: NatsConfig::default(),
            session: SessionSettings::default(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "scribe-relay".to_string(),
            http: HttpConfig::default(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8090,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:9000".to_string(),
            encoding: "pcm_s16le".to_string(),
            sample_rate: 16000,
            channels: 1,
            enable_partials: true,
            max_delay: 2.0,
            connect_timeout_secs: 10,
            reconnect_base_ms: 1_000,
            max_reconnect_attempts: 5,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: 1_000,
            max_attempts: 3,
            stall_timeout_secs: 30,
            finished_retention_secs: 3_600,
            reaper_interval_secs: 60,
            summary_settle_delay_ms: 5_000,
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            task_timeout_secs: 60,
            poll_interval_ms: 250,
            health_check_interval_secs: 10,
            memory_threshold_mb: 512,
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            auto_restart: true,
            max_restart_attempts: 3,
            restart_delay_ms: 1_000,
            restart_reset_window_secs: 60,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            artifacts_path: "./artifacts".to_string(),
        }
    }
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "nats://localhost:4222".to_string(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 300,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
