use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub gateway: GatewayConfig,
    /// PostgreSQL connection URL (transfers, stock, durable queue)
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    /// Table-backed durable queue in PostgreSQL
    Postgres,
    /// In-process queue; messages do not survive a restart
    Memory,
}

/// Queue channel settings shared by the transfer and revert queues
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    pub transfer_queue: String,
    pub revert_queue: String,
    /// Idle wait between polls when the queue is empty
    pub poll_interval_ms: u64,
    /// Lease length of a delivered but un-acked message (postgres backend)
    pub visibility_timeout_ms: u64,
    /// Delay before a nacked message becomes visible again (postgres backend)
    pub retry_delay_ms: u64,
    /// Must exceed the bounded steps of one delivery (four store calls and a
    /// publish), and stay below `visibility_timeout_ms`
    pub handler_timeout_ms: u64,
    /// Grace period given to an in-flight handler on close
    pub close_grace_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Postgres,
            transfer_queue: "transfer_product".to_string(),
            revert_queue: "transfer_product_revert".to_string(),
            poll_interval_ms: 200,
            visibility_timeout_ms: 60_000,
            retry_delay_ms: 1_000,
            handler_timeout_ms: 30_000,
            close_grace_ms: 10_000,
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_millis(self.visibility_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}

/// Bounds on the two blocking suspension points of the orchestrator
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TransferConfig {
    pub publish_timeout_ms: u64,
    pub store_timeout_ms: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            publish_timeout_ms: 5_000,
            store_timeout_ms: 5_000,
        }
    }
}

impl TransferConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReconciliationConfig {
    pub enabled: bool,
    pub scan_interval_secs: u64,
    /// Age after which an InTransit record is re-driven
    pub stale_threshold_secs: u64,
    pub batch_size: usize,
    /// Re-drives after which a record is reported for manual inspection
    pub max_redrives: i32,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval_secs: 30,
            stale_threshold_secs: 60,
            batch_size: 100,
            max_redrives: 10,
        }
    }
}

impl ReconciliationConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_secs)
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
            path: config_path.clone(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }
}
