use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

use crate::common::server::LocalServer;
use crate::common::utils::RetryPolicy;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    Redis,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Origin id stamped on published events. Random per process when unset.
    pub instance_id: Option<String>,
    pub cache_backend: BackendType,
    pub cache_url: String,
    pub bus_backend: BackendType,
    pub bus_url: String,
    pub topic: String,
    pub key_prefix: String,
    pub heartbeat_interval_ms: u64,
    pub liveness_timeout_ms: u64,
    pub sweep_interval_ms: u64,
    pub bootstrap_on_gap: bool,
    pub op_timeout_ms: u64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub apply_workers: usize,
    pub record_ttl_secs: Option<u64>,
    pub local_server: Option<LocalServer>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            instance_id: None,
            cache_backend: BackendType::Redis,
            cache_url: "redis://127.0.0.1:6379".to_string(),
            bus_backend: BackendType::Redis,
            bus_url: "redis://127.0.0.1:6379".to_string(),
            topic: "serversync:servers".to_string(),
            key_prefix: "fleet:server".to_string(),
            heartbeat_interval_ms: 5_000,
            liveness_timeout_ms: 15_000,
            sweep_interval_ms: 5_000,
            bootstrap_on_gap: true,
            op_timeout_ms: 2_000,
            retry_max_attempts: 3,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 2_000,
            apply_workers: 4,
            record_ttl_secs: None,
            local_server: None,
        }
    }
}

impl SyncConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay_ms: self.retry_base_delay_ms,
            max_delay_ms: self.retry_max_delay_ms,
        }
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    pub fn resolve_instance_id(&self) -> String {
        self.instance_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }

    fn validate(self) -> Result<Self> {
        if self.heartbeat_interval_ms == 0 || self.sweep_interval_ms == 0 {
            return Err(anyhow::anyhow!("heartbeat and sweep intervals must be positive"));
        }
        if self.liveness_timeout_ms <= self.heartbeat_interval_ms {
            return Err(anyhow::anyhow!(
                "liveness_timeout_ms ({}) must exceed heartbeat_interval_ms ({})",
                self.liveness_timeout_ms,
                self.heartbeat_interval_ms
            ));
        }
        if self.apply_workers == 0 {
            return Err(anyhow::anyhow!("apply_workers must be at least 1"));
        }
        Ok(self)
    }
}

/// Layers defaults, the optional config file at `path` and `SERVERSYNC_*`
/// environment variables (a `.env` file is loaded first when present).
pub fn load_sync_config(path: &str) -> Result<SyncConfig> {
    dotenv::dotenv().ok();
    let defaults = SyncConfig::default();
    let settings = config::Config::builder()
        .set_default("cache_backend", "redis")?
        .set_default("cache_url", defaults.cache_url)?
        .set_default("bus_backend", "redis")?
        .set_default("bus_url", defaults.bus_url)?
        .set_default("topic", defaults.topic)?
        .set_default("key_prefix", defaults.key_prefix)?
        .set_default("heartbeat_interval_ms", defaults.heartbeat_interval_ms)?
        .set_default("liveness_timeout_ms", defaults.liveness_timeout_ms)?
        .set_default("sweep_interval_ms", defaults.sweep_interval_ms)?
        .set_default("bootstrap_on_gap", defaults.bootstrap_on_gap)?
        .set_default("op_timeout_ms", defaults.op_timeout_ms)?
        .set_default("retry_max_attempts", defaults.retry_max_attempts)?
        .set_default("retry_base_delay_ms", defaults.retry_base_delay_ms)?
        .set_default("retry_max_delay_ms", defaults.retry_max_delay_ms)?
        .set_default("apply_workers", defaults.apply_workers as u64)?
        .add_source(config::File::with_name(path).required(false))
        .add_source(
            config::Environment::with_prefix("SERVERSYNC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    let config: SyncConfig = settings.try_deserialize()?;
    log::debug!("Loaded sync config: {:?}", config);
    config.validate()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_sync_config("does/not/exist/serversync").unwrap();
        assert_eq!(config.topic, "serversync:servers");
        assert_eq!(config.key_prefix, "fleet:server");
        assert!(config.bootstrap_on_gap);
        assert!(config.local_server.is_none());
    }

    #[test]
    fn liveness_timeout_must_exceed_heartbeat() {
        let config = SyncConfig {
            heartbeat_interval_ms: 5_000,
            liveness_timeout_ms: 5_000,
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn blank_instance_id_is_replaced() {
        let config = SyncConfig {
            instance_id: Some("  ".to_string()),
            ..SyncConfig::default()
        };
        assert!(!config.resolve_instance_id().trim().is_empty());
    }
}
