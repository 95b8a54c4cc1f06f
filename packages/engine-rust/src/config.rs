//! Engine configuration.
//!
//! Plain structs with sensible defaults. They also derive `Deserialize` so an
//! embedding application can load them from whatever format it already uses.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Largest pool capacity accepted by [`EngineConfig::validate`].
pub const MAX_POOL_CAPACITY: i64 = 1 << 20;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("pool capacity {0} exceeds the maximum of {MAX_POOL_CAPACITY}")]
    PoolCapacityTooLarge(i64),
    #[error("shutdown timeout must be greater than zero")]
    ZeroShutdownTimeout,
    #[error("unknown log format `{0}`, expected `plain` or `json`")]
    UnknownLogFormat(String),
}

/// Exchange pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of idle exchanges kept for reuse. Zero or negative
    /// disables pooling.
    pub capacity: i64,
    /// Count created/acquired/released/discarded exchanges.
    pub statistics_enabled: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            statistics_enabled: false,
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn is_pooling_enabled(&self) -> bool {
        self.capacity > 0
    }
}

/// Reactive scheduler settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub statistics_enabled: bool,
}

/// Which built-in advices a [`Workflow`](crate::routing::Workflow) installs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AdviceConfig {
    pub unit_of_work: bool,
    /// Enter a per-exchange diagnostic span around every step.
    pub diagnostic_context: bool,
    pub tracing: bool,
    pub message_history: bool,
    pub inflight: bool,
    pub metrics: bool,
}

impl Default for AdviceConfig {
    fn default() -> Self {
        Self {
            unit_of_work: true,
            diagnostic_context: false,
            tracing: true,
            message_history: false,
            inflight: true,
            metrics: false,
        }
    }
}

/// Log output settings for [`init_tracing`](crate::telemetry::init_tracing).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// `EnvFilter` directives, e.g. `info,relay_engine=debug`.
    pub filter: String,
    /// `plain` or `json`.
    pub format: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: "plain".to_string(),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pool: PoolConfig,
    pub scheduler: SchedulerConfig,
    pub advice: AdviceConfig,
    pub telemetry: TelemetryConfig,
    /// Upper bound for draining in-flight exchanges on graceful shutdown.
    pub shutdown_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            scheduler: SchedulerConfig::default(),
            advice: AdviceConfig::default(),
            telemetry: TelemetryConfig::default(),
            shutdown_timeout_ms: 30_000,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.capacity > MAX_POOL_CAPACITY {
            return Err(ConfigError::PoolCapacityTooLarge(self.pool.capacity));
        }
        if self.shutdown_timeout_ms == 0 {
            return Err(ConfigError::ZeroShutdownTimeout);
        }
        match self.telemetry.format.as_str() {
            "plain" | "json" => Ok(()),
            other => Err(ConfigError::UnknownLogFormat(other.to_string())),
        }
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = EngineConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert!(config.pool.is_pooling_enabled());
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn non_positive_capacity_disables_pooling() {
        let config = PoolConfig {
            capacity: -1,
            ..PoolConfig::default()
        };
        assert!(!config.is_pooling_enabled());
    }

    #[test]
    fn partial_documents_fill_in_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "pool": { "capacity": 8 }, "advice": { "metrics": true } }"#)
                .unwrap();

        assert_eq!(config.pool.capacity, 8);
        assert!(!config.pool.statistics_enabled);
        assert!(config.advice.metrics);
        assert!(config.advice.unit_of_work);
        assert_eq!(config.shutdown_timeout_ms, 30_000);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = EngineConfig::default();
        config.shutdown_timeout_ms = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroShutdownTimeout));

        let mut config = EngineConfig::default();
        config.pool.capacity = MAX_POOL_CAPACITY + 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PoolCapacityTooLarge(_))
        ));

        let mut config = EngineConfig::default();
        config.telemetry.format = "yaml".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnknownLogFormat("yaml".to_string()))
        );
    }
}
