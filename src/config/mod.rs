//! # Configuration
//!
//! Immutable runtime configuration, loaded once by [`ConfigManager`] and
//! shared by reference. Durations are expressed in milliseconds so every
//! field can be overridden from a `FISCAL__SECTION__KEY` environment
//! variable.

pub mod error;
pub mod loader;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use crate::models::{Operation, Priority};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FiscalConfig {
    pub retry: RetryConfig,
    pub priorities: PrioritiesConfig,
    pub queues: QueuesConfig,
    pub dispatcher: DispatcherConfig,
    pub worker: WorkerConfig,
    pub sequence: SequenceConfig,
    pub logging: LoggingConfig,
}

/// What happens when a business-classified transient failure runs out of
/// attempts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BusinessExhaustionPolicy {
    /// `ERROR -> REJECTED`
    #[default]
    Reject,
    /// `ERROR -> DEAD_LETTERED`, message parked in the DLQ
    DeadLetter,
}

/// Backoff and retry configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter_enabled: bool,
    pub max_retries: MaxRetriesConfig,
    /// Authority rejection codes that mean "try again later"
    pub retryable_rejection_codes: Vec<String>,
    pub business_exhaustion: BusinessExhaustionPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 2_000,
            max_delay_ms: 300_000,
            multiplier: 2.0,
            jitter_enabled: true,
            max_retries: MaxRetriesConfig::default(),
            // 108/109: authority service paused
            retryable_rejection_codes: vec!["108".to_string(), "109".to_string()],
            business_exhaustion: BusinessExhaustionPolicy::Reject,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Total attempts allowed per operation, first attempt included
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct MaxRetriesConfig {
    pub emit: u32,
    pub query: u32,
    pub event: u32,
    pub void: u32,
}

impl Default for MaxRetriesConfig {
    fn default() -> Self {
        Self {
            emit: 5,
            query: 10,
            event: 5,
            void: 5,
        }
    }
}

impl MaxRetriesConfig {
    pub fn for_operation(&self, operation: Operation) -> u32 {
        match operation {
            Operation::Emit => self.emit,
            Operation::Query => self.query,
            Operation::Event => self.event,
            Operation::Void => self.void,
        }
    }
}

/// Static per-tier profile
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PriorityProfileConfig {
    pub weight: u32,
    pub ttl_ms: u64,
    pub max_concurrency: usize,
    pub prefetch: usize,
    pub invocation_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PrioritiesConfig {
    pub high: PriorityProfileConfig,
    pub normal: PriorityProfileConfig,
    pub low: PriorityProfileConfig,
}

impl Default for PrioritiesConfig {
    fn default() -> Self {
        Self {
            high: PriorityProfileConfig {
                weight: 10,
                ttl_ms: 60_000,
                max_concurrency: 16,
                prefetch: 16,
                invocation_timeout_ms: 10_000,
            },
            normal: PriorityProfileConfig {
                weight: 5,
                ttl_ms: 600_000,
                max_concurrency: 8,
                prefetch: 8,
                invocation_timeout_ms: 30_000,
            },
            low: PriorityProfileConfig {
                weight: 1,
                ttl_ms: 3_600_000,
                max_concurrency: 4,
                prefetch: 4,
                invocation_timeout_ms: 60_000,
            },
        }
    }
}

impl PrioritiesConfig {
    pub fn for_priority(&self, priority: Priority) -> &PriorityProfileConfig {
        match priority {
            Priority::High => &self.high,
            Priority::Normal => &self.normal,
            Priority::Low => &self.low,
        }
    }
}

/// Queue naming and the (operation, priority) route table
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueuesConfig {
    pub prefix: String,
    pub exchange: String,
    pub dead_letter_exchange: String,
    pub durable: bool,
    pub routes: RoutesConfig,
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            prefix: crate::constants::queues::DEFAULT_PREFIX.to_string(),
            exchange: crate::constants::queues::DEFAULT_EXCHANGE.to_string(),
            dead_letter_exchange: crate::constants::queues::DEFAULT_DEAD_LETTER_EXCHANGE
                .to_string(),
            durable: true,
            routes: RoutesConfig::default(),
        }
    }
}

/// Priorities each operation may be dispatched at
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutesConfig {
    pub emit: Vec<Priority>,
    pub query: Vec<Priority>,
    pub event: Vec<Priority>,
    pub void: Vec<Priority>,
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            emit: vec![Priority::High, Priority::Normal, Priority::Low],
            query: vec![Priority::Normal, Priority::Low],
            event: vec![Priority::Normal],
            void: vec![Priority::High, Priority::Normal],
        }
    }
}

impl RoutesConfig {
    pub fn for_operation(&self, operation: Operation) -> &[Priority] {
        match operation {
            Operation::Emit => &self.emit,
            Operation::Query => &self.query,
            Operation::Event => &self.event,
            Operation::Void => &self.void,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub publish_timeout_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            publish_timeout_ms: 5_000,
        }
    }
}

impl DispatcherConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Idle wait between empty polls of a queue
    pub poll_interval_ms: u64,
    /// How long a consumed message stays invisible to other workers
    pub visibility_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 250,
            visibility_timeout_ms: 120_000,
            shutdown_timeout_ms: 30_000,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_millis(self.visibility_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SequenceConfig {
    /// Compare-and-swap rounds before allocation gives up with contention
    pub max_cas_attempts: u32,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            max_cas_attempts: 128,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    pub level: String,
    /// Force JSON output regardless of environment
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl FiscalConfig {
    /// Cross-field validation run after every load
    pub fn validate(&self) -> ConfigResult<()> {
        self.validate_retry()?;
        self.validate_priorities()?;
        self.validate_routes()?;

        if self.dispatcher.publish_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "dispatcher.publish_timeout_ms",
                0,
                "must be greater than zero",
            ));
        }
        if self.worker.poll_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "worker.poll_interval_ms",
                0,
                "must be greater than zero",
            ));
        }
        let slowest_invocation = Priority::ALL
            .iter()
            .map(|p| self.priorities.for_priority(*p).invocation_timeout_ms)
            .max()
            .unwrap_or(0);
        if self.worker.visibility_timeout_ms <= slowest_invocation {
            return Err(ConfigurationError::validation_error(format!(
                "worker.visibility_timeout_ms ({}) must exceed the longest invocation timeout ({slowest_invocation})",
                self.worker.visibility_timeout_ms
            )));
        }
        if self.sequence.max_cas_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "sequence.max_cas_attempts",
                0,
                "must be at least 1",
            ));
        }
        Ok(())
    }

    fn validate_retry(&self) -> ConfigResult<()> {
        let retry = &self.retry;
        if retry.base_delay_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "retry.base_delay_ms",
                0,
                "must be greater than zero",
            ));
        }
        if retry.max_delay_ms < retry.base_delay_ms {
            return Err(ConfigurationError::invalid_value(
                "retry.max_delay_ms",
                retry.max_delay_ms,
                "must not be below retry.base_delay_ms",
            ));
        }
        if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
            return Err(ConfigurationError::invalid_value(
                "retry.multiplier",
                retry.multiplier,
                "must be a finite value >= 1.0",
            ));
        }
        for operation in Operation::ALL {
            if retry.max_retries.for_operation(operation) == 0 {
                return Err(ConfigurationError::invalid_value(
                    format!("retry.max_retries.{operation}"),
                    0,
                    "must allow at least one attempt",
                ));
            }
        }
        Ok(())
    }

    fn validate_priorities(&self) -> ConfigResult<()> {
        for priority in Priority::ALL {
            let profile = self.priorities.for_priority(priority);
            let checks = [
                ("max_concurrency", profile.max_concurrency as u64),
                ("prefetch", profile.prefetch as u64),
                ("ttl_ms", profile.ttl_ms),
                ("invocation_timeout_ms", profile.invocation_timeout_ms),
            ];
            for (field, value) in checks {
                if value == 0 {
                    return Err(ConfigurationError::invalid_value(
                        format!("priorities.{priority}.{field}"),
                        value,
                        "must be greater than zero",
                    ));
                }
            }
        }

        let (high, normal, low) = (
            &self.priorities.high,
            &self.priorities.normal,
            &self.priorities.low,
        );
        if !(high.max_concurrency > normal.max_concurrency
            && normal.max_concurrency > low.max_concurrency)
        {
            return Err(ConfigurationError::validation_error(
                "max_concurrency must strictly decrease from high to low",
            ));
        }
        if !(high.ttl_ms < normal.ttl_ms && normal.ttl_ms < low.ttl_ms) {
            return Err(ConfigurationError::validation_error(
                "ttl_ms must strictly increase from high to low",
            ));
        }
        if !(high.invocation_timeout_ms <= normal.invocation_timeout_ms
            && normal.invocation_timeout_ms <= low.invocation_timeout_ms
            && high.invocation_timeout_ms < low.invocation_timeout_ms)
        {
            return Err(ConfigurationError::validation_error(
                "invocation_timeout_ms must grow from high to low",
            ));
        }
        Ok(())
    }

    fn validate_routes(&self) -> ConfigResult<()> {
        for operation in Operation::ALL {
            let priorities = self.queues.routes.for_operation(operation);
            if priorities.is_empty() {
                return Err(ConfigurationError::invalid_value(
                    format!("queues.routes.{operation}"),
                    "[]",
                    "every operation needs at least one route",
                ));
            }
            let mut seen = priorities.to_vec();
            seen.sort();
            seen.dedup();
            if seen.len() != priorities.len() {
                return Err(ConfigurationError::invalid_value(
                    format!("queues.routes.{operation}"),
                    format!("{priorities:?}"),
                    "duplicate priority",
                ));
            }
        }
        if self.queues.prefix.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "queues.prefix",
                "",
                "must not be empty",
            ));
        }
        if self.queues.exchange == self.queues.dead_letter_exchange {
            return Err(ConfigurationError::validation_error(
                "queues.dead_letter_exchange must differ from queues.exchange",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = FiscalConfig::default();
        config.validate().unwrap();
        assert_eq!(config.retry.max_retries.for_operation(Operation::Emit), 5);
        assert_eq!(config.retry.max_retries.for_operation(Operation::Query), 10);
        assert_eq!(config.retry.base_delay(), Duration::from_secs(2));
        assert_eq!(config.retry.max_delay(), Duration::from_secs(300));
    }

    #[test]
    fn test_rejects_inverted_tiers() {
        let mut config = FiscalConfig::default();
        config.priorities.low.max_concurrency = 32;
        assert!(config.validate().is_err());

        let mut config = FiscalConfig::default();
        config.priorities.high.ttl_ms = config.priorities.low.ttl_ms + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_cap_below_base() {
        let mut config = FiscalConfig::default();
        config.retry.max_delay_ms = 1_000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("retry.max_delay_ms"));
    }

    #[test]
    fn test_rejects_empty_routes() {
        let mut config = FiscalConfig::default();
        config.queues.routes.event.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let mut config = FiscalConfig::default();
        config.priorities.normal.max_concurrency = 0;
        assert!(config.validate().is_err());
    }
}
