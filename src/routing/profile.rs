use crate::config::PriorityProfileConfig;
use crate::models::Priority;
use std::time::Duration;

/// Runtime parameters of one priority tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityProfile {
    pub priority: Priority,
    pub weight: u32,
    /// Lifetime of a published message, counted from its scheduled time
    pub ttl: Duration,
    pub max_concurrency: usize,
    pub prefetch: usize,
    /// Upper bound for one authority call at this tier
    pub invocation_timeout: Duration,
}

impl PriorityProfile {
    pub fn from_config(priority: Priority, config: &PriorityProfileConfig) -> Self {
        Self {
            priority,
            weight: config.weight,
            ttl: Duration::from_millis(config.ttl_ms),
            max_concurrency: config.max_concurrency,
            prefetch: config.prefetch,
            invocation_timeout: Duration::from_millis(config.invocation_timeout_ms),
        }
    }
}
