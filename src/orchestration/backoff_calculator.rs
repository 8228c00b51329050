//! # Backoff Calculator
//!
//! Exponential backoff with additive jitter:
//!
//! ```text
//! delay(n) = min(base * multiplier^n + jitter, cap)
//! jitter  ∈ [0, base * min(1, multiplier - 1)]
//! ```
//!
//! The jitter bound never exceeds the gap between consecutive exponential
//! steps, so delays are non-decreasing in the retry count whatever the
//! random draws.

use crate::config::RetryConfig;
use rand::Rng;
use std::time::Duration;

/// Configuration for backoff calculation behavior
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffCalculatorConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter_enabled: bool,
}

impl Default for BackoffCalculatorConfig {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for BackoffCalculatorConfig {
    fn from(config: &RetryConfig) -> Self {
        Self {
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            multiplier: config.multiplier.max(1.0),
            jitter_enabled: config.jitter_enabled,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackoffCalculator {
    config: BackoffCalculatorConfig,
}

impl BackoffCalculator {
    pub fn new(config: BackoffCalculatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BackoffCalculatorConfig {
        &self.config
    }

    /// Delay before the retry that follows `retry_count` previous retries
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let exponential = self.exponential_millis(retry_count);
        let jittered = if self.config.jitter_enabled {
            exponential + self.jitter_millis() as f64
        } else {
            exponential
        };
        self.cap(jittered)
    }

    /// Delay without jitter, capped
    pub fn base_delay_for(&self, retry_count: u32) -> Duration {
        self.cap(self.exponential_millis(retry_count))
    }

    /// Largest jitter that can be added to any delay
    pub fn max_jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_bound_millis())
    }

    fn exponential_millis(&self, retry_count: u32) -> f64 {
        let base = self.config.base_delay.as_millis() as f64;
        // Beyond 2^63 the cap applies anyway
        let exponent = retry_count.min(63) as i32;
        base * self.config.multiplier.powi(exponent)
    }

    fn jitter_bound_millis(&self) -> u64 {
        let base = self.config.base_delay.as_millis() as f64;
        let factor = (self.config.multiplier - 1.0).clamp(0.0, 1.0);
        (base * factor) as u64
    }

    fn jitter_millis(&self) -> u64 {
        let bound = self.jitter_bound_millis();
        if bound == 0 {
            return 0;
        }
        rand::thread_rng().gen_range(0..=bound)
    }

    fn cap(&self, millis: f64) -> Duration {
        let cap = self.config.max_delay.as_millis() as f64;
        let capped = if millis.is_finite() { millis.min(cap) } else { cap };
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

impl Default for BackoffCalculator {
    fn default() -> Self {
        Self::new(BackoffCalculatorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule_without_jitter() {
        let calculator = BackoffCalculator::new(BackoffCalculatorConfig {
            jitter_enabled: false,
            ..BackoffCalculatorConfig::default()
        });

        assert_eq!(calculator.delay_for(0), Duration::from_secs(2));
        assert_eq!(calculator.delay_for(1), Duration::from_secs(4));
        assert_eq!(calculator.delay_for(4), Duration::from_secs(32));
        assert_eq!(calculator.delay_for(8), Duration::from_secs(300));
        assert_eq!(calculator.delay_for(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn test_jitter_stays_within_bound() {
        let calculator = BackoffCalculator::default();
        assert_eq!(calculator.max_jitter(), Duration::from_secs(2));
        for _ in 0..100 {
            let delay = calculator.delay_for(1);
            assert!(delay >= Duration::from_secs(4));
            assert!(delay <= Duration::from_secs(6));
        }
    }

    #[test]
    fn test_unit_multiplier_has_no_jitter() {
        let calculator = BackoffCalculator::new(BackoffCalculatorConfig {
            multiplier: 1.0,
            ..BackoffCalculatorConfig::default()
        });
        assert_eq!(calculator.max_jitter(), Duration::ZERO);
        assert_eq!(calculator.delay_for(7), Duration::from_secs(2));
    }
}
