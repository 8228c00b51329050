//! # Structured Logging Module
//!
//! Environment-aware structured logging. Development gets a human-readable
//! console layer; production (or `logging.json = true`) gets JSON lines.

use crate::config::LoggingConfig;
use crate::models::{CorrelationId, Operation, TenantId};
use chrono::Utc;
use std::sync::OnceLock;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific defaults
pub fn init_structured_logging() {
    init_logging(&LoggingConfig::default());
}

/// Initialize structured logging from configuration.
///
/// Idempotent; a subscriber installed by someone else is left in place.
pub fn init_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let default_level = get_log_level(&environment, &config.level);
        let json = config.json || environment == "production";

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level.clone()));

        let layer = if json {
            fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(false)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .boxed()
        };

        // Use try_init to avoid panic if global subscriber already set
        if tracing_subscriber::registry()
            .with(layer.with_filter(filter))
            .try_init()
            .is_err()
        {
            tracing::debug!("Global tracing subscriber already initialized");
        }

        tracing::info!(
            environment = %environment,
            level = %default_level,
            json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var(crate::config::loader::ENVIRONMENT_ENV)
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment; an explicit non-default config level wins
fn get_log_level(environment: &str, configured: &str) -> String {
    if configured != LoggingConfig::default().level {
        return configured.to_string();
    }
    match environment {
        "test" | "development" => "debug".to_string(),
        _ => configured.to_string(),
    }
}

/// Log structured data for queue publishes
pub fn log_dispatch_operation(
    operation: Operation,
    tenant_id: &TenantId,
    correlation_id: CorrelationId,
    queue_name: &str,
    retry_count: u32,
    status: &str,
) {
    tracing::info!(
        operation = %operation,
        tenant_id = %tenant_id,
        correlation_id = %correlation_id,
        queue_name = %queue_name,
        retry_count,
        status = %status,
        timestamp = %Utc::now().to_rfc3339(),
        "📤 DISPATCH_OPERATION"
    );
}

/// Log structured data for state transitions
pub fn log_state_transition(
    operation: Operation,
    tenant_id: &TenantId,
    correlation_id: CorrelationId,
    from_state: &str,
    to_state: &str,
    latency: Option<Duration>,
) {
    tracing::info!(
        operation = %operation,
        tenant_id = %tenant_id,
        correlation_id = %correlation_id,
        from_state = %from_state,
        to_state = %to_state,
        latency_ms = latency.map(|l| l.as_millis() as u64),
        "🔄 STATE_TRANSITION"
    );
}

/// Log structured data for retry decisions
pub fn log_retry_decision(
    operation: Operation,
    correlation_id: CorrelationId,
    retry_count: u32,
    classification: &str,
    decision: &str,
    delay: Option<Duration>,
) {
    tracing::info!(
        operation = %operation,
        correlation_id = %correlation_id,
        retry_count,
        classification = %classification,
        decision = %decision,
        delay_ms = delay.map(|d| d.as_millis() as u64),
        "🔁 RETRY_DECISION"
    );
}

/// Log structured errors with context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_defaults_per_environment() {
        assert_eq!(get_log_level("development", "info"), "debug");
        assert_eq!(get_log_level("production", "info"), "info");
        assert_eq!(get_log_level("production", "warn"), "warn");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_structured_logging();
        init_structured_logging();
        log_error("test", "noop", "nothing failed", None);
    }
}
