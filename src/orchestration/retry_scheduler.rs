//! # Retry Scheduler
//!
//! Decides what happens to a failed message:
//!
//! - permanent failure: reject, never retried
//! - transient failure with attempts left: retry after a backoff delay
//! - transient failure out of attempts: dead-letter, or reject when the
//!   failure is business-classified and the exhaustion policy says so
//!
//! `max_retries` counts total attempts, the first one included.

use super::authority::AuthorityError;
use super::backoff_calculator::{BackoffCalculator, BackoffCalculatorConfig};
use super::error_classifier::{ErrorClassification, ErrorClassifier, StandardErrorClassifier};
use crate::config::{BusinessExhaustionPolicy, MaxRetriesConfig, RetryConfig};
use crate::events::{EventPublisher, OrchestrationEvent};
use crate::logging::log_retry_decision;
use crate::messaging::QueueMessage;
use crate::models::{ErrorEntry, Operation};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Republish the same logical operation after `delay`
    RetryAfter(Duration),
    /// Park the message in the dead-letter queue
    DeadLetter(String),
    /// Settle the operation as rejected
    Reject(String),
}

impl RetryDecision {
    pub fn label(&self) -> &'static str {
        match self {
            Self::RetryAfter(_) => "retry",
            Self::DeadLetter(_) => "dead_letter",
            Self::Reject(_) => "reject",
        }
    }

    pub fn delay(&self) -> Option<Duration> {
        match self {
            Self::RetryAfter(delay) => Some(*delay),
            _ => None,
        }
    }
}

/// Decision plus the classification that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOutcome {
    pub decision: RetryDecision,
    pub classification: ErrorClassification,
    /// Attempts made so far, the failing one included
    pub attempts: u32,
}

pub struct RetryScheduler {
    backoff: BackoffCalculator,
    classifier: Arc<dyn ErrorClassifier>,
    max_retries: MaxRetriesConfig,
    business_exhaustion: BusinessExhaustionPolicy,
    events: EventPublisher,
}

impl std::fmt::Debug for RetryScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryScheduler")
            .field("backoff", &self.backoff)
            .field("max_retries", &self.max_retries)
            .field("business_exhaustion", &self.business_exhaustion)
            .finish()
    }
}

impl RetryScheduler {
    pub fn new(config: &RetryConfig, events: EventPublisher) -> Self {
        Self {
            backoff: BackoffCalculator::new(BackoffCalculatorConfig::from(config)),
            classifier: Arc::new(StandardErrorClassifier::new(
                config.retryable_rejection_codes.iter().cloned(),
            )),
            max_retries: config.max_retries,
            business_exhaustion: config.business_exhaustion,
            events,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn backoff(&self) -> &BackoffCalculator {
        &self.backoff
    }

    pub fn max_attempts(&self, operation: Operation) -> u32 {
        self.max_retries.for_operation(operation).max(1)
    }

    /// Decision for a failure of `message`, counting attempts from its retry count
    pub fn on_failure(&self, message: &QueueMessage, error: &AuthorityError) -> RetryOutcome {
        self.on_failure_after(message, error, message.retry_count.saturating_add(1))
    }

    /// Decision for a failure after `attempts_made` attempts.
    ///
    /// The record's attempt counter wins over the message's retry count when
    /// it is higher (redeliveries of the same publish also consume attempts).
    pub fn on_failure_after(
        &self,
        message: &QueueMessage,
        error: &AuthorityError,
        attempts_made: u32,
    ) -> RetryOutcome {
        let classification = self.classifier.classify_error(error);
        let attempts = attempts_made.max(message.retry_count.saturating_add(1));
        let decision = self.decide(message.operation, &classification, attempts);
        self.record(message, classification, attempts, decision)
    }

    /// Decision for an operation found in `ERROR` with no attempts left,
    /// classified from the last recorded failure
    pub fn on_exhausted(
        &self,
        message: &QueueMessage,
        last_error: Option<&ErrorEntry>,
        attempts_made: u32,
    ) -> RetryOutcome {
        let classification = match last_error {
            Some(entry) => self
                .classifier
                .classify_recorded(entry.code.as_deref(), &entry.message),
            None => self.classifier.classify_recorded(None, "retries exhausted"),
        };
        let attempts = attempts_made.max(self.max_attempts(message.operation));
        let decision = self.decide(message.operation, &classification, attempts);
        self.record(message, classification, attempts, decision)
    }

    fn decide(
        &self,
        operation: Operation,
        classification: &ErrorClassification,
        attempts: u32,
    ) -> RetryDecision {
        if !classification.is_retryable() {
            return RetryDecision::Reject(classification.message.clone());
        }

        let max_attempts = self.max_attempts(operation);
        if attempts < max_attempts {
            return RetryDecision::RetryAfter(self.backoff.delay_for(attempts.saturating_sub(1)));
        }

        let reason = format!(
            "retries exhausted after {attempts} attempts: {}",
            classification.message
        );
        if classification.business && self.business_exhaustion == BusinessExhaustionPolicy::Reject
        {
            RetryDecision::Reject(reason)
        } else {
            RetryDecision::DeadLetter(reason)
        }
    }

    fn record(
        &self,
        message: &QueueMessage,
        classification: ErrorClassification,
        attempts: u32,
        decision: RetryDecision,
    ) -> RetryOutcome {
        log_retry_decision(
            message.operation,
            message.correlation_id,
            message.retry_count,
            classification.label(),
            decision.label(),
            decision.delay(),
        );
        self.events.publish(OrchestrationEvent::RetryDecided {
            tenant_id: message.tenant_id.clone(),
            correlation_id: message.correlation_id,
            operation: message.operation,
            retry_count: message.retry_count,
            classification: classification.label().to_string(),
            decision: decision.label().to_string(),
            delay_ms: decision.delay().map(|d| d.as_millis() as u64),
        });

        RetryOutcome {
            decision,
            classification,
            attempts,
        }
    }
}
