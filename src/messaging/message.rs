//! # Queue Messages
//!
//! Typed payloads per operation. The only open map is the tracing baggage
//! carried in [`MessageMetadata`].

use super::errors::MessagingResult;
use super::types::MessageId;
use crate::models::{AccessKey, CorrelationId, Operation, Priority, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Operation-specific body of a queue message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessagePayload {
    Emission {
        access_key: AccessKey,
        document_number: u64,
        series: u32,
        xml: String,
    },
    Query {
        access_key: AccessKey,
    },
    Event {
        access_key: AccessKey,
        /// Authority event type code (e.g. "110110" correction letter)
        event_type: String,
        sequence: u32,
        xml: String,
    },
    Void {
        access_key: AccessKey,
        protocol_number: String,
        reason: String,
    },
}

impl MessagePayload {
    pub fn operation(&self) -> Operation {
        match self {
            Self::Emission { .. } => Operation::Emit,
            Self::Query { .. } => Operation::Query,
            Self::Event { .. } => Operation::Event,
            Self::Void { .. } => Operation::Void,
        }
    }

    pub fn access_key(&self) -> &AccessKey {
        match self {
            Self::Emission { access_key, .. }
            | Self::Query { access_key }
            | Self::Event { access_key, .. }
            | Self::Void { access_key, .. } => access_key,
        }
    }
}

/// Failure annotation attached when a message is parked in a DLQ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterAnnotation {
    pub reason: String,
    pub classification: String,
    pub source_queue: String,
    pub attempts: u32,
    pub dead_lettered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Tracing baggage propagated untouched across retries
    #[serde(default)]
    pub baggage: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter: Option<DeadLetterAnnotation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Unique per publish
    pub message_id: MessageId,
    /// Stable across every retry of one logical operation
    pub correlation_id: CorrelationId,
    pub tenant_id: TenantId,
    pub operation: Operation,
    pub priority: Priority,
    pub payload: MessagePayload,
    pub retry_count: u32,
    pub scheduled_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl QueueMessage {
    /// First publish of a logical operation, with a fresh correlation id
    pub fn new(tenant_id: TenantId, priority: Priority, payload: MessagePayload, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            message_id: MessageId::generate(),
            correlation_id: CorrelationId::new(),
            tenant_id,
            operation: payload.operation(),
            priority,
            payload,
            retry_count: 0,
            scheduled_at: now,
            expires_at: now + to_chrono(ttl),
            metadata: MessageMetadata::default(),
        }
    }

    pub fn with_baggage(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.baggage.insert(key.into(), value.into());
        self
    }

    pub fn access_key(&self) -> &AccessKey {
        self.payload.access_key()
    }

    /// Next attempt of the same logical operation: same correlation id, new
    /// message id, incremented retry count, delayed schedule
    pub fn for_retry(&self, delay: Duration, ttl: Duration) -> Self {
        let scheduled_at = Utc::now() + to_chrono(delay);
        Self {
            message_id: MessageId::generate(),
            retry_count: self.retry_count + 1,
            scheduled_at,
            expires_at: scheduled_at + to_chrono(ttl),
            ..self.clone()
        }
    }

    /// The message unmodified plus the failure annotation
    pub fn for_dead_letter(&self, annotation: DeadLetterAnnotation) -> Self {
        let mut parked = self.clone();
        parked.metadata.dead_letter = Some(annotation);
        parked
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_due_at(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at <= now
    }

    pub fn to_bytes(&self) -> MessagingResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> MessagingResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    // Out-of-range durations saturate at roughly a century
    chrono::Duration::from_std(duration)
        .unwrap_or_else(|_| chrono::Duration::seconds(i64::from(u32::MAX)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emission() -> QueueMessage {
        QueueMessage::new(
            TenantId::new("acme"),
            Priority::High,
            MessagePayload::Emission {
                access_key: AccessKey::parse("35241012345678000195550010000000021876543219")
                    .unwrap(),
                document_number: 2,
                series: 1,
                xml: "<NFe/>".to_string(),
            },
            Duration::from_secs(60),
        )
        .with_baggage("traceparent", "00-abc-def-01")
    }

    #[test]
    fn test_retry_keeps_correlation_and_baggage() {
        let original = emission();
        let retry = original.for_retry(Duration::from_secs(2), Duration::from_secs(60));

        assert_eq!(retry.correlation_id, original.correlation_id);
        assert_ne!(retry.message_id, original.message_id);
        assert_eq!(retry.retry_count, 1);
        assert!(retry.scheduled_at > original.scheduled_at);
        assert!(retry.expires_at > retry.scheduled_at);
        assert_eq!(retry.metadata.baggage, original.metadata.baggage);
    }

    #[test]
    fn test_dead_letter_only_adds_annotation() {
        let original = emission();
        let parked = original.for_dead_letter(DeadLetterAnnotation {
            reason: "retries exhausted".to_string(),
            classification: "transient".to_string(),
            source_queue: "fiscal.emit.high".to_string(),
            attempts: 5,
            dead_lettered_at: Utc::now(),
        });

        assert!(parked.metadata.dead_letter.is_some());
        let mut stripped = parked.clone();
        stripped.metadata.dead_letter = None;
        assert_eq!(stripped, original);
    }

    #[test]
    fn test_payload_determines_operation() {
        let message = emission();
        assert_eq!(message.operation, Operation::Emit);
        let bytes = message.to_bytes().unwrap();
        let decoded = QueueMessage::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.access_key(), message.access_key());
        assert!(QueueMessage::from_bytes(b"{\"kind\":\"unknown\"}").is_err());
    }
}
