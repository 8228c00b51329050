//! # Transport Types
//!
//! Provider-agnostic identifiers and statistics shared by every transport.

use super::message::QueueMessage;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Unique identifier of one publish
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random id for a new publish
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle for acknowledging a received message
///
/// The format is provider-specific; the in-memory transport uses its
/// internal sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(pub String);

impl ReceiptHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A consumed message plus the handle needed to settle it
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: QueueMessage,
    pub receipt_handle: ReceiptHandle,
    /// Times this message has been handed to a consumer, this one included
    pub receive_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl Delivery {
    pub fn is_redelivery(&self) -> bool {
        self.receive_count > 1
    }
}

/// Queue statistics for operators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStats {
    pub queue_name: String,

    /// Total number of messages in the queue (visible, scheduled and in-flight)
    pub message_count: u64,

    /// Messages currently leased to a consumer
    pub in_flight_count: Option<u64>,

    /// Messages published with a future `scheduled_at`
    pub scheduled_count: Option<u64>,

    /// Age of the oldest message in the queue
    pub oldest_message_age: Option<Duration>,

    pub total_published: u64,
    pub total_acked: u64,
    pub total_nacked: u64,
}

impl QueueStats {
    pub fn new(queue_name: impl Into<String>, message_count: u64) -> Self {
        Self {
            queue_name: queue_name.into(),
            message_count,
            in_flight_count: None,
            scheduled_count: None,
            oldest_message_age: None,
            total_published: 0,
            total_acked: 0,
            total_nacked: 0,
        }
    }

    pub fn with_in_flight_count(mut self, count: u64) -> Self {
        self.in_flight_count = Some(count);
        self
    }

    pub fn with_scheduled_count(mut self, count: u64) -> Self {
        self.scheduled_count = Some(count);
        self
    }

    pub fn with_oldest_message_age(mut self, age: Duration) -> Self {
        self.oldest_message_age = Some(age);
        self
    }

    pub fn with_counters(mut self, published: u64, acked: u64, nacked: u64) -> Self {
        self.total_published = published;
        self.total_acked = acked;
        self.total_nacked = nacked;
        self
    }
}
