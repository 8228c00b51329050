use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Events that can trigger document state transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum DocumentEvent {
    /// A worker picked up the emission message (consumes one attempt)
    Start,
    /// Authority accepted the document
    Authorize {
        protocol_number: String,
        authorized_xml: Option<String>,
    },
    /// Business rejection, or business-classified exhaustion from `Error`
    Reject {
        code: Option<String>,
        message: String,
    },
    /// Technical failure; `retry_at` is set when a retry has been scheduled
    Fail {
        code: Option<String>,
        message: String,
        retry_at: Option<DateTime<Utc>>,
    },
    /// The worker holding the attempt vanished and its visibility lease
    /// lapsed; `attempts` is how many deliveries the operation has consumed
    Abandon { attempts: u32, reason: String },
    /// Technical exhaustion
    DeadLetter { reason: String },
    /// Message outlived its TTL before it could be processed
    Expire { reason: String },
    /// Explicit cancellation of an authorized document
    Cancel { reason: String },
}

impl DocumentEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Authorize { .. } => "authorize",
            Self::Reject { .. } => "reject",
            Self::Fail { .. } => "fail",
            Self::Abandon { .. } => "abandon",
            Self::DeadLetter { .. } => "dead_letter",
            Self::Expire { .. } => "expire",
            Self::Cancel { .. } => "cancel",
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Reject { message, .. } | Self::Fail { message, .. } => Some(message),
            Self::Abandon { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Events that can trigger operation sub-record transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum OperationEvent {
    Start,
    Succeed {
        protocol_number: Option<String>,
        response: Option<String>,
    },
    Reject {
        code: Option<String>,
        message: String,
    },
    Fail {
        code: Option<String>,
        message: String,
        retry_at: Option<DateTime<Utc>>,
    },
    Abandon { attempts: u32, reason: String },
    DeadLetter { reason: String },
    Expire { reason: String },
}

impl OperationEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Succeed { .. } => "succeed",
            Self::Reject { .. } => "reject",
            Self::Fail { .. } => "fail",
            Self::Abandon { .. } => "abandon",
            Self::DeadLetter { .. } => "dead_letter",
            Self::Expire { .. } => "expire",
        }
    }
}
