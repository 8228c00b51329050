use crate::models::{Operation, Priority};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a message for one (operation, priority) pair is published
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueDescriptor {
    pub queue_name: String,
    pub routing_key: String,
    pub exchange: String,
    pub durable: bool,
    /// Only dead-letter queues are auto-delete
    pub auto_delete: bool,
    pub kind: QueueKind,
}

/// Primary work queue or the dead-letter queue of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum QueueKind {
    Work {
        operation: Operation,
        priority: Priority,
    },
    DeadLetter {
        operation: Operation,
    },
}

impl QueueDescriptor {
    /// `{prefix}.{operation}.{priority}` bound to `{operation}.{priority}`
    pub fn work(
        prefix: &str,
        exchange: &str,
        durable: bool,
        operation: Operation,
        priority: Priority,
    ) -> Self {
        Self {
            queue_name: format!("{prefix}.{operation}.{priority}"),
            routing_key: format!("{operation}.{priority}"),
            exchange: exchange.to_string(),
            durable,
            auto_delete: false,
            kind: QueueKind::Work {
                operation,
                priority,
            },
        }
    }

    /// `{prefix}.{operation}.dlq` bound to `{operation}.dead` on the DLX
    pub fn dead_letter(prefix: &str, exchange: &str, durable: bool, operation: Operation) -> Self {
        Self {
            queue_name: format!(
                "{prefix}.{operation}.{}",
                crate::constants::queues::DEAD_LETTER_SUFFIX
            ),
            routing_key: format!("{operation}.dead"),
            exchange: exchange.to_string(),
            durable,
            auto_delete: true,
            kind: QueueKind::DeadLetter { operation },
        }
    }

    pub fn is_dead_letter(&self) -> bool {
        matches!(self.kind, QueueKind::DeadLetter { .. })
    }

    pub fn operation(&self) -> Operation {
        match self.kind {
            QueueKind::Work { operation, .. } | QueueKind::DeadLetter { operation } => operation,
        }
    }

    pub fn priority(&self) -> Option<Priority> {
        match self.kind {
            QueueKind::Work { priority, .. } => Some(priority),
            QueueKind::DeadLetter { .. } => None,
        }
    }
}

impl fmt::Display for QueueDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} -> {})", self.queue_name, self.exchange, self.routing_key)
    }
}
