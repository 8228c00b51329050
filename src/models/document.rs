//! # Document Records
//!
//! `DocumentStatusRecord` is the append-only audit trail of one fiscal
//! document. Field mutation happens exclusively through the state machines
//! in [`crate::state_machine`]; this module only defines the shapes.

use super::access_key::AccessKey;
use super::identifiers::{CorrelationId, TenantId};
use super::operation::{Operation, Priority};
use crate::state_machine::{DocumentState, OperationState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A document ready for dispatch.
///
/// The access key and document number are allocated before the draft is
/// built; the dispatcher never allocates numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentDraft {
    pub access_key: AccessKey,
    pub document_number: u64,
    pub series: u32,
    pub issued_at: DateTime<Utc>,
    /// Signed document body, opaque to the orchestrator
    pub submitted_xml: String,
}

/// One failure description in a record's error trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub recorded_at: DateTime<Utc>,
    /// Attempt number the failure belongs to (1-based)
    pub attempt: u32,
    /// Authority rejection code or internal failure code
    pub code: Option<String>,
    pub message: String,
}

impl ErrorEntry {
    pub fn new(attempt: u32, code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            recorded_at: Utc::now(),
            attempt,
            code,
            message: message.into(),
        }
    }
}

/// Sub-record tracking a query, event or void operation on a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub correlation_id: CorrelationId,
    pub operation: Operation,
    pub priority: Priority,
    pub state: OperationState,
    pub attempt_count: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub errors: Vec<ErrorEntry>,
    /// Authority protocol for the operation (event registration, void, query receipt)
    pub protocol_number: Option<String>,
    /// Authority response body or status message
    pub response: Option<String>,
    pub dead_letter_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OperationRecord {
    pub fn pending(correlation_id: CorrelationId, operation: Operation, priority: Priority) -> Self {
        let now = Utc::now();
        Self {
            correlation_id,
            operation,
            priority,
            state: OperationState::Pending,
            attempt_count: 0,
            next_attempt_at: None,
            errors: Vec::new(),
            protocol_number: None,
            response: None,
            dead_letter_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Lifecycle record of one fiscal document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentStatusRecord {
    pub tenant_id: TenantId,
    pub access_key: AccessKey,
    pub document_number: u64,
    pub series: u32,
    /// Correlation of the emission that created the record
    pub correlation_id: CorrelationId,
    pub priority: Priority,
    pub state: DocumentState,
    pub protocol_number: Option<String>,
    pub submitted_xml: String,
    pub authorized_xml: Option<String>,
    pub attempt_count: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub errors: Vec<ErrorEntry>,
    pub dead_letter_reason: Option<String>,
    pub cancellation_reason: Option<String>,
    pub operations: Vec<OperationRecord>,
    pub issued_at: DateTime<Utc>,
    pub authorized_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentStatusRecord {
    /// New record in `PENDING` for a freshly dispatched emission
    pub fn pending(
        tenant_id: TenantId,
        draft: DocumentDraft,
        correlation_id: CorrelationId,
        priority: Priority,
    ) -> Self {
        let now = Utc::now();
        Self {
            tenant_id,
            access_key: draft.access_key,
            document_number: draft.document_number,
            series: draft.series,
            correlation_id,
            priority,
            state: DocumentState::Pending,
            protocol_number: None,
            submitted_xml: draft.submitted_xml,
            authorized_xml: None,
            attempt_count: 0,
            next_attempt_at: None,
            errors: Vec::new(),
            dead_letter_reason: None,
            cancellation_reason: None,
            operations: Vec::new(),
            issued_at: draft.issued_at,
            authorized_at: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn operation(&self, correlation_id: &CorrelationId) -> Option<&OperationRecord> {
        self.operations
            .iter()
            .find(|op| &op.correlation_id == correlation_id)
    }

    pub fn operation_mut(&mut self, correlation_id: &CorrelationId) -> Option<&mut OperationRecord> {
        self.operations
            .iter_mut()
            .find(|op| &op.correlation_id == correlation_id)
    }

    /// Whether the logical operation identified by `correlation_id` has
    /// reached a terminal outcome. Unknown correlations are never settled.
    pub fn is_settled(&self, correlation_id: &CorrelationId) -> bool {
        if &self.correlation_id == correlation_id {
            return self.state.is_terminal();
        }
        self.operation(correlation_id)
            .map(|op| op.state.is_terminal())
            .unwrap_or(false)
    }

    /// Operation kind for a correlation owned by this record
    pub fn operation_for(&self, correlation_id: &CorrelationId) -> Option<Operation> {
        if &self.correlation_id == correlation_id {
            return Some(Operation::Emit);
        }
        self.operation(correlation_id).map(|op| op.operation)
    }

    /// Whether the document has any operation of the given kind still in flight
    pub fn has_open_operation(&self, operation: Operation) -> bool {
        self.operations
            .iter()
            .any(|op| op.operation == operation && !op.state.is_terminal())
    }
}
