use crate::constants::events;
use crate::models::{AccessKey, CorrelationId, Operation, Priority, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Structured observability events emitted by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrchestrationEvent {
    /// A logical operation was accepted and its first message published
    DocumentSubmitted {
        tenant_id: TenantId,
        access_key: AccessKey,
        correlation_id: CorrelationId,
        operation: Operation,
        priority: Priority,
    },
    /// Any publish to a work queue (first attempt or retry)
    MessageDispatched {
        tenant_id: TenantId,
        correlation_id: CorrelationId,
        message_id: String,
        operation: Operation,
        queue_name: String,
        retry_count: u32,
    },
    /// A document or sub-record changed state
    StateTransitioned {
        tenant_id: TenantId,
        access_key: AccessKey,
        correlation_id: CorrelationId,
        operation: Operation,
        from_state: String,
        to_state: String,
        event: String,
        /// Time spent on the authority call that produced the transition
        latency_ms: Option<u64>,
    },
    RetryDecided {
        tenant_id: TenantId,
        correlation_id: CorrelationId,
        operation: Operation,
        retry_count: u32,
        classification: String,
        decision: String,
        delay_ms: Option<u64>,
    },
    /// Message settled without side effects (duplicate delivery)
    MessageDiscarded {
        tenant_id: TenantId,
        correlation_id: CorrelationId,
        operation: Operation,
        reason: String,
    },
    DeadLettered {
        tenant_id: TenantId,
        correlation_id: CorrelationId,
        operation: Operation,
        queue_name: String,
        reason: String,
    },
}

impl OrchestrationEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DocumentSubmitted { .. } => events::DOCUMENT_SUBMITTED,
            Self::MessageDispatched { .. } => events::MESSAGE_DISPATCHED,
            Self::StateTransitioned { operation, .. } if operation.is_emission() => {
                events::DOCUMENT_TRANSITIONED
            }
            Self::StateTransitioned { .. } => events::OPERATION_TRANSITIONED,
            Self::RetryDecided { .. } => events::RETRY_DECIDED,
            Self::MessageDiscarded { .. } => events::MESSAGE_DISCARDED,
            Self::DeadLettered { .. } => events::DOCUMENT_DEAD_LETTERED,
        }
    }

    pub fn tenant_id(&self) -> &TenantId {
        match self {
            Self::DocumentSubmitted { tenant_id, .. }
            | Self::MessageDispatched { tenant_id, .. }
            | Self::StateTransitioned { tenant_id, .. }
            | Self::RetryDecided { tenant_id, .. }
            | Self::MessageDiscarded { tenant_id, .. }
            | Self::DeadLettered { tenant_id, .. } => tenant_id,
        }
    }

    pub fn correlation_id(&self) -> CorrelationId {
        match self {
            Self::DocumentSubmitted { correlation_id, .. }
            | Self::MessageDispatched { correlation_id, .. }
            | Self::StateTransitioned { correlation_id, .. }
            | Self::RetryDecided { correlation_id, .. }
            | Self::MessageDiscarded { correlation_id, .. }
            | Self::DeadLettered { correlation_id, .. } => *correlation_id,
        }
    }
}

/// Event as delivered to subscribers
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub name: &'static str,
    pub event: OrchestrationEvent,
    pub published_at: DateTime<Utc>,
}
