//! Error types for the fiscal emission orchestrator.
//!
//! `FiscalError` is the taxonomy surfaced to callers of the produced
//! interfaces. Layer-specific errors (`MessagingError`, `StatusStoreError`,
//! `StateMachineError`, `ConfigurationError`) convert into it.

use crate::config::ConfigurationError;
use crate::messaging::MessagingError;
use crate::models::{AccessKey, Operation, Priority, TenantId};
use crate::state_machine::StateMachineError;
use crate::status::StatusStoreError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FiscalError {
    #[error("Tenant not found: {tenant_id}")]
    TenantNotFound { tenant_id: TenantId },

    #[error("Tenant is inactive: {tenant_id}")]
    TenantInactive { tenant_id: TenantId },

    #[error("No route configured for operation {operation} at priority {priority}")]
    RoutingNotFound {
        operation: Operation,
        priority: Priority,
    },

    #[error("Dispatch failed for {operation} on queue {queue_name}: {reason}")]
    Dispatch {
        operation: Operation,
        queue_name: String,
        reason: String,
    },

    #[error("Dispatch timed out after {timeout:?} for {operation} on queue {queue_name}")]
    DispatchTimeout {
        operation: Operation,
        queue_name: String,
        timeout: Duration,
    },

    #[error("Invalid state transition: {0}")]
    InvalidTransition(#[from] StateMachineError),

    #[error("Document not found: {access_key}")]
    DocumentNotFound { access_key: AccessKey },

    #[error("Document {access_key} belongs to another tenant")]
    TenantMismatch { access_key: AccessKey },

    #[error("Sequence contention for tenant {tenant_id} series {series} after {attempts} attempts")]
    SequenceContention {
        tenant_id: TenantId,
        series: u32,
        attempts: u32,
    },

    #[error("Sequence exhausted for tenant {tenant_id} series {series}")]
    SequenceExhausted { tenant_id: TenantId, series: u32 },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Status store error: {0}")]
    StatusStore(StatusStoreError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl FiscalError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    /// Whether the caller may retry the same request unchanged.
    ///
    /// Only transport unavailability qualifies; the excluded API layer maps
    /// these to a retryable client error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Dispatch { .. } | Self::DispatchTimeout { .. })
    }

    /// Whether the error is a configuration bug caught at startup validation
    pub fn is_configuration_bug(&self) -> bool {
        matches!(
            self,
            Self::RoutingNotFound { .. } | Self::Configuration(_)
        )
    }
}

impl From<StatusStoreError> for FiscalError {
    fn from(error: StatusStoreError) -> Self {
        match error {
            StatusStoreError::Transition(inner) => FiscalError::InvalidTransition(inner),
            StatusStoreError::DocumentNotFound { access_key } => {
                FiscalError::DocumentNotFound { access_key }
            }
            other => FiscalError::StatusStore(other),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for FiscalError {
    fn from(err: sqlx::Error) -> Self {
        FiscalError::Persistence(err.to_string())
    }
}

pub type FiscalResult<T> = std::result::Result<T, FiscalError>;
