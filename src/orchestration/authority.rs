//! # Authority Client
//!
//! Seam over the external fiscal authority. The wire protocol, XML signing
//! and certificate handling live behind this trait.

use crate::messaging::MessagePayload;
use crate::models::{CertificateRef, CorrelationId, FiscalEnvironment, Operation, TenantId};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// One call to the authority
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityRequest {
    pub tenant_id: TenantId,
    pub correlation_id: CorrelationId,
    pub operation: Operation,
    /// 1-based attempt number of this logical operation
    pub attempt: u32,
    pub certificate: CertificateRef,
    pub environment: FiscalEnvironment,
    pub payload: MessagePayload,
}

/// Successful authority answer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorityReceipt {
    /// Authorization / registration protocol (required for emissions)
    pub protocol_number: Option<String>,
    /// Authority-stamped document, for emissions
    pub response_xml: Option<String>,
    pub status_message: Option<String>,
}

impl AuthorityReceipt {
    pub fn authorized(protocol_number: impl Into<String>) -> Self {
        Self {
            protocol_number: Some(protocol_number.into()),
            ..Self::default()
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthorityError {
    /// The authority refused the request on business grounds
    #[error("Business rejection {code}: {message}")]
    BusinessRejection { code: String, message: String },

    /// Network failure, authority unavailable, malformed answer
    #[error("Technical error: {message}")]
    Technical { message: String },

    #[error("Authority call timed out after {timeout:?}")]
    Timeout { timeout: Duration },
}

impl AuthorityError {
    pub fn rejection(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BusinessRejection {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn technical(message: impl Into<String>) -> Self {
        Self::Technical {
            message: message.into(),
        }
    }

    /// Code recorded in the error trail
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::BusinessRejection { code, .. } => Some(code),
            Self::Technical { .. } => None,
            Self::Timeout { .. } => Some("timeout"),
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::BusinessRejection { message, .. } | Self::Technical { message } => message.clone(),
            Self::Timeout { .. } => self.to_string(),
        }
    }
}

#[async_trait]
pub trait AuthorityClient: Send + Sync + 'static {
    async fn submit(&self, request: AuthorityRequest) -> Result<AuthorityReceipt, AuthorityError>;
}
