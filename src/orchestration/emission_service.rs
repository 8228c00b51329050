//! # Emission Service
//!
//! Entry points consumed by the HTTP layer: submit an emission, read a
//! document's status, cancel it, query it, register events against it.
//!
//! Submission allocates the document number exactly once, before anything
//! retryable happens; every later step reuses the allocated access key.

use super::dispatcher::Dispatcher;
use crate::constants::fiscal::{MAX_CANCELLATION_REASON, MIN_CANCELLATION_REASON};
use crate::error::{FiscalError, FiscalResult};
use crate::models::{
    AccessKey, AccessKeyParts, CorrelationId, DocumentDraft, DocumentStatusRecord, Operation,
    Priority, TenantId,
};
use crate::sequence::SequenceAllocator;
use crate::state_machine::DocumentState;
use crate::status::StatusStore;
use crate::tenancy::TenantRegistry;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Normal issuance (as opposed to contingency modes)
const EMISSION_TYPE_NORMAL: u8 = 1;

/// A document to be issued for a tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmissionRequest {
    /// Defaults to the tenant's configured series
    pub series: Option<u32>,
    #[serde(default)]
    pub priority: Priority,
    /// Signed document body
    pub submitted_xml: String,
    /// Defaults to now
    pub issued_at: Option<DateTime<Utc>>,
}

impl EmissionRequest {
    pub fn new(submitted_xml: impl Into<String>) -> Self {
        Self {
            series: None,
            priority: Priority::default(),
            submitted_xml: submitted_xml.into(),
            issued_at: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_series(mut self, series: u32) -> Self {
        self.series = Some(series);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedEmission {
    pub correlation_id: CorrelationId,
    pub access_key: AccessKey,
    pub document_number: u64,
    pub series: u32,
}

/// How the HTTP layer reports a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusOutcome {
    /// Accepted, in progress
    InProgress,
    /// Authorized or cancelled
    Succeeded,
    /// Rejected or dead-lettered; needs manual or corrected resubmission
    Failed,
}

impl From<DocumentState> for StatusOutcome {
    fn from(state: DocumentState) -> Self {
        if state.is_success() {
            Self::Succeeded
        } else if state.is_failure() {
            Self::Failed
        } else {
            Self::InProgress
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub outcome: StatusOutcome,
    pub record: DocumentStatusRecord,
}

impl From<DocumentStatusRecord> for StatusSnapshot {
    fn from(record: DocumentStatusRecord) -> Self {
        Self {
            outcome: record.state.into(),
            record,
        }
    }
}

#[derive(Clone)]
pub struct EmissionService {
    registry: Arc<TenantRegistry>,
    allocator: Arc<SequenceAllocator>,
    dispatcher: Arc<Dispatcher>,
    status: Arc<dyn StatusStore>,
}

impl std::fmt::Debug for EmissionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmissionService")
            .field("allocator", &self.allocator)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

impl EmissionService {
    pub fn new(allocator: Arc<SequenceAllocator>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            registry: dispatcher.registry().clone(),
            status: dispatcher.status_store().clone(),
            allocator,
            dispatcher,
        }
    }

    /// Allocate a number, build the access key and enqueue the emission
    pub async fn submit_emission(
        &self,
        tenant_id: &TenantId,
        request: EmissionRequest,
    ) -> FiscalResult<SubmittedEmission> {
        let tenant = self.registry.ensure_active(tenant_id).await?;
        // Routing errors must surface before a number is consumed
        self.dispatcher.check_route(Operation::Emit, request.priority)?;

        let series = request.series.unwrap_or(tenant.default_series);
        let issued_at = request.issued_at.unwrap_or_else(Utc::now);
        let document_number = self.allocator.next_number(tenant_id, series).await?;

        let access_key = AccessKey::build(&AccessKeyParts {
            state_code: tenant.state_code,
            issued_at,
            issuer_tax_id: tenant.issuer_tax_id.clone(),
            model: tenant.document_model,
            series,
            document_number,
            emission_type: EMISSION_TYPE_NORMAL,
            numeric_code: numeric_code(document_number),
        })?;

        let draft = DocumentDraft {
            access_key: access_key.clone(),
            document_number,
            series,
            issued_at,
            submitted_xml: request.submitted_xml,
        };
        let correlation_id = self
            .dispatcher
            .enqueue_emission(tenant_id, draft, request.priority)
            .await?;

        info!(
            tenant_id = %tenant_id,
            access_key = %access_key,
            document_number,
            series,
            correlation_id = %correlation_id,
            priority = %request.priority,
            "📄 EMISSION_SERVICE: Emission submitted"
        );

        Ok(SubmittedEmission {
            correlation_id,
            access_key,
            document_number,
            series,
        })
    }

    /// Republish an emission whose dispatch failed; the record must still be
    /// `PENDING`. No new number is allocated.
    pub async fn resubmit(&self, access_key: &AccessKey) -> FiscalResult<CorrelationId> {
        let record = self.record(access_key).await?;
        self.dispatcher
            .republish_pending(&record.tenant_id, access_key)
            .await
    }

    pub async fn get_status(&self, access_key: &AccessKey) -> FiscalResult<StatusSnapshot> {
        Ok(self.record(access_key).await?.into())
    }

    /// Status lookup scoped to the calling tenant
    pub async fn get_tenant_status(
        &self,
        tenant_id: &TenantId,
        access_key: &AccessKey,
    ) -> FiscalResult<StatusSnapshot> {
        let record = self.record(access_key).await?;
        if &record.tenant_id != tenant_id {
            return Err(FiscalError::TenantMismatch {
                access_key: access_key.clone(),
            });
        }
        Ok(record.into())
    }

    /// Cancel an authorized document at high priority
    pub async fn cancel(&self, access_key: &AccessKey, reason: &str) -> FiscalResult<CorrelationId> {
        self.cancel_with_priority(access_key, reason, Priority::High)
            .await
    }

    pub async fn cancel_with_priority(
        &self,
        access_key: &AccessKey,
        reason: &str,
        priority: Priority,
    ) -> FiscalResult<CorrelationId> {
        let reason = validate_cancellation_reason(reason)?;
        let record = self.record(access_key).await?;
        if record.state != DocumentState::Authorized {
            return Err(FiscalError::validation(format!(
                "only authorized documents can be cancelled, {access_key} is {}",
                record.state
            )));
        }

        self.dispatcher
            .enqueue_void(&record.tenant_id, access_key, reason, priority)
            .await
    }

    pub async fn query_status(
        &self,
        access_key: &AccessKey,
        priority: Priority,
    ) -> FiscalResult<CorrelationId> {
        let record = self.record(access_key).await?;
        self.dispatcher
            .enqueue_query(&record.tenant_id, access_key, priority)
            .await
    }

    /// Register an authority event (e.g. a correction letter)
    pub async fn register_event(
        &self,
        access_key: &AccessKey,
        event_type: &str,
        sequence: u32,
        xml: impl Into<String>,
        priority: Priority,
    ) -> FiscalResult<CorrelationId> {
        if event_type.trim().is_empty() {
            return Err(FiscalError::validation("event type must not be empty"));
        }
        if sequence == 0 {
            return Err(FiscalError::validation("event sequence starts at 1"));
        }
        let record = self.record(access_key).await?;
        self.dispatcher
            .enqueue_event(&record.tenant_id, access_key, event_type, sequence, xml, priority)
            .await
    }

    async fn record(&self, access_key: &AccessKey) -> FiscalResult<DocumentStatusRecord> {
        self.status
            .get(access_key)
            .await?
            .ok_or_else(|| FiscalError::DocumentNotFound {
                access_key: access_key.clone(),
            })
    }
}

/// Random 8-digit code that must differ from the document number
fn numeric_code(document_number: u64) -> u32 {
    let mut rng = rand::thread_rng();
    loop {
        let code: u32 = rng.gen_range(0..=99_999_999);
        if u64::from(code) != document_number {
            return code;
        }
    }
}

fn validate_cancellation_reason(reason: &str) -> FiscalResult<String> {
    let trimmed = reason.trim();
    let length = trimmed.chars().count();
    if !(MIN_CANCELLATION_REASON..=MAX_CANCELLATION_REASON).contains(&length) {
        return Err(FiscalError::validation(format!(
            "cancellation reason must have between {MIN_CANCELLATION_REASON} and \
             {MAX_CANCELLATION_REASON} characters, got {length}"
        )));
    }
    Ok(trimmed.to_string())
}
