use super::errors::StatusStoreResult;
use super::mutation::{StatusMutation, StatusUpdate};
use crate::models::{AccessKey, CorrelationId, DocumentStatusRecord, TenantId};
use crate::state_machine::DocumentState;
use async_trait::async_trait;

/// Durable record of every document's lifecycle.
///
/// Implementations must make `update` an atomic read-modify-write per
/// document: two concurrent mutations of the same access key serialize, and
/// a mutation rejected by the state machine leaves the stored record as it
/// was.
#[async_trait]
pub trait StatusStore: Send + Sync + 'static {
    /// Insert a new record; fails if the access key is already known
    async fn create(&self, record: DocumentStatusRecord) -> StatusStoreResult<()>;

    async fn get(&self, access_key: &AccessKey) -> StatusStoreResult<Option<DocumentStatusRecord>>;

    /// Record owning the emission or sub-operation with this correlation id
    async fn find_by_correlation(
        &self,
        correlation_id: &CorrelationId,
    ) -> StatusStoreResult<Option<DocumentStatusRecord>>;

    async fn update(
        &self,
        access_key: &AccessKey,
        mutation: StatusMutation,
    ) -> StatusStoreResult<StatusUpdate>;

    async fn list_by_state(
        &self,
        tenant_id: &TenantId,
        state: DocumentState,
    ) -> StatusStoreResult<Vec<DocumentStatusRecord>>;
}
