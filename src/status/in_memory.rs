//! # In-Memory Status Store
//!
//! `DashMap`-backed store for tests and single-process deployments. The
//! shard lock held by `get_mut` provides the per-document atomicity.

use super::errors::{StatusStoreError, StatusStoreResult};
use super::mutation::{apply_mutation, StatusMutation, StatusUpdate};
use super::store::StatusStore;
use crate::models::{AccessKey, CorrelationId, DocumentStatusRecord, TenantId};
use crate::state_machine::DocumentState;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct InMemoryStatusStore {
    records: DashMap<AccessKey, DocumentStatusRecord>,
    /// correlation id -> owning document
    correlations: DashMap<CorrelationId, AccessKey>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records (for testing)
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn create(&self, record: DocumentStatusRecord) -> StatusStoreResult<()> {
        let correlation_id = record.correlation_id;
        let access_key = record.access_key.clone();

        let operations: Vec<_> = record.operations.iter().map(|op| op.correlation_id).collect();

        match self.records.entry(access_key.clone()) {
            Entry::Occupied(_) => return Err(StatusStoreError::DuplicateAccessKey { access_key }),
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
        }
        for operation in operations {
            self.correlations.insert(operation, access_key.clone());
        }
        self.correlations.insert(correlation_id, access_key);
        Ok(())
    }

    async fn get(&self, access_key: &AccessKey) -> StatusStoreResult<Option<DocumentStatusRecord>> {
        Ok(self.records.get(access_key).map(|r| r.value().clone()))
    }

    async fn find_by_correlation(
        &self,
        correlation_id: &CorrelationId,
    ) -> StatusStoreResult<Option<DocumentStatusRecord>> {
        let access_key = match self.correlations.get(correlation_id) {
            Some(key) => key.value().clone(),
            None => return Ok(None),
        };
        self.get(&access_key).await
    }

    async fn update(
        &self,
        access_key: &AccessKey,
        mutation: StatusMutation,
    ) -> StatusStoreResult<StatusUpdate> {
        let update = {
            let mut entry = self.records.get_mut(access_key).ok_or_else(|| {
                StatusStoreError::DocumentNotFound {
                    access_key: access_key.clone(),
                }
            })?;
            let mut next = entry.value().clone();
            let transitions = apply_mutation(&mut next, &mutation)?;
            *entry.value_mut() = next.clone();
            StatusUpdate {
                record: next,
                transitions,
            }
        };

        for correlation_id in mutation.appended_operations() {
            self.correlations.insert(correlation_id, access_key.clone());
        }

        Ok(update)
    }

    async fn list_by_state(
        &self,
        tenant_id: &TenantId,
        state: DocumentState,
    ) -> StatusStoreResult<Vec<DocumentStatusRecord>> {
        let mut records: Vec<DocumentStatusRecord> = self
            .records
            .iter()
            .filter(|r| &r.tenant_id == tenant_id && r.state == state)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| (a.series, a.document_number).cmp(&(b.series, b.document_number)));
        Ok(records)
    }
}
