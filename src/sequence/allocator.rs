//! # Sequence Allocator
//!
//! Gap-free document numbering per (tenant, series). The persisted cursor is
//! the source of truth: each allocation is a compare-and-swap from the value
//! just read to its successor, retried while other callers win the race.
//! Different keys never contend with each other.

use crate::config::SequenceConfig;
use crate::constants::fiscal::{MAX_DOCUMENT_NUMBER, MAX_SERIES};
use crate::error::{FiscalError, FiscalResult};
use crate::models::{SequenceKey, TenantId};
use crate::tenancy::{TenantRegistry, TenantStore};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct SequenceAllocator {
    registry: Arc<TenantRegistry>,
    max_attempts: u32,
}

impl SequenceAllocator {
    pub fn new(registry: Arc<TenantRegistry>, config: &SequenceConfig) -> Self {
        Self {
            registry,
            max_attempts: config.max_cas_attempts.max(1),
        }
    }

    fn store(&self) -> &Arc<dyn TenantStore> {
        self.registry.store()
    }

    /// Allocate the next number for `(tenant_id, series)`.
    ///
    /// The new cursor is persisted before the number is returned.
    pub async fn next_number(&self, tenant_id: &TenantId, series: u32) -> FiscalResult<u64> {
        self.registry.ensure_active(tenant_id).await?;
        let key = Self::key(tenant_id, series)?;

        for attempt in 1..=self.max_attempts {
            let current = self.store().current_cursor(&key).await?;
            let next = current + 1;
            if next > MAX_DOCUMENT_NUMBER {
                return Err(FiscalError::SequenceExhausted {
                    tenant_id: tenant_id.clone(),
                    series,
                });
            }

            if self
                .store()
                .compare_and_set_cursor(&key, current, next)
                .await?
            {
                debug!(
                    tenant_id = %tenant_id,
                    series,
                    document_number = next,
                    attempt,
                    "Allocated document number"
                );
                return Ok(next);
            }

            tokio::task::yield_now().await;
        }

        warn!(
            tenant_id = %tenant_id,
            series,
            attempts = self.max_attempts,
            "Sequence allocation gave up under contention"
        );
        Err(FiscalError::SequenceContention {
            tenant_id: tenant_id.clone(),
            series,
            attempts: self.max_attempts,
        })
    }

    /// Number the next successful allocation would return, without
    /// reserving it
    pub async fn peek_number(&self, tenant_id: &TenantId, series: u32) -> FiscalResult<u64> {
        self.registry.ensure_active(tenant_id).await?;
        let key = Self::key(tenant_id, series)?;
        Ok(self.store().current_cursor(&key).await? + 1)
    }

    fn key(tenant_id: &TenantId, series: u32) -> FiscalResult<SequenceKey> {
        if series > MAX_SERIES {
            return Err(FiscalError::validation(format!(
                "series out of range: {series}"
            )));
        }
        Ok(SequenceKey::new(tenant_id.clone(), series))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CertificateRef, TenantConfig};
    use crate::tenancy::InMemoryTenantStore;

    async fn allocator() -> SequenceAllocator {
        let registry = Arc::new(TenantRegistry::new(Arc::new(InMemoryTenantStore::new())));
        registry
            .register(TenantConfig::new(
                "acme",
                "Acme Comercio Ltda",
                "12345678000195",
                35,
                CertificateRef::new("vault://certs/acme"),
            ))
            .await
            .unwrap();
        SequenceAllocator::new(registry, &SequenceConfig::default())
    }

    #[tokio::test]
    async fn test_numbers_start_at_one_and_increase() {
        let allocator = allocator().await;
        let tenant = TenantId::new("acme");

        assert_eq!(allocator.peek_number(&tenant, 1).await.unwrap(), 1);
        assert_eq!(allocator.next_number(&tenant, 1).await.unwrap(), 1);
        assert_eq!(allocator.next_number(&tenant, 1).await.unwrap(), 2);
        assert_eq!(allocator.peek_number(&tenant, 1).await.unwrap(), 3);

        // Series are independent
        assert_eq!(allocator.next_number(&tenant, 2).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_and_inactive_tenants_fail() {
        let allocator = allocator().await;
        let err = allocator
            .next_number(&TenantId::new("ghost"), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, FiscalError::TenantNotFound { .. }));

        let tenant = TenantId::new("acme");
        allocator.registry.set_active(&tenant, false).await.unwrap();
        let err = allocator.next_number(&tenant, 1).await.unwrap_err();
        assert!(matches!(err, FiscalError::TenantInactive { .. }));
        let err = allocator.peek_number(&tenant, 1).await.unwrap_err();
        assert!(matches!(err, FiscalError::TenantInactive { .. }));
    }

    #[tokio::test]
    async fn test_exhausted_series_is_reported() {
        let allocator = allocator().await;
        let tenant = TenantId::new("acme");
        let key = SequenceKey::new(tenant.clone(), 1);
        allocator
            .store()
            .compare_and_set_cursor(&key, 0, MAX_DOCUMENT_NUMBER)
            .await
            .unwrap();

        let err = allocator.next_number(&tenant, 1).await.unwrap_err();
        assert!(matches!(err, FiscalError::SequenceExhausted { .. }));
    }
}
