use crate::error::FiscalResult;
use crate::models::{SequenceKey, TenantConfig, TenantId};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Persistence for tenant configuration and allocation cursors.
///
/// The cursor for a `(tenant, series)` key is the last number handed out;
/// zero means nothing was allocated yet.
#[async_trait]
pub trait TenantStore: Send + Sync + 'static {
    async fn get_tenant(&self, tenant_id: &TenantId) -> FiscalResult<Option<TenantConfig>>;

    /// Insert or replace a tenant configuration
    async fn put_tenant(&self, config: TenantConfig) -> FiscalResult<()>;

    async fn list_tenants(&self) -> FiscalResult<Vec<TenantConfig>>;

    async fn current_cursor(&self, key: &SequenceKey) -> FiscalResult<u64>;

    /// Atomically move the cursor from `expected` to `new`.
    ///
    /// Returns `false` without writing when the persisted cursor no longer
    /// equals `expected`.
    async fn compare_and_set_cursor(
        &self,
        key: &SequenceKey,
        expected: u64,
        new: u64,
    ) -> FiscalResult<bool>;
}

#[derive(Debug, Default)]
pub struct InMemoryTenantStore {
    tenants: DashMap<TenantId, TenantConfig>,
    cursors: DashMap<SequenceKey, u64>,
}

impl InMemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TenantStore for InMemoryTenantStore {
    async fn get_tenant(&self, tenant_id: &TenantId) -> FiscalResult<Option<TenantConfig>> {
        Ok(self.tenants.get(tenant_id).map(|t| t.value().clone()))
    }

    async fn put_tenant(&self, config: TenantConfig) -> FiscalResult<()> {
        self.tenants.insert(config.tenant_id.clone(), config);
        Ok(())
    }

    async fn list_tenants(&self) -> FiscalResult<Vec<TenantConfig>> {
        let mut tenants: Vec<TenantConfig> =
            self.tenants.iter().map(|t| t.value().clone()).collect();
        tenants.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
        Ok(tenants)
    }

    async fn current_cursor(&self, key: &SequenceKey) -> FiscalResult<u64> {
        Ok(self.cursors.get(key).map(|c| *c.value()).unwrap_or(0))
    }

    async fn compare_and_set_cursor(
        &self,
        key: &SequenceKey,
        expected: u64,
        new: u64,
    ) -> FiscalResult<bool> {
        match self.cursors.entry(key.clone()) {
            Entry::Occupied(mut slot) => {
                if *slot.get() != expected {
                    return Ok(false);
                }
                slot.insert(new);
                Ok(true)
            }
            Entry::Vacant(slot) => {
                if expected != 0 {
                    return Ok(false);
                }
                slot.insert(new);
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cursor_compare_and_set() {
        let store = InMemoryTenantStore::new();
        let key = SequenceKey::new(TenantId::new("acme"), 1);

        assert_eq!(store.current_cursor(&key).await.unwrap(), 0);
        assert!(!store.compare_and_set_cursor(&key, 3, 4).await.unwrap());
        assert!(store.compare_and_set_cursor(&key, 0, 1).await.unwrap());
        assert!(!store.compare_and_set_cursor(&key, 0, 1).await.unwrap());
        assert!(store.compare_and_set_cursor(&key, 1, 2).await.unwrap());
        assert_eq!(store.current_cursor(&key).await.unwrap(), 2);

        // Other series are independent
        let other = SequenceKey::new(TenantId::new("acme"), 2);
        assert_eq!(store.current_cursor(&other).await.unwrap(), 0);
    }
}
