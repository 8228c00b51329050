//! # Tenant Registry
//!
//! Read-through cache over the [`TenantStore`]. Dispatch consults the cache
//! on every request, so administrative changes must invalidate it before
//! they return.
//!
//! Invalidation is generation-guarded: a reader records the generation before
//! loading from the store and only populates the cache if no mutation bumped
//! the generation in the meantime. A slow reader therefore cannot re-insert a
//! snapshot that predates a mutation.

use super::store::TenantStore;
use crate::error::{FiscalError, FiscalResult};
use crate::models::{CertificateRef, FiscalEnvironment, TenantConfig, TenantId};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

pub struct TenantRegistry {
    store: Arc<dyn TenantStore>,
    cache: RwLock<CacheState>,
}

#[derive(Default)]
struct CacheState {
    generation: u64,
    entries: HashMap<TenantId, Arc<TenantConfig>>,
}

impl std::fmt::Debug for TenantRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cache = self.cache.read();
        f.debug_struct("TenantRegistry")
            .field("generation", &cache.generation)
            .field("cached_tenants", &cache.entries.len())
            .finish()
    }
}

impl TenantRegistry {
    pub fn new(store: Arc<dyn TenantStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(CacheState::default()),
        }
    }

    pub fn store(&self) -> &Arc<dyn TenantStore> {
        &self.store
    }

    /// Current snapshot of a tenant, loading it on a cache miss
    pub async fn get(&self, tenant_id: &TenantId) -> FiscalResult<Arc<TenantConfig>> {
        let generation = {
            let cache = self.cache.read();
            if let Some(config) = cache.entries.get(tenant_id) {
                return Ok(config.clone());
            }
            cache.generation
        };

        let config = self
            .store
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| FiscalError::TenantNotFound {
                tenant_id: tenant_id.clone(),
            })?;
        let config = Arc::new(config);

        let mut cache = self.cache.write();
        if cache.generation == generation {
            cache.entries.insert(tenant_id.clone(), config.clone());
        } else {
            debug!(tenant_id = %tenant_id, "Skipping stale tenant snapshot");
        }
        Ok(config)
    }

    /// Snapshot of an active tenant; inactive tenants are refused
    pub async fn ensure_active(&self, tenant_id: &TenantId) -> FiscalResult<Arc<TenantConfig>> {
        let config = self.get(tenant_id).await?;
        if !config.active {
            return Err(FiscalError::TenantInactive {
                tenant_id: tenant_id.clone(),
            });
        }
        Ok(config)
    }

    /// Register a new tenant (or replace an existing one)
    pub async fn register(&self, config: TenantConfig) -> FiscalResult<()> {
        let tenant_id = config.tenant_id.clone();
        self.write_through(config).await?;
        info!(tenant_id = %tenant_id, "Tenant registered");
        Ok(())
    }

    /// Apply an administrative change to an existing tenant
    pub async fn update<F>(&self, tenant_id: &TenantId, change: F) -> FiscalResult<Arc<TenantConfig>>
    where
        F: FnOnce(&mut TenantConfig) + Send,
    {
        let mut config = self
            .store
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| FiscalError::TenantNotFound {
                tenant_id: tenant_id.clone(),
            })?;
        change(&mut config);
        // Identity is not administrable
        config.tenant_id = tenant_id.clone();
        config.updated_at = Utc::now();

        let snapshot = Arc::new(config.clone());
        self.write_through(config).await?;
        Ok(snapshot)
    }

    pub async fn set_active(&self, tenant_id: &TenantId, active: bool) -> FiscalResult<()> {
        self.update(tenant_id, |config| config.active = active)
            .await?;
        info!(tenant_id = %tenant_id, active, "Tenant activation changed");
        Ok(())
    }

    pub async fn rotate_certificate(
        &self,
        tenant_id: &TenantId,
        certificate: CertificateRef,
    ) -> FiscalResult<()> {
        self.update(tenant_id, |config| config.certificate = certificate)
            .await?;
        info!(tenant_id = %tenant_id, "Tenant certificate rotated");
        Ok(())
    }

    pub async fn set_environment(
        &self,
        tenant_id: &TenantId,
        environment: FiscalEnvironment,
    ) -> FiscalResult<()> {
        self.update(tenant_id, |config| config.environment = environment)
            .await?;
        info!(tenant_id = %tenant_id, environment = %environment, "Tenant environment changed");
        Ok(())
    }

    /// Drop every cached snapshot
    pub fn invalidate_all(&self) {
        let mut cache = self.cache.write();
        cache.generation += 1;
        cache.entries.clear();
    }

    pub fn generation(&self) -> u64 {
        self.cache.read().generation
    }

    async fn write_through(&self, config: TenantConfig) -> FiscalResult<()> {
        let tenant_id = config.tenant_id.clone();
        self.store.put_tenant(config).await?;

        let mut cache = self.cache.write();
        cache.generation += 1;
        cache.entries.remove(&tenant_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenancy::InMemoryTenantStore;

    fn acme() -> TenantConfig {
        TenantConfig::new(
            "acme",
            "Acme Comercio Ltda",
            "12345678000195",
            35,
            CertificateRef::new("vault://certs/acme/2024"),
        )
    }

    #[tokio::test]
    async fn test_unknown_tenant_is_not_found() {
        let registry = TenantRegistry::new(Arc::new(InMemoryTenantStore::new()));
        let err = registry.get(&TenantId::new("ghost")).await.unwrap_err();
        assert!(matches!(err, FiscalError::TenantNotFound { .. }));
    }

    #[tokio::test]
    async fn test_deactivation_is_visible_immediately() {
        let registry = TenantRegistry::new(Arc::new(InMemoryTenantStore::new()));
        registry.register(acme()).await.unwrap();
        let tenant_id = TenantId::new("acme");

        // Warm the cache
        assert!(registry.ensure_active(&tenant_id).await.is_ok());

        registry.set_active(&tenant_id, false).await.unwrap();
        let err = registry.ensure_active(&tenant_id).await.unwrap_err();
        assert!(matches!(err, FiscalError::TenantInactive { .. }));
    }

    #[tokio::test]
    async fn test_certificate_rotation_invalidates_cache() {
        let registry = TenantRegistry::new(Arc::new(InMemoryTenantStore::new()));
        registry.register(acme()).await.unwrap();
        let tenant_id = TenantId::new("acme");
        let before = registry.get(&tenant_id).await.unwrap();
        let generation = registry.generation();

        registry
            .rotate_certificate(&tenant_id, CertificateRef::new("vault://certs/acme/2025"))
            .await
            .unwrap();

        assert!(registry.generation() > generation);
        let after = registry.get(&tenant_id).await.unwrap();
        assert_eq!(before.certificate.as_str(), "vault://certs/acme/2024");
        assert_eq!(after.certificate.as_str(), "vault://certs/acme/2025");
    }
}
