//! # Orchestrator Bootstrap
//!
//! Wires the components from one validated configuration and the external
//! collaborators (stores, transport, authority client). The same wiring is
//! used by deployments and by the integration tests.

use super::authority::AuthorityClient;
use super::dispatcher::Dispatcher;
use super::emission_service::EmissionService;
use super::retry_scheduler::RetryScheduler;
use super::worker_pool::WorkerPool;
use crate::config::FiscalConfig;
use crate::error::FiscalResult;
use crate::events::EventPublisher;
use crate::messaging::Transport;
use crate::routing::QueueRouter;
use crate::sequence::SequenceAllocator;
use crate::status::StatusStore;
use crate::tenancy::{TenantRegistry, TenantStore};
use std::sync::Arc;
use tracing::info;

/// External collaborators the orchestrator is built on
pub struct Collaborators {
    pub tenant_store: Arc<dyn TenantStore>,
    pub status_store: Arc<dyn StatusStore>,
    pub transport: Arc<dyn Transport>,
    pub authority: Arc<dyn AuthorityClient>,
    pub events: EventPublisher,
}

/// Fully wired orchestrator
pub struct FiscalOrchestrator {
    pub registry: Arc<TenantRegistry>,
    pub router: Arc<QueueRouter>,
    pub allocator: Arc<SequenceAllocator>,
    pub dispatcher: Arc<Dispatcher>,
    pub retry: Arc<RetryScheduler>,
    pub workers: Arc<WorkerPool>,
    pub service: EmissionService,
    pub events: EventPublisher,
}

impl std::fmt::Debug for FiscalOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FiscalOrchestrator")
            .field("router", &self.router)
            .field("workers", &self.workers)
            .finish()
    }
}

impl FiscalOrchestrator {
    /// Validate `config`, build every component and declare the queues
    pub async fn bootstrap(
        config: &FiscalConfig,
        collaborators: Collaborators,
    ) -> FiscalResult<Self> {
        config.validate()?;

        let Collaborators {
            tenant_store,
            status_store,
            transport,
            authority,
            events,
        } = collaborators;

        let registry = Arc::new(TenantRegistry::new(tenant_store));
        let router = Arc::new(QueueRouter::from_config(&config.queues, &config.priorities));
        let allocator = Arc::new(SequenceAllocator::new(registry.clone(), &config.sequence));
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            router.clone(),
            status_store,
            transport,
            events.clone(),
            &config.dispatcher,
        ));
        dispatcher.declare_queues().await?;

        let retry = Arc::new(RetryScheduler::new(&config.retry, events.clone()));
        let workers = Arc::new(WorkerPool::new(
            dispatcher.clone(),
            retry.clone(),
            authority,
            &config.worker,
        ));
        let service = EmissionService::new(allocator.clone(), dispatcher.clone());

        info!(
            work_queues = router.work_queues().len(),
            business_exhaustion = ?config.retry.business_exhaustion,
            "✅ BOOTSTRAP: Fiscal orchestrator ready"
        );

        Ok(Self {
            registry,
            router,
            allocator,
            dispatcher,
            retry,
            workers,
            service,
            events,
        })
    }
}
