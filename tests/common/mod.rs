//! Shared fixtures for the integration tests: a scripted authority, an event
//! collector and an in-memory orchestrator harness.

#![allow(dead_code)]

use async_trait::async_trait;
use fiscal_core::config::FiscalConfig;
use fiscal_core::events::{EventPublisher, EventSink, PublishedEvent};
use fiscal_core::messaging::InMemoryTransport;
use fiscal_core::models::{
    AccessKey, CertificateRef, DocumentStatusRecord, Operation, TenantConfig, TenantId,
};
use fiscal_core::orchestration::{
    AuthorityClient, AuthorityError, AuthorityReceipt, AuthorityRequest, Collaborators,
    FiscalOrchestrator,
};
use fiscal_core::status::{InMemoryStatusStore, StatusStore};
use fiscal_core::tenancy::InMemoryTenantStore;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

pub const TENANT: &str = "acme";
pub const ISSUER_TAX_ID: &str = "12345678000195";

/// What the scripted authority does on one call
#[derive(Debug, Clone)]
pub enum Step {
    Authorize(&'static str),
    Reject(&'static str),
    Technical,
    Panic,
    /// Never answers within any invocation timeout
    Hang,
}

/// Authority client answering from a script; once the script runs out it
/// keeps repeating `fallback`
pub struct ScriptedAuthority {
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: Mutex<Vec<AuthorityRequest>>,
}

impl ScriptedAuthority {
    pub fn new(script: Vec<Step>) -> Self {
        Self::with_fallback(script, Step::Authorize("135240000000001"))
    }

    pub fn with_fallback(script: Vec<Step>, fallback: Step) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<AuthorityRequest> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl AuthorityClient for ScriptedAuthority {
    async fn submit(&self, request: AuthorityRequest) -> Result<AuthorityReceipt, AuthorityError> {
        self.calls.lock().push(request);
        let step = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match step {
            Step::Authorize(protocol) => Ok(AuthorityReceipt::authorized(protocol)),
            Step::Reject(code) => Err(AuthorityError::rejection(code, "rejected by authority")),
            Step::Technical => Err(AuthorityError::technical("connection reset by peer")),
            Step::Panic => panic!("certificate store corrupted"),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(AuthorityReceipt::default())
            }
        }
    }
}

/// Sink keeping every published event name
#[derive(Default)]
pub struct CollectingSink(Mutex<Vec<PublishedEvent>>);

impl CollectingSink {
    pub fn names(&self) -> Vec<&'static str> {
        self.0.lock().iter().map(|e| e.name).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.0.lock().iter().filter(|e| e.name == name).count()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: &PublishedEvent) {
        self.0.lock().push(event.clone());
    }
}

/// Defaults with short delays and three emission attempts
pub fn test_config() -> FiscalConfig {
    let mut config = FiscalConfig::default();
    config.retry.base_delay_ms = 5;
    config.retry.max_delay_ms = 50;
    config.retry.max_retries.emit = 3;
    config.priorities.high.invocation_timeout_ms = 50;
    config.priorities.normal.invocation_timeout_ms = 100;
    config.priorities.low.invocation_timeout_ms = 200;
    config.worker.poll_interval_ms = 5;
    config.worker.visibility_timeout_ms = 5_000;
    config.worker.shutdown_timeout_ms = 1_000;
    config
}

pub fn tenant_config() -> TenantConfig {
    TenantConfig::new(
        TENANT,
        "Acme Comercio Ltda",
        ISSUER_TAX_ID,
        35,
        CertificateRef::new("vault://certs/acme"),
    )
}

pub struct Harness {
    pub orchestrator: FiscalOrchestrator,
    pub transport: Arc<InMemoryTransport>,
    pub status: Arc<InMemoryStatusStore>,
    pub authority: Arc<ScriptedAuthority>,
    pub sink: Arc<CollectingSink>,
    pub tenant: TenantId,
}

impl Harness {
    pub async fn new(script: Vec<Step>) -> Self {
        Self::with_authority(test_config(), ScriptedAuthority::new(script)).await
    }

    pub async fn with_config(config: FiscalConfig, script: Vec<Step>) -> Self {
        Self::with_authority(config, ScriptedAuthority::new(script)).await
    }

    pub async fn with_authority(config: FiscalConfig, authority: ScriptedAuthority) -> Self {
        let transport = Arc::new(InMemoryTransport::new());
        let status = Arc::new(InMemoryStatusStore::new());
        let authority = Arc::new(authority);
        let sink = Arc::new(CollectingSink::default());

        let orchestrator = FiscalOrchestrator::bootstrap(
            &config,
            Collaborators {
                tenant_store: Arc::new(InMemoryTenantStore::new()),
                status_store: status.clone(),
                transport: transport.clone(),
                authority: authority.clone(),
                events: EventPublisher::new(256).with_sink(sink.clone()),
            },
        )
        .await
        .expect("bootstrap");

        orchestrator
            .registry
            .register(tenant_config())
            .await
            .expect("register tenant");

        Self {
            orchestrator,
            transport,
            status,
            authority,
            sink,
            tenant: TenantId::new(TENANT),
        }
    }

    /// Run polling passes, releasing scheduled retries between them, until
    /// a pass finds nothing to do. Returns the deliveries handled.
    pub async fn drain(&self) -> usize {
        let mut handled = 0;
        for _ in 0..64 {
            for descriptor in self.orchestrator.router.work_queues() {
                self.transport.release_all(&descriptor.queue_name).await;
            }
            let pass = self.orchestrator.workers.run_once().await;
            if pass == 0 {
                return handled;
            }
            handled += pass;
        }
        panic!("queues did not drain after 64 passes");
    }

    pub async fn record(&self, access_key: &AccessKey) -> DocumentStatusRecord {
        self.status
            .get(access_key)
            .await
            .expect("status store")
            .expect("record exists")
    }

    pub async fn dead_letters(&self, operation: Operation) -> usize {
        let queue = &self.orchestrator.router.dead_letter_for(operation).queue_name;
        self.transport.queue_length(queue).await
    }
}
