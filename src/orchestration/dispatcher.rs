//! # Dispatcher
//!
//! Publishes logical operations into their priority queues.
//!
//! The dispatcher never allocates document numbers: an emission arrives with
//! its access key already built, so republishing it can never consume a
//! second number. Publish failures are surfaced to the caller, never retried
//! here.

use crate::config::DispatcherConfig;
use crate::error::{FiscalError, FiscalResult};
use crate::events::{EventPublisher, OrchestrationEvent};
use crate::logging::{log_dispatch_operation, log_error};
use crate::messaging::{DeadLetterAnnotation, MessageId, MessagePayload, QueueMessage, Transport};
use crate::models::{
    AccessKey, CorrelationId, DocumentDraft, DocumentStatusRecord, Operation, OperationRecord,
    Priority, TenantId,
};
use crate::routing::{QueueDescriptor, QueueRouter};
use crate::state_machine::{DocumentState, OperationEvent, StateMachineError};
use crate::status::{StatusMutation, StatusStore, StatusStoreError};
use crate::tenancy::TenantRegistry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct Dispatcher {
    registry: Arc<TenantRegistry>,
    router: Arc<QueueRouter>,
    status: Arc<dyn StatusStore>,
    transport: Arc<dyn Transport>,
    events: EventPublisher,
    publish_timeout: Duration,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("router", &self.router)
            .field("publish_timeout", &self.publish_timeout)
            .finish()
    }
}

impl Dispatcher {
    pub fn new(
        registry: Arc<TenantRegistry>,
        router: Arc<QueueRouter>,
        status: Arc<dyn StatusStore>,
        transport: Arc<dyn Transport>,
        events: EventPublisher,
        config: &DispatcherConfig,
    ) -> Self {
        Self {
            registry,
            router,
            status,
            transport,
            events,
            publish_timeout: config.publish_timeout(),
        }
    }

    pub fn router(&self) -> &Arc<QueueRouter> {
        &self.router
    }

    pub fn registry(&self) -> &Arc<TenantRegistry> {
        &self.registry
    }

    pub fn status_store(&self) -> &Arc<dyn StatusStore> {
        &self.status
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    /// Declare every work and dead-letter queue (idempotent)
    pub async fn declare_queues(&self) -> FiscalResult<()> {
        for descriptor in self.router.descriptors() {
            self.transport.declare_queue(descriptor).await?;
            debug!(queue_name = %descriptor.queue_name, "Declared queue");
        }
        info!(
            queue_count = self.router.descriptors().len(),
            "✅ DISPATCHER: Queues declared"
        );
        Ok(())
    }

    /// Fail fast on a missing route before anything is allocated
    pub fn check_route(&self, operation: Operation, priority: Priority) -> FiscalResult<()> {
        self.router.resolve(operation, priority).map(|_| ())
    }

    /// Create the `PENDING` record for `draft` and publish its emission.
    ///
    /// On a publish failure the record stays `PENDING` with no message in
    /// flight; [`Dispatcher::republish_pending`] resubmits it under the same
    /// correlation id.
    pub async fn enqueue_emission(
        &self,
        tenant_id: &TenantId,
        draft: DocumentDraft,
        priority: Priority,
    ) -> FiscalResult<CorrelationId> {
        self.registry.ensure_active(tenant_id).await?;
        validate_draft(&draft)?;
        let descriptor = self.router.resolve(Operation::Emit, priority)?;
        let profile = self.router.profile_for(priority);

        let payload = MessagePayload::Emission {
            access_key: draft.access_key.clone(),
            document_number: draft.document_number,
            series: draft.series,
            xml: draft.submitted_xml.clone(),
        };
        let message = QueueMessage::new(tenant_id.clone(), priority, payload, profile.ttl);
        let access_key = draft.access_key.clone();

        self.status
            .create(DocumentStatusRecord::pending(
                tenant_id.clone(),
                draft,
                message.correlation_id,
                priority,
            ))
            .await?;

        self.publish_work(descriptor, &message).await?;
        self.events.publish(OrchestrationEvent::DocumentSubmitted {
            tenant_id: tenant_id.clone(),
            access_key,
            correlation_id: message.correlation_id,
            operation: Operation::Emit,
            priority,
        });

        Ok(message.correlation_id)
    }

    /// Publish a fresh message for an emission still in `PENDING`, keeping
    /// the record's correlation id
    pub async fn republish_pending(
        &self,
        tenant_id: &TenantId,
        access_key: &AccessKey,
    ) -> FiscalResult<CorrelationId> {
        self.registry.ensure_active(tenant_id).await?;
        let record = self.owned_record(tenant_id, access_key).await?;
        if record.state != DocumentState::Pending {
            return Err(FiscalError::validation(format!(
                "document {access_key} is {} and cannot be republished",
                record.state
            )));
        }

        let descriptor = self.router.resolve(Operation::Emit, record.priority)?;
        let profile = self.router.profile_for(record.priority);
        let mut message = QueueMessage::new(
            tenant_id.clone(),
            record.priority,
            MessagePayload::Emission {
                access_key: record.access_key.clone(),
                document_number: record.document_number,
                series: record.series,
                xml: record.submitted_xml.clone(),
            },
            profile.ttl,
        );
        message.correlation_id = record.correlation_id;

        self.publish_work(descriptor, &message).await?;
        Ok(record.correlation_id)
    }

    /// Ask the authority for the document's current status
    pub async fn enqueue_query(
        &self,
        tenant_id: &TenantId,
        access_key: &AccessKey,
        priority: Priority,
    ) -> FiscalResult<CorrelationId> {
        self.registry.ensure_active(tenant_id).await?;
        self.owned_record(tenant_id, access_key).await?;
        self.enqueue_operation(
            tenant_id,
            MessagePayload::Query {
                access_key: access_key.clone(),
            },
            priority,
        )
        .await
    }

    /// Register an authority event against an authorized document
    pub async fn enqueue_event(
        &self,
        tenant_id: &TenantId,
        access_key: &AccessKey,
        event_type: impl Into<String>,
        sequence: u32,
        xml: impl Into<String>,
        priority: Priority,
    ) -> FiscalResult<CorrelationId> {
        self.registry.ensure_active(tenant_id).await?;
        let record = self.owned_record(tenant_id, access_key).await?;
        require_authorized(&record, Operation::Event)?;

        self.enqueue_operation(
            tenant_id,
            MessagePayload::Event {
                access_key: access_key.clone(),
                event_type: event_type.into(),
                sequence,
                xml: xml.into(),
            },
            priority,
        )
        .await
    }

    /// Cancel an authorized document through the VOID pipeline
    pub async fn enqueue_void(
        &self,
        tenant_id: &TenantId,
        access_key: &AccessKey,
        reason: impl Into<String>,
        priority: Priority,
    ) -> FiscalResult<CorrelationId> {
        self.registry.ensure_active(tenant_id).await?;
        let record = self.owned_record(tenant_id, access_key).await?;
        require_authorized(&record, Operation::Void)?;
        if record.has_open_operation(Operation::Void) {
            return Err(FiscalError::validation(format!(
                "document {access_key} already has a void in flight"
            )));
        }
        let protocol_number = record.protocol_number.clone().ok_or_else(|| {
            FiscalError::validation(format!("document {access_key} has no protocol number"))
        })?;

        self.enqueue_operation(
            tenant_id,
            MessagePayload::Void {
                access_key: access_key.clone(),
                protocol_number,
                reason: reason.into(),
            },
            priority,
        )
        .await
    }

    /// Publish the next attempt of `message` after `delay`
    pub async fn redeliver(
        &self,
        message: &QueueMessage,
        delay: Duration,
    ) -> FiscalResult<QueueMessage> {
        let descriptor = self.router.resolve(message.operation, message.priority)?;
        let ttl = self.router.profile_for(message.priority).ttl;
        let retry = message.for_retry(delay, ttl);
        self.publish_work(descriptor, &retry).await?;
        Ok(retry)
    }

    /// Park `message` in its operation's dead-letter queue, unmodified apart
    /// from the failure annotation
    pub async fn dead_letter(
        &self,
        message: &QueueMessage,
        annotation: DeadLetterAnnotation,
    ) -> FiscalResult<MessageId> {
        let descriptor = self.router.dead_letter_for(message.operation);
        let reason = annotation.reason.clone();
        let parked = message.for_dead_letter(annotation);
        let message_id = self.publish_with_timeout(descriptor, &parked).await?;

        warn!(
            correlation_id = %message.correlation_id,
            tenant_id = %message.tenant_id,
            operation = %message.operation,
            queue_name = %descriptor.queue_name,
            reason = %reason,
            "☠️ DISPATCHER: Message dead-lettered"
        );
        self.events.publish(OrchestrationEvent::DeadLettered {
            tenant_id: message.tenant_id.clone(),
            correlation_id: message.correlation_id,
            operation: message.operation,
            queue_name: descriptor.queue_name.clone(),
            reason,
        });
        Ok(message_id)
    }

    async fn enqueue_operation(
        &self,
        tenant_id: &TenantId,
        payload: MessagePayload,
        priority: Priority,
    ) -> FiscalResult<CorrelationId> {
        let operation = payload.operation();
        let descriptor = self.router.resolve(operation, priority)?;
        let profile = self.router.profile_for(priority);
        let access_key = payload.access_key().clone();
        let message = QueueMessage::new(tenant_id.clone(), priority, payload, profile.ttl);

        self.status
            .update(
                &access_key,
                StatusMutation::AppendOperation(OperationRecord::pending(
                    message.correlation_id,
                    operation,
                    priority,
                )),
            )
            .await
            .map_err(|error| match error {
                StatusStoreError::Transition(
                    inner @ (StateMachineError::OperationInFlight { .. }
                    | StateMachineError::NotAuthorized { .. }),
                ) => FiscalError::validation(inner.to_string()),
                other => other.into(),
            })?;

        if let Err(error) = self.publish_work(descriptor, &message).await {
            // A stranded PENDING sub-record would block later operations
            let expired = self
                .status
                .update(
                    &access_key,
                    StatusMutation::operation(
                        message.correlation_id,
                        OperationEvent::Expire {
                            reason: format!("dispatch failed: {error}"),
                        },
                    ),
                )
                .await;
            if let Err(expire_error) = expired {
                log_error(
                    "dispatcher",
                    "expire_undispatched_operation",
                    &expire_error.to_string(),
                    Some(&message.correlation_id.to_string()),
                );
            }
            return Err(error);
        }

        self.events.publish(OrchestrationEvent::DocumentSubmitted {
            tenant_id: tenant_id.clone(),
            access_key,
            correlation_id: message.correlation_id,
            operation,
            priority,
        });
        Ok(message.correlation_id)
    }

    async fn owned_record(
        &self,
        tenant_id: &TenantId,
        access_key: &AccessKey,
    ) -> FiscalResult<DocumentStatusRecord> {
        let record = self
            .status
            .get(access_key)
            .await?
            .ok_or_else(|| FiscalError::DocumentNotFound {
                access_key: access_key.clone(),
            })?;
        if &record.tenant_id != tenant_id {
            return Err(FiscalError::TenantMismatch {
                access_key: access_key.clone(),
            });
        }
        Ok(record)
    }

    async fn publish_work(
        &self,
        descriptor: &QueueDescriptor,
        message: &QueueMessage,
    ) -> FiscalResult<MessageId> {
        let message_id = self.publish_with_timeout(descriptor, message).await?;

        log_dispatch_operation(
            message.operation,
            &message.tenant_id,
            message.correlation_id,
            &descriptor.queue_name,
            message.retry_count,
            "published",
        );
        self.events.publish(OrchestrationEvent::MessageDispatched {
            tenant_id: message.tenant_id.clone(),
            correlation_id: message.correlation_id,
            message_id: message_id.to_string(),
            operation: message.operation,
            queue_name: descriptor.queue_name.clone(),
            retry_count: message.retry_count,
        });
        Ok(message_id)
    }

    /// A timeout is reported as a dispatch failure even though the broker may
    /// have accepted the message; consumers deduplicate on correlation id
    async fn publish_with_timeout(
        &self,
        descriptor: &QueueDescriptor,
        message: &QueueMessage,
    ) -> FiscalResult<MessageId> {
        match tokio::time::timeout(
            self.publish_timeout,
            self.transport.publish(descriptor, message),
        )
        .await
        {
            Ok(Ok(message_id)) => Ok(message_id),
            Ok(Err(error)) => {
                log_dispatch_operation(
                    message.operation,
                    &message.tenant_id,
                    message.correlation_id,
                    &descriptor.queue_name,
                    message.retry_count,
                    "failed",
                );
                Err(FiscalError::Dispatch {
                    operation: message.operation,
                    queue_name: descriptor.queue_name.clone(),
                    reason: error.to_string(),
                })
            }
            Err(_) => {
                log_dispatch_operation(
                    message.operation,
                    &message.tenant_id,
                    message.correlation_id,
                    &descriptor.queue_name,
                    message.retry_count,
                    "timed_out",
                );
                Err(FiscalError::DispatchTimeout {
                    operation: message.operation,
                    queue_name: descriptor.queue_name.clone(),
                    timeout: self.publish_timeout,
                })
            }
        }
    }
}

/// The draft's number and series must be the ones encoded in its key
fn validate_draft(draft: &DocumentDraft) -> FiscalResult<()> {
    if draft.access_key.document_number() != draft.document_number {
        return Err(FiscalError::validation(format!(
            "access key {} does not encode document number {}",
            draft.access_key, draft.document_number
        )));
    }
    if draft.access_key.series() != draft.series {
        return Err(FiscalError::validation(format!(
            "access key {} does not encode series {}",
            draft.access_key, draft.series
        )));
    }
    Ok(())
}

fn require_authorized(record: &DocumentStatusRecord, operation: Operation) -> FiscalResult<()> {
    if record.state == DocumentState::Authorized {
        Ok(())
    } else {
        Err(FiscalError::validation(format!(
            "{operation} requires an authorized document, {} is {}",
            record.access_key, record.state
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FiscalConfig;
    use crate::messaging::InMemoryTransport;
    use crate::models::{AccessKeyParts, CertificateRef, TenantConfig};
    use crate::state_machine::OperationState;
    use crate::status::InMemoryStatusStore;
    use crate::tenancy::InMemoryTenantStore;
    use chrono::{TimeZone, Utc};

    struct Fixture {
        dispatcher: Dispatcher,
        transport: Arc<InMemoryTransport>,
        status: Arc<InMemoryStatusStore>,
        registry: Arc<TenantRegistry>,
    }

    async fn fixture() -> Fixture {
        let config = FiscalConfig::default();
        let registry = Arc::new(TenantRegistry::new(Arc::new(InMemoryTenantStore::new())));
        registry
            .register(TenantConfig::new(
                "acme",
                "Acme Ltda",
                "12345678000195",
                35,
                CertificateRef::new("vault://acme"),
            ))
            .await
            .unwrap();
        let router = Arc::new(QueueRouter::from_config(&config.queues, &config.priorities));
        let status = Arc::new(InMemoryStatusStore::new());
        let transport = Arc::new(InMemoryTransport::new());
        let dispatcher = Dispatcher::new(
            registry.clone(),
            router,
            status.clone(),
            transport.clone(),
            EventPublisher::default(),
            &config.dispatcher,
        );
        dispatcher.declare_queues().await.unwrap();
        Fixture {
            dispatcher,
            transport,
            status,
            registry,
        }
    }

    fn draft(number: u64) -> DocumentDraft {
        let issued_at = Utc.with_ymd_and_hms(2024, 10, 1, 12, 0, 0).unwrap();
        let access_key = AccessKey::build(&AccessKeyParts {
            state_code: 35,
            issued_at,
            issuer_tax_id: "12345678000195".to_string(),
            model: 55,
            series: 1,
            document_number: number,
            emission_type: 1,
            numeric_code: 12_345_678,
        })
        .unwrap();
        DocumentDraft {
            access_key,
            document_number: number,
            series: 1,
            issued_at,
            submitted_xml: "<NFe/>".to_string(),
        }
    }

    #[tokio::test]
    async fn test_enqueue_emission_creates_pending_record_and_publishes() {
        let fx = fixture().await;
        let tenant = TenantId::new("acme");
        let draft = draft(1);
        let key = draft.access_key.clone();

        let correlation_id = fx
            .dispatcher
            .enqueue_emission(&tenant, draft, Priority::High)
            .await
            .unwrap();

        let record = fx.status.get(&key).await.unwrap().unwrap();
        assert_eq!(record.state, DocumentState::Pending);
        assert_eq!(record.correlation_id, correlation_id);
        assert_eq!(fx.transport.queue_length("fiscal.emit.high").await, 1);
    }

    #[tokio::test]
    async fn test_unavailable_transport_leaves_record_pending() {
        let fx = fixture().await;
        fx.transport.set_available(false);
        let draft = draft(2);
        let key = draft.access_key.clone();

        let err = fx
            .dispatcher
            .enqueue_emission(&TenantId::new("acme"), draft, Priority::Normal)
            .await
            .unwrap_err();
        assert!(matches!(err, FiscalError::Dispatch { .. }));
        assert!(err.is_retryable());

        let record = fx.status.get(&key).await.unwrap().unwrap();
        assert_eq!(record.state, DocumentState::Pending);

        fx.transport.set_available(true);
        let correlation_id = fx
            .dispatcher
            .republish_pending(&TenantId::new("acme"), &key)
            .await
            .unwrap();
        assert_eq!(correlation_id, record.correlation_id);
        assert_eq!(fx.transport.queue_length("fiscal.emit.normal").await, 1);
    }

    #[tokio::test]
    async fn test_inactive_tenant_is_refused_before_any_state() {
        let fx = fixture().await;
        let tenant = TenantId::new("acme");
        fx.registry.set_active(&tenant, false).await.unwrap();

        let err = fx
            .dispatcher
            .enqueue_emission(&tenant, draft(3), Priority::High)
            .await
            .unwrap_err();
        assert!(matches!(err, FiscalError::TenantInactive { .. }));
        assert!(fx.status.is_empty());
    }

    #[tokio::test]
    async fn test_unrouted_pair_fails_before_any_state() {
        let fx = fixture().await;
        let draft = draft(4);
        let key = draft.access_key.clone();
        fx.dispatcher
            .enqueue_emission(&TenantId::new("acme"), draft, Priority::Low)
            .await
            .unwrap();

        // Queries are routed on normal and low only
        let err = fx
            .dispatcher
            .enqueue_query(&TenantId::new("acme"), &key, Priority::High)
            .await
            .unwrap_err();
        assert!(matches!(err, FiscalError::RoutingNotFound { .. }));
        let record = fx.status.get(&key).await.unwrap().unwrap();
        assert!(record.operations.is_empty());
    }

    #[tokio::test]
    async fn test_void_requires_authorized_document() {
        let fx = fixture().await;
        let draft = draft(5);
        let key = draft.access_key.clone();
        fx.dispatcher
            .enqueue_emission(&TenantId::new("acme"), draft, Priority::High)
            .await
            .unwrap();

        let err = fx
            .dispatcher
            .enqueue_void(&TenantId::new("acme"), &key, "Erro de digitacao no pedido", Priority::High)
            .await
            .unwrap_err();
        assert!(matches!(err, FiscalError::Validation(_)));

        let err = fx
            .dispatcher
            .enqueue_query(&TenantId::new("other"), &key, Priority::Normal)
            .await
            .unwrap_err();
        assert!(matches!(err, FiscalError::TenantNotFound { .. }));
    }

    #[tokio::test]
    async fn test_failed_operation_publish_expires_sub_record() {
        let fx = fixture().await;
        let draft = draft(6);
        let key = draft.access_key.clone();
        fx.dispatcher
            .enqueue_emission(&TenantId::new("acme"), draft, Priority::Normal)
            .await
            .unwrap();

        fx.transport.set_available(false);
        let err = fx
            .dispatcher
            .enqueue_query(&TenantId::new("acme"), &key, Priority::Normal)
            .await
            .unwrap_err();
        assert!(matches!(err, FiscalError::Dispatch { .. }));

        let record = fx.status.get(&key).await.unwrap().unwrap();
        assert_eq!(record.operations.len(), 1);
        assert_eq!(record.operations[0].state, OperationState::DeadLettered);
        assert!(!record.has_open_operation(Operation::Query));
    }

    #[tokio::test]
    async fn test_slow_transport_reports_dispatch_timeout() {
        let fx = fixture().await;
        fx.transport.set_publish_latency(Duration::from_secs(10));
        let dispatcher = Dispatcher {
            publish_timeout: Duration::from_millis(20),
            ..fx.dispatcher
        };

        let err = dispatcher
            .enqueue_emission(&TenantId::new("acme"), draft(7), Priority::High)
            .await
            .unwrap_err();
        assert!(matches!(err, FiscalError::DispatchTimeout { .. }));
    }
}
