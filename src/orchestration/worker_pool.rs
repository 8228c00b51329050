//! # Worker Pool
//!
//! Consumes the work queues, invokes the authority and settles every message
//! through the status store.
//!
//! ## Flow per delivery
//!
//! ```text
//! consume → idempotency check → START → authority (timeout, panic guard)
//!         → transition persisted → ack
//!                                 ↘ failure → RetryScheduler → retry | reject | DLQ
//! ```
//!
//! Concurrency is bounded per priority tier: permits are taken before
//! consuming, so a saturated tier leaves its messages with the broker. A
//! message is acknowledged only after its outcome is persisted; anything that
//! fails before that point is nacked back to the queue.

use super::authority::{AuthorityClient, AuthorityError, AuthorityReceipt, AuthorityRequest};
use super::dispatcher::Dispatcher;
use super::retry_scheduler::{RetryDecision, RetryOutcome, RetryScheduler};
use crate::config::WorkerConfig;
use crate::error::{FiscalError, FiscalResult};
use crate::events::OrchestrationEvent;
use crate::logging::{log_error, log_state_transition};
use crate::messaging::message::to_chrono;
use crate::messaging::{DeadLetterAnnotation, Delivery, MessagePayload, QueueMessage};
use crate::models::{
    CorrelationId, DocumentStatusRecord, ErrorEntry, Operation, Priority, TenantId,
};
use crate::routing::QueueDescriptor;
use crate::state_machine::{DocumentEvent, DocumentState, OperationEvent, OperationState};
use crate::status::{AppliedTransition, StatusMutation};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// How a delivery is settled with the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Ack,
    Requeue,
}

/// Rejection code for a VOID whose document is no longer authorized
const DOCUMENT_NOT_AUTHORIZED_CODE: &str = "document_not_authorized";

/// Result of claiming an attempt for a delivery
enum Claim {
    /// The attempt is recorded as `PROCESSING`; `record` is as written
    Started {
        record: DocumentStatusRecord,
        attempt: u32,
    },
    /// Nothing left to invoke
    Settled(Settlement),
}

/// Non-terminal stage shared by documents and operation sub-records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Pending,
    Processing,
    Error,
}

#[derive(Debug, Clone)]
struct Progress {
    is_emission: bool,
    operation: Operation,
    stage: Stage,
    attempts: u32,
    updated_at: DateTime<Utc>,
    last_error: Option<ErrorEntry>,
}

impl Progress {
    /// `None` when the correlation is unknown or already terminal
    fn of(record: &DocumentStatusRecord, correlation_id: &CorrelationId) -> Option<Self> {
        if &record.correlation_id == correlation_id {
            let stage = match record.state {
                DocumentState::Pending => Stage::Pending,
                DocumentState::Processing => Stage::Processing,
                DocumentState::Error => Stage::Error,
                _ => return None,
            };
            return Some(Self {
                is_emission: true,
                operation: Operation::Emit,
                stage,
                attempts: record.attempt_count,
                updated_at: record.updated_at,
                last_error: record.errors.last().cloned(),
            });
        }

        let sub_record = record.operation(correlation_id)?;
        let stage = match sub_record.state {
            OperationState::Pending => Stage::Pending,
            OperationState::Processing => Stage::Processing,
            OperationState::Error => Stage::Error,
            _ => return None,
        };
        Some(Self {
            is_emission: false,
            operation: sub_record.operation,
            stage,
            attempts: sub_record.attempt_count,
            updated_at: sub_record.updated_at,
            last_error: sub_record.errors.last().cloned(),
        })
    }
}

/// Lifecycle events common to both state machines
#[derive(Debug, Clone)]
enum Lifecycle {
    Start,
    Reject {
        code: Option<String>,
        message: String,
    },
    Fail {
        code: Option<String>,
        message: String,
        retry_at: Option<DateTime<Utc>>,
    },
    Abandon {
        attempts: u32,
        reason: String,
    },
    DeadLetter {
        reason: String,
    },
    Expire {
        reason: String,
    },
}

impl Lifecycle {
    fn into_mutation(self, is_emission: bool, correlation_id: CorrelationId) -> StatusMutation {
        if is_emission {
            let event = match self {
                Self::Start => DocumentEvent::Start,
                Self::Reject { code, message } => DocumentEvent::Reject { code, message },
                Self::Fail {
                    code,
                    message,
                    retry_at,
                } => DocumentEvent::Fail {
                    code,
                    message,
                    retry_at,
                },
                Self::Abandon { attempts, reason } => DocumentEvent::Abandon { attempts, reason },
                Self::DeadLetter { reason } => DocumentEvent::DeadLetter { reason },
                Self::Expire { reason } => DocumentEvent::Expire { reason },
            };
            StatusMutation::Document(event)
        } else {
            let event = match self {
                Self::Start => OperationEvent::Start,
                Self::Reject { code, message } => OperationEvent::Reject { code, message },
                Self::Fail {
                    code,
                    message,
                    retry_at,
                } => OperationEvent::Fail {
                    code,
                    message,
                    retry_at,
                },
                Self::Abandon { attempts, reason } => OperationEvent::Abandon { attempts, reason },
                Self::DeadLetter { reason } => OperationEvent::DeadLetter { reason },
                Self::Expire { reason } => OperationEvent::Expire { reason },
            };
            StatusMutation::operation(correlation_id, event)
        }
    }
}

/// Shared state of every poller and in-flight delivery
struct WorkerContext {
    dispatcher: Arc<Dispatcher>,
    retry: Arc<RetryScheduler>,
    authority: Arc<dyn AuthorityClient>,
    visibility_timeout: Duration,
}

pub struct WorkerPool {
    context: Arc<WorkerContext>,
    semaphores: HashMap<Priority, Arc<Semaphore>>,
    config: WorkerConfig,
    shutdown_tx: watch::Sender<bool>,
    pollers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("pollers", &self.pollers.lock().len())
            .finish()
    }
}

impl WorkerPool {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        retry: Arc<RetryScheduler>,
        authority: Arc<dyn AuthorityClient>,
        config: &WorkerConfig,
    ) -> Self {
        let semaphores = Priority::ALL
            .iter()
            .map(|priority| {
                let profile = dispatcher.router().profile_for(*priority);
                (*priority, Arc::new(Semaphore::new(profile.max_concurrency)))
            })
            .collect();
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            context: Arc::new(WorkerContext {
                dispatcher,
                retry,
                authority,
                visibility_timeout: config.visibility_timeout(),
            }),
            semaphores,
            config: config.clone(),
            shutdown_tx,
            pollers: Mutex::new(Vec::new()),
        }
    }

    /// Messages of `priority` currently being processed
    pub fn in_flight(&self, priority: Priority) -> usize {
        let max = self
            .context
            .dispatcher
            .router()
            .profile_for(priority)
            .max_concurrency;
        let available = self
            .semaphores
            .get(&priority)
            .map(|s| s.available_permits())
            .unwrap_or(max);
        max.saturating_sub(available)
    }

    /// One polling pass over every work queue, highest priority first,
    /// waiting for every consumed message to settle. Returns the number of
    /// deliveries handled.
    pub async fn run_once(&self) -> usize {
        let mut in_flight = JoinSet::new();

        for descriptor in self.context.dispatcher.router().work_queues() {
            let Some(priority) = descriptor.priority() else {
                continue;
            };
            let semaphore = self.semaphore(priority);
            let prefetch = self.prefetch(priority);
            for (delivery, permit) in self.context.poll(descriptor, &semaphore, prefetch).await {
                let context = self.context.clone();
                let descriptor = descriptor.clone();
                in_flight.spawn(async move {
                    context.handle_delivery(&descriptor, delivery).await;
                    drop(permit);
                });
            }
        }

        let mut handled = 0;
        while let Some(joined) = in_flight.join_next().await {
            if let Err(error) = joined {
                log_error("worker_pool", "join_delivery", &error.to_string(), None);
            }
            handled += 1;
        }
        handled
    }

    /// Spawn one poller per work queue
    pub fn start(&self) {
        let mut pollers = self.pollers.lock();
        if !pollers.is_empty() {
            return;
        }
        self.shutdown_tx.send_replace(false);

        for descriptor in self.context.dispatcher.router().work_queues() {
            let Some(priority) = descriptor.priority() else {
                continue;
            };
            pollers.push(tokio::spawn(poll_loop(
                self.context.clone(),
                descriptor.clone(),
                self.semaphore(priority),
                self.prefetch(priority),
                self.config.poll_interval(),
                self.shutdown_tx.subscribe(),
            )));
        }

        info!(pollers = pollers.len(), "🚀 WORKER_POOL: Started");
    }

    /// Stop polling and wait, up to the shutdown timeout, for in-flight
    /// deliveries to settle. Unsettled messages return to their queue when
    /// their visibility timeout lapses.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let pollers: Vec<_> = self.pollers.lock().drain(..).collect();
        for poller in pollers {
            if let Err(error) = poller.await {
                log_error("worker_pool", "join_poller", &error.to_string(), None);
            }
        }

        let drain = async {
            for priority in Priority::ALL {
                let permits = self
                    .context
                    .dispatcher
                    .router()
                    .profile_for(priority)
                    .max_concurrency as u32;
                // Every permit back means every delivery of the tier settled
                if let Ok(all) = self.semaphore(priority).acquire_many_owned(permits).await {
                    drop(all);
                }
            }
        };
        if tokio::time::timeout(self.config.shutdown_timeout(), drain)
            .await
            .is_err()
        {
            warn!(
                timeout_ms = self.config.shutdown_timeout_ms,
                "⚠️ WORKER_POOL: Shutdown timed out with deliveries in flight"
            );
        } else {
            info!("🛑 WORKER_POOL: Stopped");
        }
    }

    fn semaphore(&self, priority: Priority) -> Arc<Semaphore> {
        self.semaphores
            .get(&priority)
            .cloned()
            .unwrap_or_else(|| Arc::new(Semaphore::new(0)))
    }

    fn prefetch(&self, priority: Priority) -> usize {
        self.context
            .dispatcher
            .router()
            .profile_for(priority)
            .prefetch
            .max(1)
    }
}

async fn poll_loop(
    context: Arc<WorkerContext>,
    descriptor: QueueDescriptor,
    semaphore: Arc<Semaphore>,
    prefetch: usize,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(queue_name = %descriptor.queue_name, "Poller started");

    while !*shutdown.borrow() {
        let batch = context.poll(&descriptor, &semaphore, prefetch).await;
        let idle = batch.is_empty();

        for (delivery, permit) in batch {
            let context = context.clone();
            let descriptor = descriptor.clone();
            tokio::spawn(async move {
                context.handle_delivery(&descriptor, delivery).await;
                drop(permit);
            });
        }

        if idle {
            tokio::select! {
                _ = shutdown.changed() => {}
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    debug!(queue_name = %descriptor.queue_name, "Poller stopped");
}

impl WorkerContext {
    /// Take up to `prefetch` free permits, then consume at most that many
    /// messages. Unused permits are released on return.
    async fn poll(
        &self,
        descriptor: &QueueDescriptor,
        semaphore: &Arc<Semaphore>,
        prefetch: usize,
    ) -> Vec<(Delivery, OwnedSemaphorePermit)> {
        let mut permits = Vec::new();
        while permits.len() < prefetch {
            match semaphore.clone().try_acquire_owned() {
                Ok(permit) => permits.push(permit),
                Err(_) => break,
            }
        }
        if permits.is_empty() {
            return Vec::new();
        }

        match self
            .dispatcher
            .transport()
            .consume(descriptor, permits.len(), self.visibility_timeout)
            .await
        {
            Ok(deliveries) => deliveries.into_iter().zip(permits).collect(),
            Err(error) => {
                log_error(
                    "worker_pool",
                    "consume",
                    &error.to_string(),
                    Some(&descriptor.queue_name),
                );
                Vec::new()
            }
        }
    }

    /// Process and settle one delivery; nothing escapes this function
    async fn handle_delivery(&self, descriptor: &QueueDescriptor, delivery: Delivery) {
        let settlement = match self.process(descriptor, &delivery).await {
            Ok(settlement) => settlement,
            Err(error) => {
                log_error(
                    "worker_pool",
                    "process_delivery",
                    &error.to_string(),
                    Some(&delivery.message.correlation_id.to_string()),
                );
                Settlement::Requeue
            }
        };

        let transport = self.dispatcher.transport();
        let settled = match settlement {
            Settlement::Ack => transport.ack(descriptor, &delivery.receipt_handle).await,
            Settlement::Requeue => {
                transport
                    .nack(descriptor, &delivery.receipt_handle, true)
                    .await
            }
        };
        if let Err(error) = settled {
            // The message reappears after its lease; the status record dedupes it
            log_error(
                "worker_pool",
                "settle_delivery",
                &error.to_string(),
                Some(&delivery.message.correlation_id.to_string()),
            );
        }
    }

    async fn process(
        &self,
        descriptor: &QueueDescriptor,
        delivery: &Delivery,
    ) -> FiscalResult<Settlement> {
        let message = &delivery.message;
        let status = self.dispatcher.status_store();

        let Some(record) = status.find_by_correlation(&message.correlation_id).await? else {
            let orphan = annotation(
                descriptor,
                message,
                "orphan",
                "no status record for correlation",
                message.retry_count + 1,
            );
            self.dispatcher.dead_letter(message, orphan).await?;
            return Ok(Settlement::Ack);
        };

        let Some(progress) = Progress::of(&record, &message.correlation_id) else {
            self.discard(message, "already settled");
            return Ok(Settlement::Ack);
        };

        if progress.stage == Stage::Processing && !delivery.is_redelivery() {
            // The broker only redelivers after a lapsed lease or a nack; a
            // first delivery finding the attempt in flight is a duplicate publish
            self.discard(message, "duplicate delivery while processing");
            return Ok(Settlement::Ack);
        }

        if message.is_expired_at(Utc::now()) {
            return self.expire(descriptor, message, &record, &progress).await;
        }

        let claim = if progress.stage == Stage::Processing {
            self.take_over(descriptor, delivery, &record, &progress)
                .await?
        } else {
            self.start(descriptor, message, &record, &progress).await?
        };
        let (record, attempt) = match claim {
            Claim::Started { record, attempt } => (record, attempt),
            Claim::Settled(settlement) => return Ok(settlement),
        };

        // Checked against the record as of our START, not the consumed snapshot
        if message.operation == Operation::Void && record.state != DocumentState::Authorized {
            let reject = Lifecycle::Reject {
                code: Some(DOCUMENT_NOT_AUTHORIZED_CODE.to_string()),
                message: format!("document is {}", record.state),
            };
            let mutation = reject.into_mutation(false, message.correlation_id);
            self.persist_outcome(&record, message, mutation, None).await?;
            return Ok(Settlement::Ack);
        }

        let started = Instant::now();
        let result = self.invoke(message, attempt).await;
        let latency = started.elapsed();

        match result {
            Ok(receipt) => match success_mutation(message, receipt) {
                Ok(mutation) => self.settle_success(&record, message, mutation, latency).await,
                Err(error) => {
                    self.on_failure(
                        descriptor, message, &record, &progress, error, attempt, latency,
                    )
                    .await
                }
            },
            Err(error) => {
                self.on_failure(
                    descriptor, message, &record, &progress, error, attempt, latency,
                )
                .await
            }
        }
    }

    /// Consume one attempt for a delivery of a `PENDING` or `ERROR` operation
    async fn start(
        &self,
        descriptor: &QueueDescriptor,
        message: &QueueMessage,
        record: &DocumentStatusRecord,
        progress: &Progress,
    ) -> FiscalResult<Claim> {
        let max_attempts = self.retry.max_attempts(progress.operation);
        if progress.stage == Stage::Error && progress.attempts >= max_attempts {
            return self
                .recover_exhausted(descriptor, message, record, progress)
                .await
                .map(Claim::Settled);
        }

        let start = Lifecycle::Start.into_mutation(progress.is_emission, message.correlation_id);
        match self.persist(record, start, None).await {
            Ok(record) => Ok(Claim::Started {
                record,
                attempt: progress.attempts + 1,
            }),
            Err(FiscalError::InvalidTransition(_)) => {
                self.discard(message, "lost start race");
                Ok(Claim::Settled(Settlement::Ack))
            }
            Err(error) => Err(error),
        }
    }

    /// Resume an attempt whose worker vanished before settling it.
    ///
    /// Every delivery of the logical operation counts against the attempt
    /// budget, so a message that keeps killing its worker is dead-lettered
    /// once the budget is spent instead of being resubmitted forever.
    async fn take_over(
        &self,
        descriptor: &QueueDescriptor,
        delivery: &Delivery,
        record: &DocumentStatusRecord,
        progress: &Progress,
    ) -> FiscalResult<Claim> {
        let message = &delivery.message;
        let cid = message.correlation_id;
        let consumed = progress.attempts.max(
            message
                .retry_count
                .saturating_add(delivery.receive_count.saturating_sub(1)),
        );
        let max_attempts = self.retry.max_attempts(progress.operation);

        info!(
            correlation_id = %cid,
            operation = %message.operation,
            receive_count = delivery.receive_count,
            attempts = consumed,
            max_attempts,
            processing_since = %progress.updated_at.to_rfc3339(),
            "♻️ WORKER_POOL: Taking over abandoned delivery"
        );

        let abandon = Lifecycle::Abandon {
            attempts: consumed,
            reason: format!(
                "attempt abandoned after {} deliveries: visibility lease lapsed",
                delivery.receive_count
            ),
        }
        .into_mutation(progress.is_emission, cid);

        if consumed >= max_attempts {
            let abandoned = match self.persist(record, abandon, None).await {
                Ok(record) => record,
                Err(FiscalError::InvalidTransition(_)) => {
                    self.discard(message, "lost takeover race");
                    return Ok(Claim::Settled(Settlement::Ack));
                }
                Err(error) => return Err(error),
            };
            let Some(progress) = Progress::of(&abandoned, &cid) else {
                self.discard(message, "already settled");
                return Ok(Claim::Settled(Settlement::Ack));
            };
            return self
                .recover_exhausted(descriptor, message, &abandoned, &progress)
                .await
                .map(Claim::Settled);
        }

        let resume = StatusMutation::Batch(vec![
            abandon,
            Lifecycle::Start.into_mutation(progress.is_emission, cid),
        ]);
        match self.persist(record, resume, None).await {
            Ok(record) => Ok(Claim::Started {
                record,
                attempt: consumed + 1,
            }),
            Err(FiscalError::InvalidTransition(_)) => {
                self.discard(message, "lost takeover race");
                Ok(Claim::Settled(Settlement::Ack))
            }
            Err(error) => Err(error),
        }
    }

    /// Persist an authority success. A VOID whose cancellation cascade is
    /// refused (the document left `AUTHORIZED` meanwhile) settles as rejected
    /// rather than staying in `PROCESSING`.
    async fn settle_success(
        &self,
        record: &DocumentStatusRecord,
        message: &QueueMessage,
        mutation: StatusMutation,
        latency: Duration,
    ) -> FiscalResult<Settlement> {
        let cascades = matches!(
            mutation,
            StatusMutation::Operation {
                cascade: Some(_),
                ..
            }
        );
        if !cascades {
            self.persist_outcome(record, message, mutation, Some(latency))
                .await?;
            return Ok(Settlement::Ack);
        }

        match self.persist(record, mutation, Some(latency)).await {
            Ok(_) => Ok(Settlement::Ack),
            Err(FiscalError::InvalidTransition(error)) => {
                warn!(
                    correlation_id = %message.correlation_id,
                    error = %error,
                    "⚠️ WORKER_POOL: Cancellation refused by the document state"
                );
                let reject = Lifecycle::Reject {
                    code: Some(DOCUMENT_NOT_AUTHORIZED_CODE.to_string()),
                    message: format!("cancellation not applied: {error}"),
                }
                .into_mutation(false, message.correlation_id);
                self.persist_outcome(record, message, reject, Some(latency))
                    .await?;
                Ok(Settlement::Ack)
            }
            Err(error) => Err(error),
        }
    }

    async fn invoke(
        &self,
        message: &QueueMessage,
        attempt: u32,
    ) -> Result<AuthorityReceipt, AuthorityError> {
        let tenant = self
            .dispatcher
            .registry()
            .get(&message.tenant_id)
            .await
            .map_err(|error| AuthorityError::technical(error.to_string()))?;
        let timeout = self
            .dispatcher
            .router()
            .profile_for(message.priority)
            .invocation_timeout;

        let request = AuthorityRequest {
            tenant_id: message.tenant_id.clone(),
            correlation_id: message.correlation_id,
            operation: message.operation,
            attempt,
            certificate: tenant.certificate.clone(),
            environment: tenant.environment,
            payload: message.payload.clone(),
        };

        let call = AssertUnwindSafe(self.authority.submit(request)).catch_unwind();
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(AuthorityError::technical(format!(
                "authority client panicked: {}",
                panic_message(panic.as_ref())
            ))),
            Err(_) => Err(AuthorityError::Timeout { timeout }),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn on_failure(
        &self,
        descriptor: &QueueDescriptor,
        message: &QueueMessage,
        record: &DocumentStatusRecord,
        progress: &Progress,
        error: AuthorityError,
        attempts: u32,
        latency: Duration,
    ) -> FiscalResult<Settlement> {
        let RetryOutcome {
            decision,
            classification,
            attempts,
        } = self.retry.on_failure_after(message, &error, attempts);
        let code = classification.code.clone();
        let failure_message = classification.message.clone();
        let is_emission = progress.is_emission;
        let cid = message.correlation_id;

        match decision {
            RetryDecision::Reject(reason) => {
                let mutation = if classification.is_retryable() {
                    // Exhausted business failure: record it, then settle
                    StatusMutation::Batch(vec![
                        Lifecycle::Fail {
                            code: code.clone(),
                            message: failure_message,
                            retry_at: None,
                        }
                        .into_mutation(is_emission, cid),
                        Lifecycle::Reject { code, message: reason }.into_mutation(is_emission, cid),
                    ])
                } else {
                    Lifecycle::Reject {
                        code,
                        message: failure_message,
                    }
                    .into_mutation(is_emission, cid)
                };
                self.persist_outcome(record, message, mutation, Some(latency))
                    .await?;
                Ok(Settlement::Ack)
            }
            RetryDecision::RetryAfter(delay) => {
                let fail = Lifecycle::Fail {
                    code,
                    message: failure_message,
                    retry_at: Some(Utc::now() + to_chrono(delay)),
                };
                let mutation = fail.into_mutation(is_emission, cid);
                self.persist_outcome(record, message, mutation, Some(latency))
                    .await?;

                match self.dispatcher.redeliver(message, delay).await {
                    Ok(_) => Ok(Settlement::Ack),
                    Err(error) => {
                        // The record is in ERROR; the requeued message resumes it
                        log_error(
                            "worker_pool",
                            "redeliver",
                            &error.to_string(),
                            Some(&cid.to_string()),
                        );
                        Ok(Settlement::Requeue)
                    }
                }
            }
            RetryDecision::DeadLetter(reason) => {
                let parked = self
                    .dispatcher
                    .dead_letter(
                        message,
                        annotation(descriptor, message, classification.label(), &reason, attempts),
                    )
                    .await;

                let fail = Lifecycle::Fail {
                    code,
                    message: failure_message,
                    retry_at: None,
                }
                .into_mutation(is_emission, cid);

                if let Err(error) = parked {
                    log_error(
                        "worker_pool",
                        "dead_letter",
                        &error.to_string(),
                        Some(&cid.to_string()),
                    );
                    self.persist_outcome(record, message, fail, Some(latency)).await?;
                    return Ok(Settlement::Requeue);
                }

                let mutation = StatusMutation::Batch(vec![
                    fail,
                    Lifecycle::DeadLetter { reason }.into_mutation(is_emission, cid),
                ]);
                self.persist_outcome(record, message, mutation, Some(latency))
                    .await?;
                Ok(Settlement::Ack)
            }
        }
    }

    /// An operation left in `ERROR` with no attempts left: settle it from
    /// its last recorded failure
    async fn recover_exhausted(
        &self,
        descriptor: &QueueDescriptor,
        message: &QueueMessage,
        record: &DocumentStatusRecord,
        progress: &Progress,
    ) -> FiscalResult<Settlement> {
        let outcome = self
            .retry
            .on_exhausted(message, progress.last_error.as_ref(), progress.attempts);
        let cid = message.correlation_id;

        let mutation = match outcome.decision {
            RetryDecision::Reject(reason) => Lifecycle::Reject {
                code: outcome.classification.code.clone(),
                message: reason,
            }
            .into_mutation(progress.is_emission, cid),
            decision => {
                let reason = match decision {
                    RetryDecision::DeadLetter(reason) => reason,
                    _ => format!("retries exhausted after {} attempts", outcome.attempts),
                };
                self.dispatcher
                    .dead_letter(
                        message,
                        annotation(
                            descriptor,
                            message,
                            outcome.classification.label(),
                            &reason,
                            outcome.attempts,
                        ),
                    )
                    .await?;
                Lifecycle::DeadLetter { reason }.into_mutation(progress.is_emission, cid)
            }
        };

        self.persist_outcome(record, message, mutation, None).await?;
        Ok(Settlement::Ack)
    }

    async fn expire(
        &self,
        descriptor: &QueueDescriptor,
        message: &QueueMessage,
        record: &DocumentStatusRecord,
        progress: &Progress,
    ) -> FiscalResult<Settlement> {
        let reason = format!("expired at {}", message.expires_at.to_rfc3339());
        self.dispatcher
            .dead_letter(
                message,
                annotation(descriptor, message, "expired", &reason, progress.attempts),
            )
            .await?;

        let cid = message.correlation_id;
        let mutation = if progress.stage == Stage::Processing {
            StatusMutation::Batch(vec![
                Lifecycle::Fail {
                    code: Some("expired".to_string()),
                    message: reason.clone(),
                    retry_at: None,
                }
                .into_mutation(progress.is_emission, cid),
                Lifecycle::DeadLetter { reason }.into_mutation(progress.is_emission, cid),
            ])
        } else {
            Lifecycle::Expire { reason }.into_mutation(progress.is_emission, cid)
        };

        self.persist_outcome(record, message, mutation, None).await?;
        Ok(Settlement::Ack)
    }

    /// Persist a settling transition. A transition the state machine refuses
    /// means another delivery already settled the operation.
    async fn persist_outcome(
        &self,
        record: &DocumentStatusRecord,
        message: &QueueMessage,
        mutation: StatusMutation,
        latency: Option<Duration>,
    ) -> FiscalResult<()> {
        match self.persist(record, mutation, latency).await {
            Ok(_) => Ok(()),
            Err(FiscalError::InvalidTransition(error)) => {
                warn!(
                    correlation_id = %message.correlation_id,
                    error = %error,
                    "⚠️ WORKER_POOL: Outcome superseded by a concurrent delivery"
                );
                self.discard(message, "outcome superseded");
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    /// Apply `mutation` and report its transitions; returns the record as
    /// written
    async fn persist(
        &self,
        record: &DocumentStatusRecord,
        mutation: StatusMutation,
        latency: Option<Duration>,
    ) -> FiscalResult<DocumentStatusRecord> {
        let update = self
            .dispatcher
            .status_store()
            .update(&record.access_key, mutation)
            .await?;

        for transition in &update.transitions {
            self.report(&record.tenant_id, record, transition, latency);
        }
        Ok(update.record)
    }

    fn report(
        &self,
        tenant_id: &TenantId,
        record: &DocumentStatusRecord,
        transition: &AppliedTransition,
        latency: Option<Duration>,
    ) {
        log_state_transition(
            transition.operation,
            tenant_id,
            transition.correlation_id,
            transition.from_state,
            transition.to_state,
            latency,
        );
        self.dispatcher
            .events()
            .publish(OrchestrationEvent::StateTransitioned {
                tenant_id: tenant_id.clone(),
                access_key: record.access_key.clone(),
                correlation_id: transition.correlation_id,
                operation: transition.operation,
                from_state: transition.from_state.to_string(),
                to_state: transition.to_state.to_string(),
                event: transition.event.to_string(),
                latency_ms: latency.map(|l| l.as_millis() as u64),
            });
    }

    fn discard(&self, message: &QueueMessage, reason: &str) {
        debug!(
            correlation_id = %message.correlation_id,
            message_id = %message.message_id,
            reason = %reason,
            "🗑️ WORKER_POOL: Message discarded"
        );
        self.dispatcher
            .events()
            .publish(OrchestrationEvent::MessageDiscarded {
                tenant_id: message.tenant_id.clone(),
                correlation_id: message.correlation_id,
                operation: message.operation,
                reason: reason.to_string(),
            });
    }
}

/// Map an authority receipt to the settling mutation
fn success_mutation(
    message: &QueueMessage,
    receipt: AuthorityReceipt,
) -> Result<StatusMutation, AuthorityError> {
    let correlation_id = message.correlation_id;
    match &message.payload {
        MessagePayload::Emission { .. } => {
            let protocol_number = receipt.protocol_number.ok_or_else(|| {
                AuthorityError::technical("authorization answer without protocol number")
            })?;
            Ok(StatusMutation::Document(DocumentEvent::Authorize {
                protocol_number,
                authorized_xml: receipt.response_xml,
            }))
        }
        MessagePayload::Query { .. } | MessagePayload::Event { .. } => Ok(StatusMutation::operation(
            correlation_id,
            OperationEvent::Succeed {
                protocol_number: receipt.protocol_number,
                response: receipt.response_xml.or(receipt.status_message),
            },
        )),
        MessagePayload::Void { reason, .. } => Ok(StatusMutation::Operation {
            correlation_id,
            event: OperationEvent::Succeed {
                protocol_number: receipt.protocol_number,
                response: receipt.response_xml.or(receipt.status_message),
            },
            cascade: Some(DocumentEvent::Cancel {
                reason: reason.clone(),
            }),
        }),
    }
}

fn annotation(
    descriptor: &QueueDescriptor,
    message: &QueueMessage,
    classification: &str,
    reason: &str,
    attempts: u32,
) -> DeadLetterAnnotation {
    DeadLetterAnnotation {
        reason: reason.to_string(),
        classification: classification.to_string(),
        source_queue: descriptor.queue_name.clone(),
        attempts: attempts.max(message.retry_count),
        dead_lettered_at: Utc::now(),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AccessKey;

    fn message(payload: MessagePayload) -> QueueMessage {
        QueueMessage::new(
            TenantId::new("acme"),
            Priority::High,
            payload,
            Duration::from_secs(60),
        )
    }

    fn key() -> AccessKey {
        AccessKey::parse("35241012345678000195550010000000021876543219").unwrap()
    }

    #[test]
    fn test_emission_success_requires_protocol() {
        let emission = message(MessagePayload::Emission {
            access_key: key(),
            document_number: 2,
            series: 1,
            xml: "<NFe/>".to_string(),
        });

        let err = success_mutation(&emission, AuthorityReceipt::default()).unwrap_err();
        assert!(matches!(err, AuthorityError::Technical { .. }));

        let mutation =
            success_mutation(&emission, AuthorityReceipt::authorized("135240000000001")).unwrap();
        assert!(matches!(
            mutation,
            StatusMutation::Document(DocumentEvent::Authorize { .. })
        ));
    }

    #[test]
    fn test_void_success_cascades_cancellation() {
        let void = message(MessagePayload::Void {
            access_key: key(),
            protocol_number: "135240000000001".to_string(),
            reason: "Cancelamento por erro de digitacao".to_string(),
        });

        match success_mutation(&void, AuthorityReceipt::authorized("135240000000002")).unwrap() {
            StatusMutation::Operation { cascade, .. } => assert_eq!(
                cascade,
                Some(DocumentEvent::Cancel {
                    reason: "Cancelamento por erro de digitacao".to_string()
                })
            ),
            other => panic!("unexpected mutation {other:?}"),
        }
    }

    #[test]
    fn test_lifecycle_targets_the_right_machine() {
        let cid = CorrelationId::new();
        assert_eq!(
            Lifecycle::Start.into_mutation(true, cid),
            StatusMutation::Document(DocumentEvent::Start)
        );
        assert_eq!(
            Lifecycle::Start.into_mutation(false, cid),
            StatusMutation::operation(cid, OperationEvent::Start)
        );
    }

    #[test]
    fn test_abandon_carries_attempts_to_either_machine() {
        let cid = CorrelationId::new();
        let abandon = Lifecycle::Abandon {
            attempts: 4,
            reason: "lease lapsed".to_string(),
        };
        assert_eq!(
            abandon.clone().into_mutation(true, cid),
            StatusMutation::Document(DocumentEvent::Abandon {
                attempts: 4,
                reason: "lease lapsed".to_string(),
            })
        );
        assert_eq!(
            abandon.into_mutation(false, cid),
            StatusMutation::operation(
                cid,
                OperationEvent::Abandon {
                    attempts: 4,
                    reason: "lease lapsed".to_string(),
                }
            )
        );
    }

    #[test]
    fn test_panic_payloads_are_described() {
        let boxed: Box<dyn Any + Send> = Box::new("certificate vault unreachable");
        assert_eq!(panic_message(boxed.as_ref()), "certificate vault unreachable");
        let boxed: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic payload");
    }
}
