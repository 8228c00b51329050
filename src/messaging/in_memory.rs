//! # In-Memory Transport
//!
//! Thread-safe in-memory broker for tests and single-process deployments.
//!
//! ## Features
//!
//! - **Scheduled delivery**: messages stay invisible until `scheduled_at`
//! - **Visibility timeout**: consumed messages reappear if never settled
//! - **Fault injection**: the transport can be switched unavailable or slowed
//!   down to exercise dispatch failures

use super::errors::{MessagingError, MessagingResult};
use super::message::{to_chrono, QueueMessage};
use super::transport::Transport;
use super::types::{Delivery, MessageId, QueueStats, ReceiptHandle};
use crate::routing::QueueDescriptor;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// In-memory message with visibility tracking
#[derive(Debug, Clone)]
struct StoredMessage {
    id: u64,
    /// Serialized message, as a real broker would hold it
    payload: Vec<u8>,
    enqueued_at: DateTime<Utc>,
    /// Earliest delivery time (`scheduled_at`, then lease expiry)
    visible_at: DateTime<Utc>,
    leased: bool,
    receive_count: u32,
}

#[derive(Debug, Default)]
struct InMemoryQueue {
    messages: VecDeque<StoredMessage>,
    total_published: u64,
    total_acked: u64,
    total_nacked: u64,
}

#[derive(Debug)]
pub struct InMemoryTransport {
    queues: RwLock<HashMap<String, InMemoryQueue>>,
    next_id: AtomicU64,
    available: AtomicBool,
    publish_latency_ms: AtomicU64,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            available: AtomicBool::new(true),
            publish_latency_ms: AtomicU64::new(0),
        }
    }

    /// Simulate a broker outage (publish and consume fail)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delay every publish, to exercise publish timeouts
    pub fn set_publish_latency(&self, latency: Duration) {
        self.publish_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of messages in a queue, in-flight included (for testing)
    pub async fn queue_length(&self, queue_name: &str) -> usize {
        let queues = self.queues.read().await;
        queues
            .get(queue_name)
            .map(|q| q.messages.len())
            .unwrap_or(0)
    }

    /// Make every scheduled or leased message visible now (for testing)
    pub async fn release_all(&self, queue_name: &str) {
        let mut queues = self.queues.write().await;
        if let Some(queue) = queues.get_mut(queue_name) {
            let now = Utc::now();
            for message in queue.messages.iter_mut() {
                message.visible_at = now;
                message.leased = false;
            }
        }
    }

    fn ensure_available(&self, operation: &str) -> MessagingResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MessagingError::unavailable(format!(
                "in-memory transport is down ({operation})"
            )))
        }
    }

    fn parse_receipt(receipt: &ReceiptHandle) -> MessagingResult<u64> {
        receipt
            .as_str()
            .parse()
            .map_err(|_| MessagingError::invalid_receipt_handle(receipt.as_str()))
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn declare_queue(&self, descriptor: &QueueDescriptor) -> MessagingResult<()> {
        let mut queues = self.queues.write().await;
        queues.entry(descriptor.queue_name.clone()).or_default();
        Ok(())
    }

    async fn publish(
        &self,
        descriptor: &QueueDescriptor,
        message: &QueueMessage,
    ) -> MessagingResult<MessageId> {
        let latency = self.publish_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        self.ensure_available("publish")?;

        // Serialize outside the lock
        let payload = message.to_bytes()?;

        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(&descriptor.queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(&descriptor.queue_name))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        queue.total_published += 1;
        queue.messages.push_back(StoredMessage {
            id,
            payload,
            enqueued_at: Utc::now(),
            visible_at: message.scheduled_at,
            leased: false,
            receive_count: 0,
        });

        Ok(message.message_id.clone())
    }

    async fn consume(
        &self,
        descriptor: &QueueDescriptor,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> MessagingResult<Vec<Delivery>> {
        self.ensure_available("consume")?;

        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(&descriptor.queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(&descriptor.queue_name))?;

        let now = Utc::now();
        let lease_until = now + to_chrono(visibility_timeout);
        let mut deliveries = Vec::new();

        for stored in queue.messages.iter_mut() {
            if deliveries.len() >= max_messages {
                break;
            }
            if stored.visible_at > now {
                continue;
            }

            let message = QueueMessage::from_bytes(&stored.payload)?;
            stored.visible_at = lease_until;
            stored.leased = true;
            stored.receive_count += 1;

            deliveries.push(Delivery {
                message,
                receipt_handle: ReceiptHandle::new(stored.id.to_string()),
                receive_count: stored.receive_count,
                enqueued_at: stored.enqueued_at,
            });
        }

        Ok(deliveries)
    }

    async fn ack(
        &self,
        descriptor: &QueueDescriptor,
        receipt: &ReceiptHandle,
    ) -> MessagingResult<()> {
        let id = Self::parse_receipt(receipt)?;
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(&descriptor.queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(&descriptor.queue_name))?;

        match queue.messages.iter().position(|m| m.id == id) {
            Some(pos) => {
                queue.messages.remove(pos);
                queue.total_acked += 1;
                Ok(())
            }
            None => Err(MessagingError::message_not_found(id.to_string())),
        }
    }

    async fn nack(
        &self,
        descriptor: &QueueDescriptor,
        receipt: &ReceiptHandle,
        requeue: bool,
    ) -> MessagingResult<()> {
        let id = Self::parse_receipt(receipt)?;
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(&descriptor.queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(&descriptor.queue_name))?;

        let pos = queue
            .messages
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| MessagingError::message_not_found(id.to_string()))?;
        queue.total_nacked += 1;

        if requeue {
            let stored = &mut queue.messages[pos];
            stored.visible_at = Utc::now();
            stored.leased = false;
        } else {
            queue.messages.remove(pos);
        }
        Ok(())
    }

    async fn queue_stats(&self, descriptor: &QueueDescriptor) -> MessagingResult<QueueStats> {
        let queues = self.queues.read().await;
        let queue = queues
            .get(&descriptor.queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(&descriptor.queue_name))?;

        let now = Utc::now();
        let in_flight = queue
            .messages
            .iter()
            .filter(|m| m.leased && m.visible_at > now)
            .count() as u64;
        let scheduled = queue
            .messages
            .iter()
            .filter(|m| !m.leased && m.visible_at > now)
            .count() as u64;

        let mut stats = QueueStats::new(&descriptor.queue_name, queue.messages.len() as u64)
            .with_in_flight_count(in_flight)
            .with_scheduled_count(scheduled)
            .with_counters(queue.total_published, queue.total_acked, queue.total_nacked);

        if let Some(oldest) = queue.messages.iter().map(|m| m.enqueued_at).min() {
            if let Ok(age) = (now - oldest).to_std() {
                stats = stats.with_oldest_message_age(age);
            }
        }

        Ok(stats)
    }

    async fn peek(
        &self,
        descriptor: &QueueDescriptor,
        limit: usize,
    ) -> MessagingResult<Vec<QueueMessage>> {
        let queues = self.queues.read().await;
        let queue = queues
            .get(&descriptor.queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(&descriptor.queue_name))?;

        queue
            .messages
            .iter()
            .take(limit)
            .map(|m| QueueMessage::from_bytes(&m.payload))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::MessagePayload;
    use crate::models::{AccessKey, Operation, Priority, TenantId};

    fn descriptor() -> QueueDescriptor {
        QueueDescriptor::work("fiscal", "fiscal.direct", true, Operation::Query, Priority::Normal)
    }

    fn message() -> QueueMessage {
        QueueMessage::new(
            TenantId::new("acme"),
            Priority::Normal,
            MessagePayload::Query {
                access_key: AccessKey::parse("35241012345678000195550010000000021876543219")
                    .unwrap(),
            },
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn test_publish_consume_ack() {
        let transport = InMemoryTransport::new();
        let queue = descriptor();
        transport.declare_queue(&queue).await.unwrap();

        let sent = message();
        transport.publish(&queue, &sent).await.unwrap();

        let deliveries = transport
            .consume(&queue, 10, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].message, sent);
        assert_eq!(deliveries[0].receive_count, 1);

        // Leased messages are not handed out twice
        assert!(transport
            .consume(&queue, 10, Duration::from_secs(30))
            .await
            .unwrap()
            .is_empty());

        transport
            .ack(&queue, &deliveries[0].receipt_handle)
            .await
            .unwrap();
        assert_eq!(transport.queue_length(&queue.queue_name).await, 0);
    }

    #[tokio::test]
    async fn test_scheduled_messages_stay_invisible() {
        let transport = InMemoryTransport::new();
        let queue = descriptor();
        transport.declare_queue(&queue).await.unwrap();

        let delayed = message().for_retry(Duration::from_secs(3600), Duration::from_secs(60));
        transport.publish(&queue, &delayed).await.unwrap();

        assert!(transport
            .consume(&queue, 10, Duration::from_secs(30))
            .await
            .unwrap()
            .is_empty());
        let stats = transport.queue_stats(&queue).await.unwrap();
        assert_eq!(stats.scheduled_count, Some(1));
        assert_eq!(stats.in_flight_count, Some(0));
    }

    #[tokio::test]
    async fn test_nack_requeue_redelivers() {
        let transport = InMemoryTransport::new();
        let queue = descriptor();
        transport.declare_queue(&queue).await.unwrap();
        transport.publish(&queue, &message()).await.unwrap();

        let first = transport
            .consume(&queue, 1, Duration::from_secs(30))
            .await
            .unwrap();
        transport
            .nack(&queue, &first[0].receipt_handle, true)
            .await
            .unwrap();

        let second = transport
            .consume(&queue, 1, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
        assert!(second[0].is_redelivery());
    }

    #[tokio::test]
    async fn test_unavailable_transport_fails_publish() {
        let transport = InMemoryTransport::new();
        let queue = descriptor();
        transport.declare_queue(&queue).await.unwrap();
        transport.set_available(false);

        let err = transport.publish(&queue, &message()).await.unwrap_err();
        assert!(matches!(err, MessagingError::Unavailable { .. }));
        assert!(err.is_transient());
        assert_eq!(transport.queue_length(&queue.queue_name).await, 0);
    }

    #[tokio::test]
    async fn test_undeclared_queue_is_reported() {
        let transport = InMemoryTransport::new();
        let err = transport.publish(&descriptor(), &message()).await.unwrap_err();
        assert!(matches!(err, MessagingError::QueueNotFound { .. }));
    }
}
