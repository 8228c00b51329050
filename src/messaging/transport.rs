use super::errors::MessagingResult;
use super::message::QueueMessage;
use super::types::{Delivery, MessageId, QueueStats, ReceiptHandle};
use crate::routing::QueueDescriptor;
use async_trait::async_trait;
use std::time::Duration;

/// At-least-once broker binding.
///
/// Messages published with a future `scheduled_at` stay invisible until then.
/// A consumed message stays invisible for `visibility_timeout` and is handed
/// out again if it is neither acked nor nacked by then.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Create the queue and its binding if missing (idempotent)
    async fn declare_queue(&self, descriptor: &QueueDescriptor) -> MessagingResult<()>;

    async fn publish(
        &self,
        descriptor: &QueueDescriptor,
        message: &QueueMessage,
    ) -> MessagingResult<MessageId>;

    async fn consume(
        &self,
        descriptor: &QueueDescriptor,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> MessagingResult<Vec<Delivery>>;

    async fn ack(&self, descriptor: &QueueDescriptor, receipt: &ReceiptHandle)
        -> MessagingResult<()>;

    /// Release a message; `requeue = false` drops it
    async fn nack(
        &self,
        descriptor: &QueueDescriptor,
        receipt: &ReceiptHandle,
        requeue: bool,
    ) -> MessagingResult<()>;

    async fn queue_stats(&self, descriptor: &QueueDescriptor) -> MessagingResult<QueueStats>;

    /// Non-destructive view of queued messages, oldest first
    async fn peek(
        &self,
        descriptor: &QueueDescriptor,
        limit: usize,
    ) -> MessagingResult<Vec<QueueMessage>>;
}
