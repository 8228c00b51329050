use super::types::{OrchestrationEvent, PublishedEvent};
use std::sync::Arc;
use tokio::sync::broadcast;

/// External observability hook (metrics, audit trail)
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: &PublishedEvent);
}

/// Sink writing every event to the tracing pipeline
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &PublishedEvent) {
        let context = serde_json::to_string(&event.event).unwrap_or_default();
        tracing::debug!(
            event_name = event.name,
            tenant_id = %event.event.tenant_id(),
            correlation_id = %event.event.correlation_id(),
            context = %context,
            "📣 ORCHESTRATION_EVENT"
        );
    }
}

/// Fan-out publisher for orchestration events.
///
/// Subscribers receive events over a broadcast channel; registered sinks are
/// called synchronously. Publishing never fails: no subscribers is fine.
#[derive(Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("subscribers", &self.sender.receiver_count())
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn publish(&self, event: OrchestrationEvent) {
        let published = PublishedEvent {
            name: event.name(),
            event,
            published_at: chrono::Utc::now(),
        };

        for sink in &self.sinks {
            sink.emit(&published);
        }

        // send() only fails when nobody is subscribed
        let _ = self.sender.send(published);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000).with_sink(Arc::new(TracingEventSink))
    }
}
