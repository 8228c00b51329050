pub mod publisher;
pub mod types;

pub use publisher::{EventPublisher, EventSink, TracingEventSink};
pub use types::{OrchestrationEvent, PublishedEvent};
