//! # Messaging
//!
//! Queue messages, the [`Transport`] seam over the broker, and an in-memory
//! transport.

pub mod errors;
pub mod in_memory;
pub mod message;
pub mod transport;
pub mod types;

pub use errors::{MessagingError, MessagingResult};
pub use in_memory::InMemoryTransport;
pub use message::{DeadLetterAnnotation, MessageMetadata, MessagePayload, QueueMessage};
pub use transport::Transport;
pub use types::{Delivery, MessageId, QueueStats, ReceiptHandle};
