//! Priority-tiered routing: queue descriptors and tier profiles.

pub mod descriptor;
pub mod profile;
pub mod router;

pub use descriptor::{QueueDescriptor, QueueKind};
pub use profile::PriorityProfile;
pub use router::QueueRouter;
