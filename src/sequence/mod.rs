pub mod allocator;

pub use allocator::SequenceAllocator;
