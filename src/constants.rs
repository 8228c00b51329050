//! # System Constants
//!
//! Event names, fiscal format limits and queue naming fragments shared by the
//! orchestrator components.

/// Orchestration events published to the observability sink
pub mod events {
    // Document lifecycle events
    pub const DOCUMENT_SUBMITTED: &str = "document.submitted";
    pub const DOCUMENT_TRANSITIONED: &str = "document.transitioned";
    pub const DOCUMENT_DEAD_LETTERED: &str = "document.dead_lettered";

    // Operation sub-record events
    pub const OPERATION_TRANSITIONED: &str = "operation.transitioned";

    // Queue events
    pub const MESSAGE_DISPATCHED: &str = "message.dispatched";
    pub const MESSAGE_DISCARDED: &str = "message.discarded";
    pub const RETRY_DECIDED: &str = "retry.decided";
}

/// Fiscal document format limits
pub mod fiscal {
    /// Number of digits in an access key
    pub const ACCESS_KEY_LENGTH: usize = 44;
    /// Largest document number representable in the access key (9 digits)
    pub const MAX_DOCUMENT_NUMBER: u64 = 999_999_999;
    /// Largest series representable in the access key (3 digits)
    pub const MAX_SERIES: u32 = 999;
    /// Minimum length of a cancellation justification
    pub const MIN_CANCELLATION_REASON: usize = 15;
    /// Maximum length of a cancellation justification
    pub const MAX_CANCELLATION_REASON: usize = 255;
}

/// Queue naming fragments
pub mod queues {
    pub const DEFAULT_PREFIX: &str = "fiscal";
    pub const DEFAULT_EXCHANGE: &str = "fiscal.direct";
    pub const DEFAULT_DEAD_LETTER_EXCHANGE: &str = "fiscal.dlx";
    pub const DEAD_LETTER_SUFFIX: &str = "dlq";
}
