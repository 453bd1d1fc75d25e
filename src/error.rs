//! Error types.
//!
//! Scheduling outcomes normally travel through [`crate::request::Decision`]; these enums cover
//! configuration problems and the convenience execution path, where a rejected or cancelled
//! request has to stay distinguishable from a generic failure.

use thiserror::Error;

/// Invalid or unreadable queue-set configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("hand size {hand_size} must be between 1 and the number of queues ({queues})")]
    InvalidHandSize { hand_size: usize, queues: usize },

    #[error("hand size {hand_size} over {queues} queues needs more than {max_bits} bits of hash")]
    InsufficientEntropy {
        hand_size: usize,
        queues: usize,
        max_bits: u32,
    },

    #[error("queue length limit must be positive when queuing is enabled")]
    ZeroQueueLength,

    #[error("estimated service time must be positive")]
    ZeroServiceTime,

    #[error("per-queue concurrency limit must be positive when set")]
    ZeroQueueConcurrency,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why a request did not run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// Queue or concurrency limits were exceeded.
    #[error("request rejected by queue set {queue_set}")]
    Rejected { queue_set: String },

    /// The caller's cancellation signal fired while the request was still queued.
    #[error("request cancelled while queued in queue set {queue_set}")]
    Cancelled { queue_set: String },
}

impl AdmissionError {
    /// Only rejection warrants a retry hint; cancellation came from the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AdmissionError::Rejected { .. })
    }
}

/// Result alias for configuration loading.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rejection_is_retryable() {
        let rejected = AdmissionError::Rejected {
            queue_set: "workload-low".into(),
        };
        let cancelled = AdmissionError::Cancelled {
            queue_set: "workload-low".into(),
        };
        assert!(rejected.is_retryable());
        assert!(!cancelled.is_retryable());
        assert_eq!(
            rejected.to_string(),
            "request rejected by queue set workload-low"
        );
    }

    #[test]
    fn hand_size_message_names_both_values() {
        let err = ConfigError::InvalidHandSize {
            hand_size: 9,
            queues: 4,
        };
        assert!(err.to_string().contains("9"));
        assert!(err.to_string().contains("(4)"));
    }
}
