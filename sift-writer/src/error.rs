//! Segregation error types.
//!
//! Every failure in a segregation run is fatal to the run: errors are never
//! retried internally and the engine does not resume mid-stream. The one
//! structural nicety is [`SegregateError::Cleanup`], which keeps the
//! original failure as the primary error when the best-effort close of the
//! sub-writers also fails.

use sift_core::ClassId;
use sift_keys::KeyError;
use thiserror::Error;

/// Result type for segregation operations.
pub type SegregateResult<T> = Result<T, SegregateError>;

/// Errors that abort a segregation run.
#[derive(Debug, Error)]
pub enum SegregateError {
    /// Partition-key bytes did not match the expected encoding.
    #[error(transparent)]
    Key(#[from] KeyError),

    /// The producer yielded a fragment violating the required total order.
    ///
    /// Always indicates a bug in the upstream producer or a corrupted
    /// source; never recoverable.
    #[error("out-of-order input: {detail}")]
    OutOfOrderInput {
        /// What the producer got wrong.
        detail: String,
    },

    /// The injected classifier failed or returned an out-of-range class.
    #[error("classifier failed: {detail}")]
    Classifier {
        /// What the classifier got wrong.
        detail: String,
    },

    /// A sub-writer failed to be created, accept a fragment, or close.
    #[error("sub-writer {class} failed during {operation}: {detail}")]
    Writer {
        /// The class whose writer failed.
        class: ClassId,
        /// Which writer operation failed: `create`, `accept`, or `close`.
        operation: &'static str,
        /// The writer's own description of the failure.
        detail: String,
    },

    /// A fragment exceeded a configured resource limit.
    #[error("limit exceeded: {limit} (max={max}, actual={actual})")]
    LimitExceeded {
        /// Which limit was exceeded.
        limit: &'static str,
        /// The maximum allowed value.
        max: u64,
        /// The actual value that exceeded the limit.
        actual: u64,
    },

    /// The caller's abort signal was observed between fragments.
    #[error("segregation aborted by caller")]
    Aborted,

    /// The run failed and the cleanup path failed too.
    ///
    /// The primary error is the one that stopped the run; the cleanup error
    /// is attached as secondary context, never replacing it.
    #[error("{primary}; cleanup also failed: {cleanup}")]
    Cleanup {
        /// The error that stopped the run.
        primary: Box<SegregateError>,
        /// The first failure from the close-all path.
        cleanup: Box<SegregateError>,
    },
}

impl SegregateError {
    /// Returns the error that stopped the run, unwrapping cleanup context.
    #[must_use]
    pub fn primary(&self) -> &Self {
        match self {
            Self::Cleanup { primary, .. } => primary,
            other => other,
        }
    }
}

/// Error raised by a sub-writer while accepting a fragment or closing, or
/// by a writer factory while constructing one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct WriterError {
    /// Human-readable description of the failure.
    pub message: String,
}

impl WriterError {
    /// Creates a writer error from a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error raised by a classifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ClassifyError {
    /// Human-readable description of the failure.
    pub message: String,
}

impl ClassifyError {
    /// Creates a classify error from a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_keeps_primary() {
        let err = SegregateError::Cleanup {
            primary: Box::new(SegregateError::Aborted),
            cleanup: Box::new(SegregateError::Writer {
                class: ClassId::new(0),
                operation: "close",
                detail: "disk full".to_string(),
            }),
        };
        assert!(matches!(err.primary(), SegregateError::Aborted));
        let msg = format!("{err}");
        assert!(msg.contains("aborted"));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn test_key_error_propagates_transparently() {
        let key_err = KeyError::ComponentCount {
            expected: 2,
            found: 1,
        };
        let err = SegregateError::from(key_err.clone());
        assert_eq!(format!("{err}"), format!("{key_err}"));
    }

    #[test]
    fn test_writer_error_display() {
        let err = SegregateError::Writer {
            class: ClassId::new(3),
            operation: "accept",
            detail: "simulated".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("class-3"));
        assert!(msg.contains("accept"));
    }
}
