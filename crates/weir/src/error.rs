//! Engine error types.

use thiserror::Error;

use crate::definition::NodeId;
use crate::validate::ValidationReport;

/// Type alias for boxed dynamic errors that can be sent across threads.
///
/// Used as the source of item-level failures raised inside user node
/// implementations, so arbitrary error types can flow through the engine
/// without losing the original cause.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for engine operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur while building, configuring, or running a pipeline.
///
/// Every variant carries a stable identifier code (see [`Error::code`]) so
/// hosts can match on failures without parsing messages.
#[derive(Debug, Error)]
pub enum Error {
    /// The graph failed validation at build time.
    #[error("pipeline validation failed: {0}")]
    Validation(ValidationReport),

    /// Engine or option configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A node has neither a preconfigured instance nor a registered
    /// constructor the factory could use.
    #[error("node {node_id} ({name}) cannot be constructed: {reason}")]
    NodeNotConstructible {
        /// ID of the node that could not be constructed.
        node_id: NodeId,
        /// Display name of the node.
        name: String,
        /// Why construction failed.
        reason: String,
    },

    /// A configuration operation targeted a node the builder does not know.
    #[error("unknown node target: {node_id}")]
    UnknownNode {
        /// The unknown node ID.
        node_id: NodeId,
    },

    /// A preconfigured instance was attached to a node that already has one.
    #[error("node {node_id} already has a preconfigured instance")]
    PreconfiguredInstanceCollision {
        /// ID of the node with the colliding instance.
        node_id: NodeId,
    },

    /// A batching transform was invoked through the item-at-a-time API.
    #[error("batching transforms cannot be executed item-at-a-time")]
    BatchingNotSupported,

    /// An unbatching transform was invoked through the item-at-a-time API.
    #[error("unbatching transforms cannot be executed item-at-a-time")]
    UnbatchingNotSupported,

    /// An item moving through a pipe did not carry the expected element type.
    #[error("pipe element type mismatch: expected {expected}, got {actual}")]
    PipeTypeMismatch {
        /// Type the pipe was declared to carry.
        expected: &'static str,
        /// Type actually observed.
        actual: &'static str,
    },

    /// A pipe that does not support rewinding was asked to restart.
    #[error("streaming pipes cannot be restarted")]
    PipeNotRestartable,

    /// An item was discarded by a drop queue policy under overload.
    ///
    /// Non-retryable; surfaced to the item error handler so it can observe
    /// or dead-letter the discarded item.
    #[error("item dropped by queue policy at node {node_id}")]
    DroppedByPolicy {
        /// Node whose queue dropped the item.
        node_id: NodeId,
    },

    /// An item failed inside a node and the error handler chose to fail.
    #[error("item failed at node {node_id} ({name}): {source}")]
    ItemFailed {
        /// ID of the node the item failed in.
        node_id: NodeId,
        /// Display name of the node.
        name: String,
        /// The underlying failure.
        source: BoxedError,
    },

    /// Retry or restart attempts for a node were exhausted.
    #[error("node {node_id} ({name}) exhausted its {attempts} allowed attempts: {source}")]
    RetryLimitExhausted {
        /// ID of the exhausted node.
        node_id: NodeId,
        /// Display name of the node.
        name: String,
        /// Attempts that were allowed before giving up.
        attempts: u32,
        /// The failure observed on the final attempt.
        source: BoxedError,
    },

    /// A node-fatal failure terminated pipeline execution.
    #[error("pipeline execution failed at node {node_id} ({name}): {source}")]
    NodeFailed {
        /// ID of the failed node.
        node_id: NodeId,
        /// Display name of the node.
        name: String,
        /// The underlying failure.
        source: BoxedError,
    },

    /// The dead-letter sink reached its configured capacity.
    #[error("dead-letter sink reached its capacity of {capacity} entries")]
    DeadLetterCapacityExceeded {
        /// Configured capacity.
        capacity: usize,
    },

    /// A resilient node buffered more pending items than its cap allows.
    #[error("node {node_id} exceeded its materialization cap of {cap} pending items")]
    MaterializationCapExceeded {
        /// ID of the node that overflowed.
        node_id: NodeId,
        /// Configured cap.
        cap: usize,
    },

    /// One or more registered resources failed to dispose.
    #[error("{} resource(s) failed to dispose", errors.len())]
    DisposalFailed {
        /// Individual disposal failures, in release (LIFO) order.
        errors: Vec<Error>,
    },

    /// A failure raised inside a user node implementation, before the
    /// engine attaches node context.
    #[error("node implementation error: {0}")]
    User(BoxedError),

    /// Execution was cancelled.
    #[error("pipeline execution cancelled")]
    Cancelled,

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the stable identifier code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "Validation",
            Self::InvalidConfiguration(_) => "InvalidConfiguration",
            Self::NodeNotConstructible { .. } => "NodeNotConstructible",
            Self::UnknownNode { .. } => "UnknownNode",
            Self::PreconfiguredInstanceCollision { .. } => "PreconfiguredInstanceCollision",
            Self::BatchingNotSupported => "BatchingNotSupported",
            Self::UnbatchingNotSupported => "UnbatchingNotSupported",
            Self::PipeTypeMismatch { .. } => "PipeTypeMismatch",
            Self::PipeNotRestartable => "PipeNotRestartable",
            Self::DroppedByPolicy { .. } => "DroppedByPolicy",
            Self::ItemFailed { .. } => "ItemFailed",
            Self::RetryLimitExhausted { .. } => "RetryLimitExhausted",
            Self::NodeFailed { .. } => "NodeFailed",
            Self::DeadLetterCapacityExceeded { .. } => "DeadLetterCapacityExceeded",
            Self::MaterializationCapExceeded { .. } => "MaterializationCapExceeded",
            Self::DisposalFailed { .. } => "DisposalFailed",
            Self::User(_) => "User",
            Self::Cancelled => "Cancelled",
            Self::Internal(_) => "Internal",
        }
    }

    /// Wraps a user-supplied failure as an item-level error for a node.
    pub(crate) fn item_failed(node_id: NodeId, name: &str, source: BoxedError) -> Self {
        Self::ItemFailed {
            node_id,
            name: name.to_owned(),
            source,
        }
    }

    /// Returns whether this error was caused by cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Extracts the user-raised cause, unwrapping engine context.
    pub(crate) fn into_boxed(self) -> BoxedError {
        match self {
            Self::User(source) => source,
            other => Box::new(other),
        }
    }
}

impl From<BoxedError> for Error {
    fn from(source: BoxedError) -> Self {
        Self::User(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(Error::Cancelled.code(), "Cancelled");
        assert_eq!(Error::BatchingNotSupported.code(), "BatchingNotSupported");
        let err = Error::DeadLetterCapacityExceeded { capacity: 8 };
        assert_eq!(err.code(), "DeadLetterCapacityExceeded");
    }

    #[test]
    fn test_disposal_message_counts_failures() {
        let err = Error::DisposalFailed {
            errors: vec![Error::Cancelled, Error::Internal("x".into())],
        };
        assert!(err.to_string().contains("2 resource(s)"));
    }
}
