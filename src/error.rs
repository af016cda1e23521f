//! Error types for prpflow.
//!
//! Uses thiserror for derive macros and provides user-actionable error messages.

use crate::exit_codes;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Main error type for prpflow operations.
///
/// Each variant maps to an exit code; [`FlowError::is_retryable`] tells the
/// coordinator whether a failure may be resubmitted.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FlowError {
    /// User provided invalid arguments or the system is in an invalid state.
    #[error("{0}")]
    UserError(String),

    /// Generic validation failure (config, PRP documents, store input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Task specification failed structural validation. Never retried.
    #[error("malformed task '{task_id}': {}", errors.join("; "))]
    MalformedTask { task_id: String, errors: Vec<String> },

    /// The declared dependency graph of a feature contains a cycle.
    #[error("cyclic dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    /// Another agent already holds the claim on this task.
    #[error("task '{task_id}' is already claimed{}", holder.as_ref().map(|h| format!(" by {h}")).unwrap_or_default())]
    AlreadyClaimed {
        task_id: String,
        holder: Option<String>,
    },

    /// Knowledge retrieval did not finish in time.
    #[error("knowledge retrieval timed out after {timeout_ms}ms")]
    RetrievalTimeout { timeout_ms: u64 },

    /// An embedding does not have the store's configured width.
    #[error(
        "validation failed: embedding has {actual} dimensions, store expects {expected}\n\nFix: use the same embedder for writes and queries, or set knowledge.embedding_dimension to {actual}."
    )]
    EmbeddingMismatch { expected: usize, actual: usize },

    /// The agent reported a failed execution.
    #[error("execution failed: {0}")]
    ExecutionFailure(String),

    /// Post-execution validation rejected the result.
    #[error("gate failed: {0}")]
    GateFailure(String),

    /// The transport gave up delivering a message.
    #[error("delivery to '{topic}' exhausted after {attempts} attempts")]
    DeliveryExhausted { topic: String, attempts: u32 },

    /// A feature, task or knowledge entry does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The owning feature was cancelled.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// The message bus or a channel has shut down.
    #[error("transport error: {0}")]
    Transport(String),
}

impl FlowError {
    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            FlowError::UserError(_) | FlowError::NotFound(_) | FlowError::Transport(_) => {
                exit_codes::USER_ERROR
            }
            FlowError::Validation(_)
            | FlowError::MalformedTask { .. }
            | FlowError::CyclicDependency { .. }
            | FlowError::EmbeddingMismatch { .. } => exit_codes::VALIDATION_FAILURE,
            FlowError::RetrievalTimeout { .. }
            | FlowError::ExecutionFailure(_)
            | FlowError::GateFailure(_)
            | FlowError::DeliveryExhausted { .. }
            | FlowError::Cancelled(_) => exit_codes::TASK_FAILURE,
            FlowError::AlreadyClaimed { .. } => exit_codes::CLAIM_CONFLICT,
        }
    }

    /// Whether a task that failed with this error may be re-queued.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FlowError::ExecutionFailure(_)
                | FlowError::GateFailure(_)
                | FlowError::DeliveryExhausted { .. }
                | FlowError::RetrievalTimeout { .. }
        )
    }

    /// Taxonomy class for errors that end a task execution.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            FlowError::MalformedTask { .. }
            | FlowError::Validation(_)
            | FlowError::EmbeddingMismatch { .. }
            | FlowError::CyclicDependency { .. } => FailureKind::Malformed,
            FlowError::GateFailure(_) => FailureKind::Gate,
            FlowError::DeliveryExhausted { .. } | FlowError::Transport(_) => {
                FailureKind::DeliveryExhausted
            }
            FlowError::RetrievalTimeout { .. } => FailureKind::Timeout,
            FlowError::Cancelled(_) => FailureKind::Cancelled,
            _ => FailureKind::Execution,
        }
    }
}

/// Serializable class of a failed execution, carried in result payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Malformed,
    Execution,
    Gate,
    DeliveryExhausted,
    Timeout,
    Cancelled,
}

impl FailureKind {
    /// Structural failures and cancellations are final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::Execution
                | FailureKind::Gate
                | FailureKind::DeliveryExhausted
                | FailureKind::Timeout
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Malformed => "malformed",
            FailureKind::Execution => "execution",
            FailureKind::Gate => "gate",
            FailureKind::DeliveryExhausted => "delivery_exhausted",
            FailureKind::Timeout => "timeout",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type alias for prpflow operations.
pub type Result<T> = std::result::Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_error_has_correct_exit_code() {
        let err = FlowError::UserError("bad argument".to_string());
        assert_eq!(err.exit_code(), exit_codes::USER_ERROR);
    }

    #[test]
    fn structural_errors_are_validation_failures() {
        let malformed = FlowError::MalformedTask {
            task_id: "t1".into(),
            errors: vec!["title is required".into()],
        };
        let cycle = FlowError::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(malformed.exit_code(), exit_codes::VALIDATION_FAILURE);
        assert_eq!(cycle.exit_code(), exit_codes::VALIDATION_FAILURE);
        assert!(!malformed.is_retryable());
        assert!(!cycle.is_retryable());
    }

    #[test]
    fn already_claimed_is_claim_conflict() {
        let err = FlowError::AlreadyClaimed {
            task_id: "t1".into(),
            holder: Some("coder-1".into()),
        };
        assert_eq!(err.exit_code(), exit_codes::CLAIM_CONFLICT);
        assert_eq!(err.to_string(), "task 't1' is already claimed by coder-1");
    }

    #[test]
    fn transient_errors_are_retryable() {
        assert!(FlowError::ExecutionFailure("boom".into()).is_retryable());
        assert!(FlowError::GateFailure("criterion unmet".into()).is_retryable());
        assert!(
            FlowError::DeliveryExhausted {
                topic: "tasks.coder".into(),
                attempts: 5
            }
            .is_retryable()
        );
        assert!(!FlowError::Cancelled("feature f1".into()).is_retryable());
    }

    #[test]
    fn failure_kind_follows_taxonomy() {
        assert_eq!(
            FlowError::GateFailure("x".into()).failure_kind(),
            FailureKind::Gate
        );
        assert_eq!(
            FlowError::ExecutionFailure("x".into()).failure_kind(),
            FailureKind::Execution
        );
        assert!(!FailureKind::Malformed.is_retryable());
        assert!(FailureKind::DeliveryExhausted.is_retryable());
    }

    #[test]
    fn error_messages_are_descriptive() {
        let err = FlowError::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "cyclic dependency: a -> b -> a");

        let err = FlowError::EmbeddingMismatch {
            expected: 8,
            actual: 4,
        };
        assert!(err.to_string().contains("Fix:"));
    }
}
