//! Typed error hierarchy for Reposmith.
//!
//! One enum per subsystem:
//! - `WorkflowError`: session lookup, state machine and plan gating failures
//! - `PolicyError`: policy catalog loading failures
//! - `StoreError`: durable session persistence failures
//! - `LlmError`: language model provider failures, classified for retry

use std::path::PathBuf;

use thiserror::Error;

use crate::session::SessionStatus;

/// Errors from the session/plan workflow.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Session {id} not found")]
    SessionNotFound { id: String },

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("Session is in terminal state {status}; no further transitions are permitted")]
    TerminalState { status: SessionStatus },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Plan blocked by {} policy failure(s): {}", .failures.len(), .failures.join("; "))]
    PolicyBlocked { failures: Vec<String> },

    #[error("Session {id} has no execution plan")]
    NoPlan { id: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from loading a policy catalog.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Failed to read policy file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse policy file at {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Unsupported policy file format at {path}; expected .json, .yaml or .yml")]
    UnsupportedFormat { path: PathBuf },

    #[error("Policy catalog lock poisoned")]
    LockPoisoned,
}

/// Errors from the durable session backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to serialize session {id}: {source}")]
    Serialize {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt session file at {path}: {message}")]
    Corrupt { path: PathBuf, message: String },
}

/// Errors from an LLM provider call.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM request timed out")]
    Timeout,

    #[error("LLM provider rate limit exceeded")]
    RateLimited,

    #[error("Network error talking to LLM provider: {0}")]
    Network(String),

    #[error("LLM provider is overloaded")]
    Overloaded,

    #[error("LLM authentication failed: {0}")]
    Auth(String),

    #[error("Invalid LLM request: {0}")]
    InvalidRequest(String),

    #[error("LLM provider returned status {status}: {message}")]
    Provider { status: u16, message: String },
}

impl LlmError {
    /// Whether the failure belongs to the retryable class
    /// (timeout, rate limit, transient network failure, provider overloaded).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::Timeout | LlmError::RateLimited | LlmError::Network(_) | LlmError::Overloaded
        )
    }

    /// Classify an HTTP status code returned by a provider.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => LlmError::Auth(message),
            400 | 404 | 422 => LlmError::InvalidRequest(message),
            408 | 504 => LlmError::Timeout,
            429 => LlmError::RateLimited,
            503 | 529 => LlmError::Overloaded,
            _ => LlmError::Provider { status, message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_error_invalid_transition_names_both_states() {
        let err = WorkflowError::InvalidTransition {
            from: SessionStatus::Intake,
            to: SessionStatus::Executing,
        };
        let msg = err.to_string();
        assert!(msg.contains("Intake"));
        assert!(msg.contains("Executing"));
    }

    #[test]
    fn workflow_error_policy_blocked_lists_failures() {
        let err = WorkflowError::PolicyBlocked {
            failures: vec!["naming".into(), "ci".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 policy failure"));
        assert!(msg.contains("naming; ci"));
    }

    #[test]
    fn workflow_error_converts_from_anyhow() {
        let err: WorkflowError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, WorkflowError::Other(_)));
    }

    #[test]
    fn llm_error_transient_classification() {
        assert!(LlmError::Timeout.is_transient());
        assert!(LlmError::RateLimited.is_transient());
        assert!(LlmError::Network("reset".into()).is_transient());
        assert!(LlmError::Overloaded.is_transient());
        assert!(!LlmError::Auth("bad key".into()).is_transient());
        assert!(!LlmError::InvalidRequest("x".into()).is_transient());
        assert!(
            !LlmError::Provider {
                status: 500,
                message: "x".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn llm_error_from_status_maps_known_codes() {
        assert!(matches!(LlmError::from_status(429, ""), LlmError::RateLimited));
        assert!(matches!(LlmError::from_status(529, ""), LlmError::Overloaded));
        assert!(matches!(LlmError::from_status(503, ""), LlmError::Overloaded));
        assert!(matches!(LlmError::from_status(401, ""), LlmError::Auth(_)));
        assert!(matches!(
            LlmError::from_status(500, "oops"),
            LlmError::Provider { status: 500, .. }
        ));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&WorkflowError::Validation("x".into()));
        assert_std_error(&PolicyError::LockPoisoned);
        assert_std_error(&StoreError::Corrupt {
            path: PathBuf::from("a.json"),
            message: "bad".into(),
        });
        assert_std_error(&LlmError::Timeout);
    }
}
