//! Session model and lifecycle state machine.
//!
//! A `Session` is the unit of conversation and execution: it collects the
//! caller's messages, the requirements extracted from them, the proposed or
//! approved `ExecutionPlan`, and the final `DeliveryResult`. Its `status`
//! field is only ever changed through [`Session::transition_to`], which
//! rejects illegal transitions instead of mutating silently.

pub mod plan;
pub mod requirements;
pub mod state;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::orchestrator::ModuleResult;

pub use plan::{ExecutionPlan, ExecutionStep, PipelineDefinition, RepositoryTarget, StepOperation};
pub use requirements::{KeyValueExtractor, ProjectRequirements, RequirementsExtractor, Visibility};
pub use state::SessionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Outcome of a completed (or partially completed) execution.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub repository_url: Option<String>,
    pub pipeline_url: Option<String>,
    pub files_written: Vec<String>,
    pub module_results: Vec<ModuleResult>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DeliveryResult {
    pub fn failed_modules(&self) -> Vec<&ModuleResult> {
        self.module_results.iter().filter(|r| !r.success).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<ProjectRequirements>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<ExecutionPlan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<DeliveryResult>,
    /// Reason recorded when the session entered `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl Session {
    pub fn new(owner_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id,
            status: SessionStatus::Intake,
            created_at: now,
            last_activity: now,
            messages: Vec::new(),
            requirements: None,
            plan: None,
            delivery: None,
            failure_reason: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    pub fn push_message(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(Message::new(role, content));
        self.touch();
    }

    /// Move the session to `next`, returning the previous status.
    ///
    /// Fails with `TerminalState` when the session is already `Completed` or
    /// `Failed`, and with `InvalidTransition` for any other edge not in the
    /// lifecycle graph. The session is left untouched on error.
    pub fn transition_to(
        &mut self,
        next: SessionStatus,
    ) -> Result<SessionStatus, crate::errors::WorkflowError> {
        let previous = self.status;
        previous.check_transition(next)?;
        self.status = next;
        self.touch();
        Ok(previous)
    }

    /// Transition to `Failed` from any non-terminal status, recording `reason`.
    pub fn fail(
        &mut self,
        reason: impl Into<String>,
    ) -> Result<SessionStatus, crate::errors::WorkflowError> {
        let previous = self.transition_to(SessionStatus::Failed)?;
        self.failure_reason = Some(reason.into());
        Ok(previous)
    }

    pub fn user_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role == Role::User)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::WorkflowError;

    #[test]
    fn test_new_session_starts_in_intake() {
        let session = Session::new(Some("alice".into()));
        assert_eq!(session.status, SessionStatus::Intake);
        assert_eq!(session.owner_id.as_deref(), Some("alice"));
        assert!(session.messages.is_empty());
        assert!(session.plan.is_none());
        assert_eq!(session.id.len(), 36);
    }

    #[test]
    fn test_push_message_updates_last_activity() {
        let mut session = Session::new(None);
        let before = session.last_activity;
        session.push_message(Role::User, "name: demo");
        assert_eq!(session.messages.len(), 1);
        assert!(session.last_activity >= before);
        assert_eq!(session.user_messages().count(), 1);
    }

    #[test]
    fn test_transition_to_rejects_illegal_edge_without_mutation() {
        let mut session = Session::new(None);
        let err = session.transition_to(SessionStatus::Executing).unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::InvalidTransition {
                from: SessionStatus::Intake,
                to: SessionStatus::Executing
            }
        ));
        assert_eq!(session.status, SessionStatus::Intake);
    }

    #[test]
    fn test_fail_records_reason_and_blocks_further_transitions() {
        let mut session = Session::new(None);
        session.transition_to(SessionStatus::Planning).unwrap();
        session.fail("disk full").unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.failure_reason.as_deref(), Some("disk full"));

        let err = session.transition_to(SessionStatus::Planning).unwrap_err();
        assert!(matches!(err, WorkflowError::TerminalState { .. }));
        assert!(session.fail("again").is_err());
        assert_eq!(session.failure_reason.as_deref(), Some("disk full"));
    }

    #[test]
    fn test_session_json_roundtrip_preserves_fields() {
        let mut session = Session::new(Some("bob".into()));
        session.push_message(Role::User, "name: demo\nlanguage: rust");
        session.push_message(Role::Assistant, "Got it");
        let json = serde_json::to_string(&session).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(back, session);
    }
}
