use serde::{Deserialize, Serialize};

use crate::errors::WorkflowError;

/// Lifecycle status of a session.
///
/// ```text
/// Intake ─> Planning ─> AwaitingApproval ─> Executing ─> Delivering ─> Completed
///              ^               │
///              └── rejected ───┘
/// (any non-terminal) ─> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    Intake,
    Planning,
    AwaitingApproval,
    Executing,
    Delivering,
    Completed,
    Failed,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 7] = [
        SessionStatus::Intake,
        SessionStatus::Planning,
        SessionStatus::AwaitingApproval,
        SessionStatus::Executing,
        SessionStatus::Delivering,
        SessionStatus::Completed,
        SessionStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intake => "Intake",
            Self::Planning => "Planning",
            Self::AwaitingApproval => "AwaitingApproval",
            Self::Executing => "Executing",
            Self::Delivering => "Delivering",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (*self, next) {
            (Completed | Failed, _) => false,
            (_, Failed) => true,
            (Intake, Planning)
            | (Planning, AwaitingApproval)
            | (AwaitingApproval, Executing)
            | (AwaitingApproval, Planning)
            | (Executing, Delivering)
            | (Delivering, Completed) => true,
            _ => false,
        }
    }

    pub fn check_transition(&self, next: SessionStatus) -> Result<(), WorkflowError> {
        if self.is_terminal() {
            return Err(WorkflowError::TerminalState { status: *self });
        }
        if !self.can_transition_to(next) {
            return Err(WorkflowError::InvalidTransition {
                from: *self,
                to: next,
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| anyhow::anyhow!("Invalid session status '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionStatus::*;

    #[test]
    fn test_happy_path_edges_are_legal() {
        let path = [
            Intake,
            Planning,
            AwaitingApproval,
            Executing,
            Delivering,
            Completed,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} should be legal",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_rejection_returns_to_planning() {
        assert!(AwaitingApproval.can_transition_to(Planning));
        assert!(!Executing.can_transition_to(Planning));
    }

    #[test]
    fn test_every_non_terminal_state_can_fail() {
        for status in SessionStatus::ALL {
            assert_eq!(status.can_transition_to(Failed), !status.is_terminal());
        }
    }

    #[test]
    fn test_terminal_states_allow_nothing() {
        for from in [Completed, Failed] {
            for to in SessionStatus::ALL {
                assert!(!from.can_transition_to(to));
                assert!(matches!(
                    from.check_transition(to),
                    Err(WorkflowError::TerminalState { .. })
                ));
            }
        }
    }

    #[test]
    fn test_skipping_states_is_invalid() {
        assert!(matches!(
            Intake.check_transition(AwaitingApproval),
            Err(WorkflowError::InvalidTransition { .. })
        ));
        assert!(matches!(
            Planning.check_transition(Executing),
            Err(WorkflowError::InvalidTransition { .. })
        ));
        assert!(matches!(
            Executing.check_transition(Completed),
            Err(WorkflowError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_from_str_is_case_insensitive() {
        assert_eq!("awaitingapproval".parse::<SessionStatus>().unwrap(), AwaitingApproval);
        assert_eq!("Completed".parse::<SessionStatus>().unwrap(), Completed);
        assert!("bogus".parse::<SessionStatus>().is_err());
    }
}
