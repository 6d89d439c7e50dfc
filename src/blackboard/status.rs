use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a run, stored on the blackboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Drafting,
    Reviewing,
    AwaitingHuman,
    NeedsRevision,
    Approved,
    Rejected,
    Cancelled,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drafting => "drafting",
            Self::Reviewing => "reviewing",
            Self::AwaitingHuman => "awaiting_human",
            Self::NeedsRevision => "needs_revision",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    /// Terminal runs are immutable and reject further resumes.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Approved | Self::Rejected | Self::Cancelled | Self::Failed
        )
    }

    /// Whether `self -> to` is an edge of the run state machine.
    ///
    /// Self-transitions are always legal for non-terminal states, since most
    /// reviewer passes leave the status where it was.
    pub fn can_transition_to(&self, to: RunStatus) -> bool {
        use RunStatus::*;
        if self.is_terminal() {
            return false;
        }
        if *self == to || to == Failed {
            return true;
        }
        matches!(
            (self, to),
            (Drafting, Reviewing)
                | (Reviewing, NeedsRevision)
                | (Reviewing, AwaitingHuman)
                | (Reviewing, Approved)
                | (NeedsRevision, Reviewing)
                | (NeedsRevision, AwaitingHuman)
                | (AwaitingHuman, Reviewing)
                | (AwaitingHuman, Drafting)
                | (AwaitingHuman, Rejected)
                | (AwaitingHuman, Cancelled)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drafting" => Ok(Self::Drafting),
            "reviewing" => Ok(Self::Reviewing),
            "awaiting_human" => Ok(Self::AwaitingHuman),
            "needs_revision" => Ok(Self::NeedsRevision),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "cancelled" => Ok(Self::Cancelled),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid run status: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(RunStatus::Approved.is_terminal());
        assert!(RunStatus::Rejected.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::AwaitingHuman.is_terminal());
        assert!(!RunStatus::Drafting.is_terminal());
    }

    #[test]
    fn test_valid_transitions() {
        assert!(RunStatus::Drafting.can_transition_to(RunStatus::Reviewing));
        assert!(RunStatus::Reviewing.can_transition_to(RunStatus::NeedsRevision));
        assert!(RunStatus::NeedsRevision.can_transition_to(RunStatus::AwaitingHuman));
        assert!(RunStatus::AwaitingHuman.can_transition_to(RunStatus::Drafting));
        assert!(RunStatus::AwaitingHuman.can_transition_to(RunStatus::Cancelled));
        assert!(RunStatus::Reviewing.can_transition_to(RunStatus::Approved));
    }

    #[test]
    fn test_failed_reachable_from_any_live_state() {
        for status in [
            RunStatus::Drafting,
            RunStatus::Reviewing,
            RunStatus::AwaitingHuman,
            RunStatus::NeedsRevision,
        ] {
            assert!(status.can_transition_to(RunStatus::Failed), "{}", status);
        }
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!RunStatus::Drafting.can_transition_to(RunStatus::Approved));
        assert!(!RunStatus::Drafting.can_transition_to(RunStatus::AwaitingHuman));
        assert!(!RunStatus::NeedsRevision.can_transition_to(RunStatus::Cancelled));
        assert!(!RunStatus::Approved.can_transition_to(RunStatus::Drafting));
        assert!(!RunStatus::Cancelled.can_transition_to(RunStatus::Cancelled));
    }

    #[test]
    fn test_status_string_forms_agree() {
        for status in [
            RunStatus::Drafting,
            RunStatus::AwaitingHuman,
            RunStatus::NeedsRevision,
            RunStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<RunStatus>(), Ok(status));
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        assert!("paused".parse::<RunStatus>().is_err());
    }
}
