//! Step executors.
//!
//! Each step is `execute(state) -> (state', hint)`: it reads the blackboard,
//! returns an updated copy, and appends exactly one scratchpad note. Steps
//! never persist anything themselves; the engine checkpoints their output.
//!
//! | Step | Reads | Writes |
//! |------|-------|--------|
//! | coordinator | scores, iteration | status, revision instructions |
//! | drafter | intent, instructions, human edit | drafts, iteration, status |
//! | safety_reviewer | current draft | safety score + flags, instructions |
//! | quality_reviewer | current draft | quality score, instructions |
//! | human_gate | pending decision | status, instructions, human edit |
//! | finalizer | current draft | final artifact, status |

mod coordinator;
mod drafter;
mod finalizer;
mod human_gate;
mod quality;
mod safety;

pub use coordinator::Coordinator;
pub use drafter::Drafter;
pub use finalizer::Finalizer;
pub use human_gate::HumanGate;
pub use quality::QualityReviewer;
pub use safety::SafetyReviewer;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::blackboard::{Blackboard, ReviewAction};
use crate::collaborators::Collaborators;
use crate::errors::StepError;
use crate::router::GatePolicy;

/// Maximum characters kept in a scratchpad raw input/output preview.
pub const PREVIEW_CHARS: usize = 500;

/// The closed set of workflow steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    Coordinator,
    Drafter,
    SafetyReviewer,
    QualityReviewer,
    HumanGate,
    Finalizer,
}

impl StepName {
    pub const ALL: [StepName; 6] = [
        Self::Coordinator,
        Self::Drafter,
        Self::SafetyReviewer,
        Self::QualityReviewer,
        Self::HumanGate,
        Self::Finalizer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coordinator => "coordinator",
            Self::Drafter => "drafter",
            Self::SafetyReviewer => "safety_reviewer",
            Self::QualityReviewer => "quality_reviewer",
            Self::HumanGate => "human_gate",
            Self::Finalizer => "finalizer",
        }
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| format!("Unknown step name: {}", s))
    }
}

/// What a step suggests should happen next. The router has the final say.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "action", rename_all = "snake_case")]
pub enum StepHint {
    #[default]
    Proceed,
    Revise,
    Escalate,
    /// The human gate consumed this decision.
    Decision(ReviewAction),
}

impl fmt::Display for StepHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Proceed => f.write_str("proceed"),
            Self::Revise => f.write_str("revise"),
            Self::Escalate => f.write_str("escalate"),
            Self::Decision(action) => write!(f, "decision:{}", action),
        }
    }
}

/// Result of one step execution.
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub state: Blackboard,
    pub hint: StepHint,
}

impl StepOutput {
    pub fn new(state: Blackboard, hint: StepHint) -> Self {
        Self { state, hint }
    }
}

/// A single workflow step.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    fn name(&self) -> StepName;

    async fn execute(&self, state: &Blackboard) -> Result<StepOutput, StepError>;
}

/// One executor per [`StepName`].
#[derive(Clone)]
pub struct StepSet {
    coordinator: Arc<dyn StepExecutor>,
    drafter: Arc<dyn StepExecutor>,
    safety: Arc<dyn StepExecutor>,
    quality: Arc<dyn StepExecutor>,
    human_gate: Arc<dyn StepExecutor>,
    finalizer: Arc<dyn StepExecutor>,
}

impl StepSet {
    /// Standard executors wired to the given collaborators.
    pub fn new(policy: GatePolicy, collaborators: Collaborators) -> Self {
        Self {
            coordinator: Arc::new(Coordinator::new(policy)),
            drafter: Arc::new(Drafter::new(collaborators.author)),
            safety: Arc::new(SafetyReviewer::new(policy, collaborators.safety)),
            quality: Arc::new(QualityReviewer::new(policy, collaborators.quality)),
            human_gate: Arc::new(HumanGate::new(policy)),
            finalizer: Arc::new(Finalizer),
        }
    }

    /// Replace the executor registered under `executor.name()`.
    pub fn with_executor(mut self, executor: Arc<dyn StepExecutor>) -> Self {
        match executor.name() {
            StepName::Coordinator => self.coordinator = executor,
            StepName::Drafter => self.drafter = executor,
            StepName::SafetyReviewer => self.safety = executor,
            StepName::QualityReviewer => self.quality = executor,
            StepName::HumanGate => self.human_gate = executor,
            StepName::Finalizer => self.finalizer = executor,
        }
        self
    }

    pub fn get(&self, step: StepName) -> &Arc<dyn StepExecutor> {
        match step {
            StepName::Coordinator => &self.coordinator,
            StepName::Drafter => &self.drafter,
            StepName::SafetyReviewer => &self.safety,
            StepName::QualityReviewer => &self.quality,
            StepName::HumanGate => &self.human_gate,
            StepName::Finalizer => &self.finalizer,
        }
    }
}

/// Check that `after` is a legal result of running `step` on `before`.
///
/// Any failure here is a contract violation and ends the run.
pub fn verify_step_effects(
    step: StepName,
    before: &Blackboard,
    after: &Blackboard,
) -> Result<(), StepError> {
    let fail = |message: String| Err(StepError::contract(step.as_str(), message));

    if after.run_id != before.run_id || after.intent != before.intent {
        return fail("run_id or intent changed".to_string());
    }
    if after.scratchpad.len() != before.scratchpad.len() + 1 {
        return fail(format!(
            "expected exactly one new scratchpad note, found {}",
            after.scratchpad.len() as i64 - before.scratchpad.len() as i64
        ));
    }
    if after.scratchpad[..before.scratchpad.len()] != before.scratchpad[..] {
        return fail("existing scratchpad notes were modified".to_string());
    }

    if step == StepName::Drafter {
        if after.iteration_count != before.iteration_count + 1 {
            return fail(format!(
                "iteration_count went from {} to {}",
                before.iteration_count, after.iteration_count
            ));
        }
        if after.drafts.len() != before.drafts.len() + 1
            || after.drafts[..before.drafts.len()] != before.drafts[..]
        {
            return fail("drafts must grow by exactly one appended version".to_string());
        }
    } else if after.iteration_count != before.iteration_count || after.drafts != before.drafts {
        return fail("only the drafter may change drafts or iteration_count".to_string());
    }

    if !before.run_status.can_transition_to(after.run_status) {
        return fail(format!(
            "illegal status transition {} -> {}",
            before.run_status, after.run_status
        ));
    }

    after
        .check_invariants()
        .or_else(|message| fail(message))
}

/// Parse a collaborator score, rejecting anything outside 0-100.
pub(crate) fn checked_score(step: StepName, score: i64) -> Result<u8, StepError> {
    u8::try_from(score)
        .ok()
        .filter(|s| *s <= 100)
        .ok_or_else(|| StepError::malformed(step.as_str(), format!("score {} outside 0-100", score)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::{RunStatus, ScratchpadNote};

    fn base() -> Blackboard {
        let mut bb = Blackboard::new("run-1", "Create thought record for anxiety");
        bb.note(ScratchpadNote::new("coordinator", "first pass"));
        bb
    }

    #[test]
    fn test_step_name_round_trips_through_str() {
        for step in StepName::ALL {
            assert_eq!(step.as_str().parse::<StepName>(), Ok(step));
        }
        assert!("editor".parse::<StepName>().is_err());
    }

    #[test]
    fn test_step_hint_serialization_shape() {
        let json = serde_json::to_string(&StepHint::Decision(ReviewAction::Reject)).unwrap();
        assert_eq!(json, r#"{"kind":"decision","action":"reject"}"#);
        let json = serde_json::to_string(&StepHint::Proceed).unwrap();
        assert_eq!(json, r#"{"kind":"proceed"}"#);
    }

    #[test]
    fn test_verify_accepts_well_behaved_drafter() {
        let before = base();
        let mut after = before.clone();
        after.push_draft("v1".into());
        after.iteration_count = 1;
        after.run_status = RunStatus::Reviewing;
        after.note(ScratchpadNote::new("drafter", "drafted"));
        assert!(verify_step_effects(StepName::Drafter, &before, &after).is_ok());
    }

    #[test]
    fn test_verify_rejects_missing_note() {
        let before = base();
        let after = before.clone();
        let err = verify_step_effects(StepName::Coordinator, &before, &after).unwrap_err();
        assert!(matches!(err, StepError::ContractViolation { .. }));
    }

    #[test]
    fn test_verify_rejects_reviewer_touching_drafts() {
        let before = base();
        let mut after = before.clone();
        after.push_draft("sneaky".into());
        after.note(ScratchpadNote::new("safety_reviewer", "scored"));
        let err = verify_step_effects(StepName::SafetyReviewer, &before, &after).unwrap_err();
        assert!(err.to_string().contains("only the drafter"));
    }

    #[test]
    fn test_verify_rejects_rewritten_history() {
        let before = base();
        let mut after = before.clone();
        after.scratchpad[0].message = "rewritten".into();
        after.note(ScratchpadNote::new("coordinator", "again"));
        assert!(verify_step_effects(StepName::Coordinator, &before, &after).is_err());
    }

    #[test]
    fn test_verify_rejects_illegal_status_edge() {
        let before = base();
        let mut after = before.clone();
        after.run_status = RunStatus::Approved;
        after.final_artifact = Some(String::new());
        after.note(ScratchpadNote::new("coordinator", "skipped ahead"));
        let err = verify_step_effects(StepName::Coordinator, &before, &after).unwrap_err();
        assert!(err.to_string().contains("drafting -> approved"));
    }

    #[test]
    fn test_checked_score_bounds() {
        assert_eq!(checked_score(StepName::SafetyReviewer, 0).unwrap(), 0);
        assert_eq!(checked_score(StepName::SafetyReviewer, 100).unwrap(), 100);
        assert!(checked_score(StepName::SafetyReviewer, 101).is_err());
        assert!(checked_score(StepName::QualityReviewer, -5).is_err());
    }
}
