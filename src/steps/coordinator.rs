use async_trait::async_trait;

use super::{StepExecutor, StepHint, StepName, StepOutput};
use crate::blackboard::{Blackboard, RunStatus, ScratchpadNote};
use crate::errors::StepError;
use crate::router::{GatePolicy, Verdict};

/// Reads the latest scores and decides between another draft and the human gate.
pub struct Coordinator {
    policy: GatePolicy,
}

impl Coordinator {
    pub fn new(policy: GatePolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl StepExecutor for Coordinator {
    fn name(&self) -> StepName {
        StepName::Coordinator
    }

    async fn execute(&self, state: &Blackboard) -> Result<StepOutput, StepError> {
        let mut next = state.clone();
        let p = &self.policy;
        let input = format!(
            "Safety: {}/100, Quality: {}/100, Iteration: {}/{}",
            state.safety_score, state.quality_score, state.iteration_count, p.max_iterations
        );

        let (message, hint) = match p.coordinate(state) {
            Verdict::FirstPass => (
                "No draft yet. Routing to the drafter.".to_string(),
                StepHint::Revise,
            ),
            Verdict::ReadyForReview => {
                next.run_status = RunStatus::Reviewing;
                (
                    format!(
                        "Quality checks passed. Safety: {}/100, Quality: {}/100. Routing to human review.",
                        state.safety_score, state.quality_score
                    ),
                    StepHint::Proceed,
                )
            }
            Verdict::ForcedEscalation { reasons } => {
                next.run_status = RunStatus::Reviewing;
                (
                    format!(
                        "Max iterations ({}) reached with open issues: {}. Routing to human review.",
                        p.max_iterations,
                        reasons.join(", ")
                    ),
                    StepHint::Escalate,
                )
            }
            Verdict::Revise { reasons } => {
                next.run_status = RunStatus::NeedsRevision;
                if next.revision_instructions.is_empty() {
                    next.revision_instructions = format!(
                        "REVISION REQUIRED\nIteration: {}/{}\nReasons: {}\n\nPlease address the following issues in your revision.",
                        state.iteration_count,
                        p.max_iterations,
                        reasons.join(", ")
                    );
                }
                (
                    format!(
                        "Revision required. {}. Iteration {}/{}.",
                        reasons.join(", "),
                        state.iteration_count,
                        p.max_iterations
                    ),
                    StepHint::Revise,
                )
            }
        };

        next.note(
            ScratchpadNote::new(self.name().as_str(), message)
                .with_input(input)
                .with_output(format!("Hint: {}", hint)),
        );
        Ok(StepOutput::new(next, hint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(safety: u8, quality: u8, iteration: u32) -> Blackboard {
        let mut bb = Blackboard::new("run", "intent");
        for i in 0..iteration {
            bb.push_draft(format!("v{}", i + 1));
        }
        bb.iteration_count = iteration;
        bb.safety_score = safety;
        bb.quality_score = quality;
        if iteration > 0 {
            bb.run_status = RunStatus::Reviewing;
        }
        bb
    }

    #[tokio::test]
    async fn test_first_pass_keeps_drafting() {
        let out = Coordinator::new(GatePolicy::default())
            .execute(&scored(0, 0, 0))
            .await
            .unwrap();
        assert_eq!(out.state.run_status, RunStatus::Drafting);
        assert_eq!(out.hint, StepHint::Revise);
        assert_eq!(out.state.scratchpad.len(), 1);
        assert!(out.state.revision_instructions.is_empty());
    }

    #[tokio::test]
    async fn test_revise_writes_instructions_once() {
        let coordinator = Coordinator::new(GatePolicy::default());
        let out = coordinator.execute(&scored(90, 40, 2)).await.unwrap();
        assert_eq!(out.state.run_status, RunStatus::NeedsRevision);
        assert!(out.state.revision_instructions.starts_with("REVISION REQUIRED"));
        assert!(out.state.revision_instructions.contains("Quality score (40)"));

        let mut existing = scored(90, 40, 2);
        existing.revision_instructions = "QUALITY IMPROVEMENTS NEEDED".into();
        let out = coordinator.execute(&existing).await.unwrap();
        assert_eq!(out.state.revision_instructions, "QUALITY IMPROVEMENTS NEEDED");
    }

    #[tokio::test]
    async fn test_ready_and_forced_both_review() {
        let coordinator = Coordinator::new(GatePolicy::default());
        let out = coordinator.execute(&scored(90, 75, 1)).await.unwrap();
        assert_eq!(out.hint, StepHint::Proceed);
        assert_eq!(out.state.run_status, RunStatus::Reviewing);

        let out = coordinator.execute(&scored(10, 10, 5)).await.unwrap();
        assert_eq!(out.hint, StepHint::Escalate);
        assert!(out.state.last_note().unwrap().message.contains("Max iterations (5)"));
    }
}
