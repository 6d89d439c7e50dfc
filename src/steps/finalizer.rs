use async_trait::async_trait;

use super::{PREVIEW_CHARS, StepExecutor, StepHint, StepName, StepOutput};
use crate::blackboard::{Blackboard, RunStatus, ScratchpadNote};
use crate::errors::StepError;
use crate::util::preview;

/// Freezes the approved draft as the run's final artifact.
pub struct Finalizer;

#[async_trait]
impl StepExecutor for Finalizer {
    fn name(&self) -> StepName {
        StepName::Finalizer
    }

    async fn execute(&self, state: &Blackboard) -> Result<StepOutput, StepError> {
        if state.current_draft.is_empty() {
            return Err(StepError::contract(self.name().as_str(), "nothing to finalize"));
        }

        let mut next = state.clone();
        next.final_artifact = Some(state.current_draft.clone());
        next.run_status = RunStatus::Approved;
        next.note(
            ScratchpadNote::new(
                self.name().as_str(),
                format!(
                    "Protocol finalized. Final scores - Safety: {}/100, Quality: {}/100. Total iterations: {}.",
                    state.safety_score, state.quality_score, state.iteration_count
                ),
            )
            .with_input(format!(
                "Approved draft to finalize:\n{}",
                preview(&state.current_draft, PREVIEW_CHARS)
            ))
            .with_output(format!(
                "Final artifact length: {} characters",
                state.current_draft.chars().count()
            )),
        );
        Ok(StepOutput::new(next, StepHint::Proceed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_final_artifact_matches_current_draft() {
        let mut bb = Blackboard::new("run", "intent");
        bb.push_draft("v1".into());
        bb.push_draft("v2".into());
        bb.iteration_count = 2;
        bb.run_status = RunStatus::Reviewing;

        let out = Finalizer.execute(&bb).await.unwrap();
        assert_eq!(out.state.run_status, RunStatus::Approved);
        assert_eq!(out.state.final_artifact.as_deref(), Some("v2"));
        assert!(out.state.check_invariants().is_ok());
    }

    #[tokio::test]
    async fn test_refuses_empty_draft() {
        let bb = Blackboard::new("run", "intent");
        assert!(Finalizer.execute(&bb).await.is_err());
    }
}
