use async_trait::async_trait;

use super::{PREVIEW_CHARS, StepExecutor, StepHint, StepName, StepOutput};
use crate::blackboard::{Blackboard, DecisionSource, ReviewAction, RunStatus, ScratchpadNote};
use crate::errors::StepError;
use crate::router::GatePolicy;
use crate::util::preview;

/// Consumes the pending human decision.
///
/// The engine only invokes this step once `pending_human_decision` is set;
/// running it without one is a contract violation.
pub struct HumanGate {
    policy: GatePolicy,
}

impl HumanGate {
    pub fn new(policy: GatePolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl StepExecutor for HumanGate {
    fn name(&self) -> StepName {
        StepName::HumanGate
    }

    async fn execute(&self, state: &Blackboard) -> Result<StepOutput, StepError> {
        let step = self.name().as_str();
        let decision = state
            .pending_human_decision
            .clone()
            .ok_or_else(|| StepError::contract(step, "invoked without a pending decision"))?;

        let mut next = state.clone();
        next.pending_human_decision = None;
        let feedback = decision.feedback.clone().unwrap_or_default();
        let (by, source) = match decision.source {
            DecisionSource::Human => ("Human", "human"),
            DecisionSource::Automatic => ("Automatic review", "automatic"),
        };

        let message = match decision.action {
            ReviewAction::Approve => {
                next.run_status = RunStatus::Reviewing;
                match decision.source {
                    DecisionSource::Human => {
                        "Human approved the draft. Proceeding to finalization.".to_string()
                    }
                    DecisionSource::Automatic => {
                        "Draft approved automatically (AUTO_APPROVE is on). Proceeding to finalization."
                            .to_string()
                    }
                }
            }
            ReviewAction::Reject => {
                next.human_rejections += 1;
                let mut instructions = format!(
                    "HUMAN FEEDBACK:\n{}",
                    if feedback.is_empty() { "No feedback provided" } else { feedback.as_str() }
                );
                if let Some(edit) = decision.edited_text.as_deref()
                    && !edit.trim().is_empty()
                {
                    instructions.push_str("\n\nAn edited draft was provided; use it as the base.");
                    next.human_edit = Some(edit.to_string());
                }
                next.revision_instructions = instructions;

                if self.policy.rejections_exhausted(next.human_rejections) {
                    next.run_status = RunStatus::Rejected;
                    format!(
                        "{} rejected the draft ({} of {} allowed rejections). Run rejected.",
                        by, next.human_rejections, self.policy.max_human_rejections
                    )
                } else {
                    next.run_status = RunStatus::Drafting;
                    format!("{} rejected the draft. Feedback: {}", by, preview(&feedback, 100))
                }
            }
            ReviewAction::Cancel => {
                next.run_status = RunStatus::Cancelled;
                format!("{} cancelled the run.", by)
            }
        };

        let input = format!(
            "Draft presented for review:\n{}\n\nSafety score: {}/100\nQuality score: {}/100\nIteration: {}",
            preview(&state.current_draft, PREVIEW_CHARS),
            state.safety_score,
            state.quality_score,
            state.iteration_count
        );
        let output = format!(
            "Decision: {} ({})\nFeedback: {}\nEdited text: {}",
            decision.action.as_str().to_uppercase(),
            source,
            if feedback.is_empty() { "No feedback provided" } else { feedback.as_str() },
            if decision.edited_text.is_some() { "yes" } else { "no" }
        );
        next.note(
            ScratchpadNote::new(step, message)
                .with_input(input)
                .with_output(preview(&output, PREVIEW_CHARS)),
        );
        Ok(StepOutput::new(next, StepHint::Decision(decision.action)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::HumanDecision;

    fn awaiting(decision: Option<HumanDecision>) -> Blackboard {
        let mut bb = Blackboard::new("run", "intent");
        bb.push_draft("v1".into());
        bb.iteration_count = 1;
        bb.run_status = RunStatus::AwaitingHuman;
        bb.pending_human_decision = decision;
        bb
    }

    #[tokio::test]
    async fn test_missing_decision_is_contract_violation() {
        let err = HumanGate::new(GatePolicy::default())
            .execute(&awaiting(None))
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::ContractViolation { .. }));
    }

    #[tokio::test]
    async fn test_approve_clears_decision() {
        let out = HumanGate::new(GatePolicy::default())
            .execute(&awaiting(Some(HumanDecision::approve())))
            .await
            .unwrap();
        assert_eq!(out.hint, StepHint::Decision(ReviewAction::Approve));
        assert_eq!(out.state.run_status, RunStatus::Reviewing);
        assert!(out.state.pending_human_decision.is_none());
    }

    #[tokio::test]
    async fn test_reject_carries_feedback_and_edit() {
        let decision = HumanDecision::reject()
            .with_feedback("Use simpler words")
            .with_edited_text("Simpler draft");
        let out = HumanGate::new(GatePolicy::default())
            .execute(&awaiting(Some(decision)))
            .await
            .unwrap();
        let state = out.state;
        assert_eq!(state.run_status, RunStatus::Drafting);
        assert_eq!(state.human_rejections, 1);
        assert!(state.revision_instructions.contains("Use simpler words"));
        assert_eq!(state.human_edit.as_deref(), Some("Simpler draft"));
        // The draft history is untouched; the edit feeds the next drafter pass.
        assert_eq!(state.current_draft, "v1");
    }

    #[tokio::test]
    async fn test_reject_at_cap_is_terminal() {
        let policy = GatePolicy {
            max_human_rejections: 2,
            ..GatePolicy::default()
        };
        let mut bb = awaiting(Some(HumanDecision::reject()));
        bb.human_rejections = 1;
        let out = HumanGate::new(policy).execute(&bb).await.unwrap();
        assert_eq!(out.state.run_status, RunStatus::Rejected);
        assert!(out.state.last_note().unwrap().message.contains("Run rejected"));
    }

    #[tokio::test]
    async fn test_automatic_approval_is_audited() {
        let out = HumanGate::new(GatePolicy::default())
            .execute(&awaiting(Some(HumanDecision::automatic_approve())))
            .await
            .unwrap();
        let note = out.state.last_note().unwrap();
        assert!(note.message.contains("approved automatically"));
        assert!(note.raw_output.as_deref().unwrap().contains("APPROVE (automatic)"));
    }

    #[tokio::test]
    async fn test_cancel() {
        let out = HumanGate::new(GatePolicy::default())
            .execute(&awaiting(Some(HumanDecision::cancel())))
            .await
            .unwrap();
        assert_eq!(out.state.run_status, RunStatus::Cancelled);
        assert_eq!(out.hint, StepHint::Decision(ReviewAction::Cancel));
    }
}
