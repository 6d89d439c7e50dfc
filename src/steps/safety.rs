use async_trait::async_trait;
use std::sync::Arc;

use super::{PREVIEW_CHARS, StepExecutor, StepHint, StepName, StepOutput, checked_score};
use crate::blackboard::{Blackboard, RunStatus, ScratchpadNote};
use crate::collaborators::SafetyAssessor;
use crate::errors::StepError;
use crate::router::GatePolicy;
use crate::util::preview;

/// Scores the current draft for clinical safety and records flags.
pub struct SafetyReviewer {
    policy: GatePolicy,
    assessor: Arc<dyn SafetyAssessor>,
}

impl SafetyReviewer {
    pub fn new(policy: GatePolicy, assessor: Arc<dyn SafetyAssessor>) -> Self {
        Self { policy, assessor }
    }
}

#[async_trait]
impl StepExecutor for SafetyReviewer {
    fn name(&self) -> StepName {
        StepName::SafetyReviewer
    }

    async fn execute(&self, state: &Blackboard) -> Result<StepOutput, StepError> {
        let step = self.name().as_str();
        let assessment = self
            .assessor
            .assess_safety(&state.current_draft)
            .await
            .map_err(|e| e.into_step_error(step))?;
        let score = checked_score(self.name(), assessment.score)?;
        let passed = self.policy.safety_passes(score);

        let flag_lines: Vec<String> = assessment.flags.iter().map(|f| format!("- {}", f)).collect();
        let rec_lines: Vec<String> = assessment
            .recommendations
            .iter()
            .map(|r| format!("- {}", r))
            .collect();

        let mut next = state.clone();
        next.safety_score = score;
        next.safety_flags = assessment.flags.clone();
        if passed {
            next.run_status = RunStatus::Reviewing;
        } else {
            next.run_status = RunStatus::NeedsRevision;
            next.revision_instructions = format!(
                "SAFETY ISSUES DETECTED (Score: {}/100)\n\nFlags:\n{}\n\nRecommendations:\n{}",
                score,
                flag_lines.join("\n"),
                rec_lines.join("\n")
            );
        }

        let output = format!(
            "Safety score: {}/100\nFlags found: {}\n{}",
            score,
            assessment.flags.len(),
            if flag_lines.is_empty() {
                "No flags".to_string()
            } else {
                flag_lines.join("\n")
            }
        );
        next.note(
            ScratchpadNote::new(
                step,
                format!(
                    "Safety scan complete. Score: {}/100. Flags: {}.",
                    score,
                    assessment.flags.len()
                ),
            )
            .with_input(format!("Draft to analyze:\n{}", preview(&state.current_draft, PREVIEW_CHARS)))
            .with_output(preview(&output, PREVIEW_CHARS)),
        );

        let hint = if passed { StepHint::Proceed } else { StepHint::Revise };
        Ok(StepOutput::new(next, hint))
    }
}
