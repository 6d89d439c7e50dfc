use async_trait::async_trait;
use std::sync::Arc;

use super::{PREVIEW_CHARS, StepExecutor, StepHint, StepName, StepOutput, checked_score};
use crate::blackboard::{Blackboard, ScratchpadNote};
use crate::collaborators::QualityAssessor;
use crate::errors::StepError;
use crate::router::GatePolicy;
use crate::util::preview;

/// Scores therapeutic quality; low scores add improvement notes.
pub struct QualityReviewer {
    policy: GatePolicy,
    assessor: Arc<dyn QualityAssessor>,
}

impl QualityReviewer {
    pub fn new(policy: GatePolicy, assessor: Arc<dyn QualityAssessor>) -> Self {
        Self { policy, assessor }
    }
}

#[async_trait]
impl StepExecutor for QualityReviewer {
    fn name(&self) -> StepName {
        StepName::QualityReviewer
    }

    async fn execute(&self, state: &Blackboard) -> Result<StepOutput, StepError> {
        let step = self.name().as_str();
        let assessment = self
            .assessor
            .assess_quality(&state.intent, &state.current_draft)
            .await
            .map_err(|e| e.into_step_error(step))?;
        let score = checked_score(self.name(), assessment.score)?;
        let passed = self.policy.quality_passes(score);

        let mut next = state.clone();
        next.quality_score = score;
        if !passed {
            let improvements: Vec<String> = assessment
                .improvements
                .iter()
                .map(|i| format!("- {}", i))
                .collect();
            let block = format!(
                "QUALITY IMPROVEMENTS NEEDED (Score: {}/100)\nAreas for improvement:\n{}",
                score,
                improvements.join("\n")
            );
            next.revision_instructions = if next.revision_instructions.is_empty() {
                block
            } else {
                format!("{}\n\n{}", next.revision_instructions, block)
            };
        }

        next.note(
            ScratchpadNote::new(
                step,
                format!(
                    "Quality review complete. Score: {}/100. Strengths: {}. Areas to improve: {}.",
                    score,
                    assessment.strengths.len(),
                    assessment.improvements.len()
                ),
            )
            .with_input(format!("Draft to review:\n{}", preview(&state.current_draft, PREVIEW_CHARS)))
            .with_output(preview(
                &format!(
                    "Quality score: {}/100\nStrengths: {}\nImprovements: {}",
                    score,
                    assessment.strengths.join("; "),
                    assessment.improvements.join("; ")
                ),
                PREVIEW_CHARS,
            )),
        );

        let hint = if passed { StepHint::Proceed } else { StepHint::Revise };
        Ok(StepOutput::new(next, hint))
    }
}
