use async_trait::async_trait;
use std::sync::Arc;

use super::{PREVIEW_CHARS, StepExecutor, StepHint, StepName, StepOutput};
use crate::blackboard::{Blackboard, RunStatus, ScratchpadNote};
use crate::collaborators::{DraftAuthor, DraftRequest};
use crate::errors::StepError;
use crate::util::preview;

/// Produces the next draft version and consumes pending revision input.
pub struct Drafter {
    author: Arc<dyn DraftAuthor>,
}

impl Drafter {
    pub fn new(author: Arc<dyn DraftAuthor>) -> Self {
        Self { author }
    }

    fn request(state: &Blackboard) -> DraftRequest {
        DraftRequest {
            intent: state.intent.clone(),
            iteration: state.iteration_count + 1,
            previous_draft: (!state.current_draft.is_empty()).then(|| state.current_draft.clone()),
            revision_instructions: state.revision_instructions.clone(),
            human_edit: state.human_edit.clone(),
        }
    }
}

#[async_trait]
impl StepExecutor for Drafter {
    fn name(&self) -> StepName {
        StepName::Drafter
    }

    async fn execute(&self, state: &Blackboard) -> Result<StepOutput, StepError> {
        let step = self.name().as_str();
        let request = Self::request(state);
        let draft = self
            .author
            .draft(&request)
            .await
            .map_err(|e| e.into_step_error(step))?;
        if draft.trim().is_empty() {
            return Err(StepError::malformed(step, "author returned an empty draft"));
        }

        let iteration = request.iteration;
        let message = if request.revision_instructions.is_empty() {
            format!("Generated draft version {}. Initial draft created.", iteration)
        } else {
            format!(
                "Generated draft version {}. Addressed: {}",
                iteration,
                preview(&request.revision_instructions, 100)
            )
        };
        let input = format!(
            "Intent: {}\nIteration: {}\n{}",
            request.intent,
            iteration,
            if request.revision_instructions.is_empty() {
                "Initial draft request".to_string()
            } else {
                format!("Revision instructions: {}", request.revision_instructions)
            }
        );
        let output = format!(
            "Draft version {} generated\nLength: {} characters\nPreview: {}",
            iteration,
            draft.chars().count(),
            preview(&draft, 200)
        );

        let mut next = state.clone();
        next.push_draft(draft);
        next.iteration_count = iteration;
        next.run_status = RunStatus::Reviewing;
        next.revision_instructions.clear();
        next.human_edit = None;
        next.note(
            ScratchpadNote::new(step, message)
                .with_input(preview(&input, PREVIEW_CHARS))
                .with_output(preview(&output, PREVIEW_CHARS)),
        );
        Ok(StepOutput::new(next, StepHint::Proceed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::TemplateDrafter;
    use crate::errors::CollaboratorError;

    struct Empty;

    #[async_trait]
    impl DraftAuthor for Empty {
        async fn draft(&self, _request: &DraftRequest) -> Result<String, CollaboratorError> {
            Ok("   ".into())
        }
    }

    #[tokio::test]
    async fn test_drafter_appends_and_consumes_instructions() {
        let mut bb = Blackboard::new("run", "Breathing exercise for panic");
        bb.revision_instructions = "SAFETY ISSUES DETECTED".into();
        bb.human_edit = Some("edited base".into());

        let out = Drafter::new(Arc::new(TemplateDrafter)).execute(&bb).await.unwrap();
        let state = out.state;
        assert_eq!(state.iteration_count, 1);
        assert_eq!(state.drafts.len(), 1);
        assert_eq!(state.current_draft, state.drafts[0]);
        assert!(state.current_draft.starts_with("edited base"));
        assert_eq!(state.run_status, RunStatus::Reviewing);
        assert!(state.revision_instructions.is_empty());
        assert!(state.human_edit.is_none());
        let note = state.last_note().unwrap();
        assert_eq!(note.step_name, "drafter");
        assert!(note.message.contains("Addressed: SAFETY ISSUES DETECTED"));
        assert!(note.raw_input.as_deref().unwrap().contains("Iteration: 1"));
    }

    #[tokio::test]
    async fn test_empty_draft_is_malformed() {
        let bb = Blackboard::new("run", "intent");
        let err = Drafter::new(Arc::new(Empty)).execute(&bb).await.unwrap_err();
        assert!(matches!(err, StepError::Malformed { .. }));
    }
}
