//! Pluggable producers of draft text and review scores.
//!
//! The Drafter and the two reviewers delegate the actual content work to
//! these traits. [`heuristic`] provides deterministic built-ins; [`command`]
//! shells out to an external program speaking JSON over stdin/stdout.

pub mod command;
pub mod heuristic;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::blackboard::SafetyFlag;
use crate::errors::CollaboratorError;

pub use command::CommandCollaborator;
pub use heuristic::{KeywordSafetyScanner, RubricQualityScorer, TemplateDrafter};

/// Everything the author needs to produce the next draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftRequest {
    pub intent: String,
    /// Iteration number the new draft will carry (1-based).
    pub iteration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_draft: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub revision_instructions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_edit: Option<String>,
}

/// Raw safety review. `score` is unchecked; the reviewer step validates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyAssessment {
    pub score: i64,
    #[serde(default)]
    pub flags: Vec<SafetyFlag>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// Raw quality review. `score` is unchecked; the reviewer step validates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub score: i64,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
}

#[async_trait]
pub trait DraftAuthor: Send + Sync {
    async fn draft(&self, request: &DraftRequest) -> Result<String, CollaboratorError>;
}

#[async_trait]
pub trait SafetyAssessor: Send + Sync {
    async fn assess_safety(&self, draft: &str) -> Result<SafetyAssessment, CollaboratorError>;
}

#[async_trait]
pub trait QualityAssessor: Send + Sync {
    async fn assess_quality(
        &self,
        intent: &str,
        draft: &str,
    ) -> Result<QualityAssessment, CollaboratorError>;
}

/// The three collaborators a [`crate::steps::StepSet`] is built from.
#[derive(Clone)]
pub struct Collaborators {
    pub author: Arc<dyn DraftAuthor>,
    pub safety: Arc<dyn SafetyAssessor>,
    pub quality: Arc<dyn QualityAssessor>,
}

impl Collaborators {
    /// Deterministic built-ins; no external process involved.
    pub fn heuristic() -> Self {
        Self {
            author: Arc::new(TemplateDrafter),
            safety: Arc::new(KeywordSafetyScanner),
            quality: Arc::new(RubricQualityScorer),
        }
    }

    /// Route all three roles through one external command.
    pub fn command(collaborator: CommandCollaborator) -> Self {
        let shared = Arc::new(collaborator);
        Self {
            author: shared.clone(),
            safety: shared.clone(),
            quality: shared,
        }
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::heuristic()
    }
}
