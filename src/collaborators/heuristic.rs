//! Deterministic collaborators.
//!
//! These produce plausible drafts and scores without any external service,
//! which keeps the CLI usable offline and the engine tests reproducible.

use async_trait::async_trait;

use super::{
    DraftAuthor, DraftRequest, QualityAssessment, QualityAssessor, SafetyAssessment,
    SafetyAssessor,
};
use crate::blackboard::{SafetyFlag, Severity};
use crate::errors::CollaboratorError;

pub const CRITICAL_PENALTY: i64 = 40;
pub const WARNING_PENALTY: i64 = 15;

/// Phrases that make a draft unsafe to hand to a client.
const CRITICAL_PHRASES: &[(&str, &str)] = &[
    ("stop taking your medication", "Advises stopping medication"),
    ("stop your medication", "Advises stopping medication"),
    ("hurt yourself", "Mentions self-harm without a safety plan"),
    ("kill yourself", "Mentions suicide without a safety plan"),
    ("you don't need a therapist", "Discourages professional help"),
    ("you do not need a therapist", "Discourages professional help"),
];

/// Phrases that need softening or a clinician's eye.
const WARNING_PHRASES: &[(&str, &str)] = &[
    ("guaranteed", "Promises a guaranteed outcome"),
    ("cure", "Claims the exercise cures a condition"),
    ("just get over it", "Dismissive language"),
    ("diagnose yourself", "Encourages self-diagnosis"),
    ("you should never feel", "Invalidates the client's feelings"),
];

const EMPATHY_MARKERS: &[&str] = &[
    "it is okay",
    "it's okay",
    "acknowledge",
    "gentle",
    "compassion",
    "take your time",
];

/// Template-based author of a structured CBT thought-record exercise.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateDrafter;

impl TemplateDrafter {
    fn title(intent: &str) -> String {
        let trimmed = intent.trim().trim_end_matches('.');
        let mut chars = trimmed.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => "CBT Exercise".to_string(),
        }
    }
}

#[async_trait]
impl DraftAuthor for TemplateDrafter {
    async fn draft(&self, request: &DraftRequest) -> Result<String, CollaboratorError> {
        if let Some(edit) = request.human_edit.as_deref()
            && !edit.trim().is_empty()
        {
            let mut text = edit.trim().to_string();
            if !request.revision_instructions.is_empty() {
                text.push_str(&format!(
                    "\n\n_Revision {} incorporates reviewer feedback._",
                    request.iteration
                ));
            }
            return Ok(text);
        }

        let mut text = format!(
            "# {title}\n\n\
             ## Purpose\n\
             This exercise helps you work through: {intent}. \
             Take your time with each step; it is okay if this feels hard at first.\n\n\
             ## Steps\n\
             1. Describe the situation briefly: where you were and what happened.\n\
             2. Write down the automatic thought that came up.\n\
             3. Rate how strongly you believe that thought, from 0 to 100.\n\
             4. List the evidence that supports the thought, then the evidence against it.\n\
             5. Write a balanced alternative thought that accounts for both lists.\n\
             6. Re-rate your belief in the original thought and notice any change in how you feel.\n\n\
             ## Reflection\n\
             Acknowledge the effort you put in. Be gentle with yourself; \
             noticing a thought is already a step toward changing how it affects you.\n\n\
             ## Safety note\n\
             If you feel overwhelmed or unsafe at any point, pause the exercise and \
             contact your clinician or a local crisis line.",
            title = Self::title(&request.intent),
            intent = request.intent.trim(),
        );

        if !request.revision_instructions.is_empty() {
            text.push_str(&format!(
                "\n\n_Revision {} incorporates reviewer feedback._",
                request.iteration
            ));
        }
        Ok(text)
    }
}

/// Line-by-line keyword scan producing flags and a penalty-based score.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordSafetyScanner;

impl KeywordSafetyScanner {
    pub fn scan(draft: &str) -> SafetyAssessment {
        let mut flags = Vec::new();
        for (idx, line) in draft.lines().enumerate() {
            let lower = line.to_lowercase();
            let line_no = (idx + 1) as u32;
            for (phrase, reason) in CRITICAL_PHRASES {
                if lower.contains(phrase) {
                    flags.push(SafetyFlag::new(line_no, *reason, Severity::Critical));
                }
            }
            for (phrase, reason) in WARNING_PHRASES {
                if lower.contains(phrase) {
                    flags.push(SafetyFlag::new(line_no, *reason, Severity::Warning));
                }
            }
        }

        let lower = draft.to_lowercase();
        if !lower.contains("crisis") && !lower.contains("clinician") {
            flags.push(SafetyFlag::new(
                0,
                "No pointer to professional or crisis support",
                Severity::Warning,
            ));
        }

        let penalty: i64 = flags
            .iter()
            .map(|f| match f.severity {
                Severity::Critical => CRITICAL_PENALTY,
                Severity::Warning => WARNING_PENALTY,
            })
            .sum();

        let mut recommendations = Vec::new();
        if flags.iter().any(|f| f.severity == Severity::Critical) {
            recommendations.push("Remove advice that could cause harm and add a safety plan".to_string());
        }
        if flags.iter().any(|f| f.severity == Severity::Warning) {
            recommendations.push("Soften absolute claims and point to professional support".to_string());
        }

        SafetyAssessment {
            score: (100 - penalty).max(0),
            flags,
            recommendations,
        }
    }
}

#[async_trait]
impl SafetyAssessor for KeywordSafetyScanner {
    async fn assess_safety(&self, draft: &str) -> Result<SafetyAssessment, CollaboratorError> {
        Ok(Self::scan(draft))
    }
}

/// Rubric scorer: structure, guided steps, empathetic language, length.
#[derive(Debug, Clone, Copy, Default)]
pub struct RubricQualityScorer;

impl RubricQualityScorer {
    pub fn score(intent: &str, draft: &str) -> QualityAssessment {
        let lower = draft.to_lowercase();
        let mut score = 20;
        let mut strengths = Vec::new();
        let mut improvements = Vec::new();

        let headings = draft.lines().filter(|l| l.trim_start().starts_with('#')).count();
        if headings >= 3 {
            score += 25;
            strengths.push("Clear sectioned structure".to_string());
        } else {
            improvements.push("Organize the exercise into titled sections".to_string());
        }

        let numbered = draft
            .lines()
            .filter(|l| {
                let t = l.trim_start();
                t.chars().next().is_some_and(|c| c.is_ascii_digit()) && t.contains(". ")
            })
            .count();
        if numbered >= 3 {
            score += 20;
            strengths.push("Guided, numbered steps".to_string());
        } else {
            improvements.push("Break the exercise into numbered steps".to_string());
        }

        if EMPATHY_MARKERS.iter().any(|m| lower.contains(m)) {
            score += 25;
            strengths.push("Warm, validating language".to_string());
        } else {
            improvements.push("Add validating, compassionate language".to_string());
        }

        if draft.chars().count() >= 400 {
            score += 10;
        } else {
            improvements.push("Expand the exercise with more guidance".to_string());
        }

        let topic_words: Vec<String> = intent
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|w| w.len() > 4)
            .collect();
        if !topic_words.is_empty() && !topic_words.iter().any(|w| lower.contains(w.as_str())) {
            score -= 20;
            improvements.push("Tie the exercise back to the requested topic".to_string());
        }

        QualityAssessment {
            score: score.clamp(0, 100),
            strengths,
            improvements,
        }
    }
}

#[async_trait]
impl QualityAssessor for RubricQualityScorer {
    async fn assess_quality(
        &self,
        intent: &str,
        draft: &str,
    ) -> Result<QualityAssessment, CollaboratorError> {
        Ok(Self::score(intent, draft))
    }
}
