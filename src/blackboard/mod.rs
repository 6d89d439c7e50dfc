//! The blackboard: the single shared record every step reads and writes.
//!
//! A [`Blackboard`] is created once per run, mutated only by step executors
//! invoked by the engine, and frozen once its [`RunStatus`] is terminal. The
//! scratchpad is the append-only audit trail: every step leaves exactly one
//! [`ScratchpadNote`] behind.

mod status;

pub use status::RunStatus;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::FailureCode;

/// Severity of a safety flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// A problematic line found by the safety reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyFlag {
    /// 1-based line number in the draft (0 when the flag is draft-wide)
    pub line: u32,
    pub reason: String,
    #[serde(default)]
    pub severity: Severity,
}

impl SafetyFlag {
    pub fn new(line: u32, reason: impl Into<String>, severity: Severity) -> Self {
        Self {
            line,
            reason: reason.into(),
            severity,
        }
    }
}

impl fmt::Display for SafetyFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Line {}: {} [{}]", self.line, self.reason, self.severity)
    }
}

/// Action a reviewer can take at the human gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewAction {
    Approve,
    Reject,
    Cancel,
}

impl ReviewAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Cancel => "cancel",
        }
    }
}

impl fmt::Display for ReviewAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "approve" => Ok(Self::Approve),
            "reject" => Ok(Self::Reject),
            "cancel" => Ok(Self::Cancel),
            _ => Err(format!(
                "Invalid review action '{}'. Valid values: approve, reject, cancel",
                s
            )),
        }
    }
}

/// Who produced a human-gate decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionSource {
    #[default]
    Human,
    /// Injected by the engine because auto-approve is enabled.
    Automatic,
}

/// Decision attached to a suspended run; consumed once by the human gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanDecision {
    pub action: ReviewAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(default)]
    pub source: DecisionSource,
}

impl HumanDecision {
    pub fn new(action: ReviewAction) -> Self {
        Self {
            action,
            edited_text: None,
            feedback: None,
            source: DecisionSource::Human,
        }
    }

    pub fn approve() -> Self {
        Self::new(ReviewAction::Approve)
    }

    pub fn reject() -> Self {
        Self::new(ReviewAction::Reject)
    }

    pub fn cancel() -> Self {
        Self::new(ReviewAction::Cancel)
    }

    /// Approve decision injected when auto-approve is on.
    pub fn automatic_approve() -> Self {
        Self {
            source: DecisionSource::Automatic,
            ..Self::approve()
        }
    }

    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = Some(feedback.into());
        self
    }

    pub fn with_edited_text(mut self, text: impl Into<String>) -> Self {
        self.edited_text = Some(text.into());
        self
    }
}

/// One audit-trail entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScratchpadNote {
    pub step_name: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
}

impl ScratchpadNote {
    pub fn new(step_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            message: message.into(),
            timestamp: Utc::now(),
            raw_input: None,
            raw_output: None,
        }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.raw_input = Some(input.into());
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.raw_output = Some(output.into());
        self
    }
}

/// Why a run ended in `failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub code: FailureCode,
    pub message: String,
}

/// Shared state for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blackboard {
    pub run_id: String,
    pub intent: String,
    pub drafts: Vec<String>,
    pub current_draft: String,
    pub scratchpad: Vec<ScratchpadNote>,
    pub safety_score: u8,
    pub quality_score: u8,
    pub safety_flags: Vec<SafetyFlag>,
    pub iteration_count: u32,
    pub run_status: RunStatus,
    #[serde(default)]
    pub pending_human_decision: Option<HumanDecision>,
    /// Instructions for the next Drafter pass; cleared once consumed.
    #[serde(default)]
    pub revision_instructions: String,
    /// Human-edited text to use as the base of the next draft.
    #[serde(default)]
    pub human_edit: Option<String>,
    #[serde(default)]
    pub human_rejections: u32,
    #[serde(default)]
    pub final_artifact: Option<String>,
    #[serde(default)]
    pub failure: Option<Failure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Blackboard {
    /// Fresh state for a new run.
    pub fn new(run_id: impl Into<String>, intent: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            intent: intent.into(),
            drafts: Vec::new(),
            current_draft: String::new(),
            scratchpad: Vec::new(),
            safety_score: 0,
            quality_score: 0,
            safety_flags: Vec::new(),
            iteration_count: 0,
            run_status: RunStatus::Drafting,
            pending_human_decision: None,
            revision_instructions: String::new(),
            human_edit: None,
            human_rejections: 0,
            final_artifact: None,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append an audit entry and bump `updated_at`.
    pub fn note(&mut self, note: ScratchpadNote) {
        self.updated_at = note.timestamp;
        self.scratchpad.push(note);
    }

    /// Append a new draft version, keeping `current_draft` in sync.
    pub fn push_draft(&mut self, text: String) {
        self.current_draft = text.clone();
        self.drafts.push(text);
    }

    pub fn last_note(&self) -> Option<&ScratchpadNote> {
        self.scratchpad.last()
    }

    /// Move the run to `failed`, recording the cause on the blackboard and in
    /// the scratchpad.
    pub fn fail(&mut self, code: FailureCode, message: impl Into<String>) {
        let message = message.into();
        self.note(
            ScratchpadNote::new("engine", format!("Run failed ({}): {}", code, message))
                .with_output(message.clone()),
        );
        self.failure = Some(Failure { code, message });
        self.run_status = RunStatus::Failed;
    }

    /// Check the structural invariants that must hold in every snapshot.
    pub fn check_invariants(&self) -> Result<(), String> {
        match self.drafts.last() {
            Some(last) if *last != self.current_draft => {
                return Err("current_draft differs from the last draft".to_string());
            }
            None if !self.current_draft.is_empty() => {
                return Err("current_draft set before any draft was produced".to_string());
            }
            _ => {}
        }
        if self.safety_score > 100 || self.quality_score > 100 {
            return Err(format!(
                "scores out of range (safety {}, quality {})",
                self.safety_score, self.quality_score
            ));
        }
        if self.run_status == RunStatus::Approved && self.final_artifact.is_none() {
            return Err("approved run has no final artifact".to_string());
        }
        Ok(())
    }
}
