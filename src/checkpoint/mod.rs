//! Durable, append-only checkpoint log.
//!
//! Every completed step produces one [`Checkpoint`]. Checkpoints for a run
//! carry strictly increasing `sequence_no` values starting at 0 and are never
//! rewritten. The highest sequence number is the resume point.
//!
//! Stores implement a conditional append: a checkpoint is accepted only when
//! its `sequence_no` is exactly one past the stored maximum (or 0 for a new
//! run). Anything else is an [`AppendOutcome::Conflict`], which is how a
//! second writer learns it lost the race.

mod file;
mod memory;
mod sqlite;

pub use file::FileCheckpointStore;
pub use memory::MemoryCheckpointStore;
pub use sqlite::SqliteCheckpointStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::blackboard::Blackboard;
use crate::errors::StoreError;
use crate::steps::{StepHint, StepName};

/// Immutable snapshot of a run after one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: String,
    pub sequence_no: u64,
    /// Step that produced this snapshot; `None` for the initial checkpoint.
    #[serde(default)]
    pub step_name: Option<StepName>,
    /// Hint returned by `step_name`, kept so routing can be re-derived.
    #[serde(default)]
    pub hint: StepHint,
    pub state: Blackboard,
    pub written_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Sequence-0 checkpoint for a freshly created run.
    pub fn initial(state: Blackboard) -> Self {
        Self {
            run_id: state.run_id.clone(),
            sequence_no: 0,
            step_name: None,
            hint: StepHint::Proceed,
            state,
            written_at: Utc::now(),
        }
    }

    /// The checkpoint that follows this one.
    pub fn successor(&self, step_name: Option<StepName>, hint: StepHint, state: Blackboard) -> Self {
        Self {
            run_id: self.run_id.clone(),
            sequence_no: self.sequence_no + 1,
            step_name,
            hint,
            state,
            written_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// `sequence_no` was not next; another writer got there first.
    Conflict,
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Append `checkpoint` if its sequence number is next for its run.
    async fn append(&self, checkpoint: &Checkpoint) -> Result<AppendOutcome, StoreError>;

    async fn load_latest(&self, run_id: &str) -> Result<Option<Checkpoint>, StoreError>;

    /// All checkpoints for a run in sequence order.
    async fn history(&self, run_id: &str) -> Result<Vec<Checkpoint>, StoreError>;
}

/// Sequence number the store should accept next, given its current maximum.
pub(crate) fn accepts(latest: Option<u64>, sequence_no: u64) -> bool {
    match latest {
        None => sequence_no == 0,
        Some(max) => sequence_no == max + 1,
    }
}

/// Run ids double as file names, so keep them to a safe alphabet.
pub(crate) fn validate_run_id(run_id: &str) -> Result<(), StoreError> {
    let ok = !run_id.is_empty()
        && run_id.len() <= 128
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidRunId(run_id.to_string()))
    }
}
