use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{AppendOutcome, Checkpoint, CheckpointStore, accepts};
use crate::errors::StoreError;

/// Process-local store for tests and throwaway runs.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    runs: Mutex<HashMap<String, Vec<Checkpoint>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn append(&self, checkpoint: &Checkpoint) -> Result<AppendOutcome, StoreError> {
        let mut runs = self.runs.lock().map_err(|_| StoreError::LockPoisoned)?;
        let log = runs.entry(checkpoint.run_id.clone()).or_default();
        if !accepts(log.last().map(|c| c.sequence_no), checkpoint.sequence_no) {
            return Ok(AppendOutcome::Conflict);
        }
        log.push(checkpoint.clone());
        Ok(AppendOutcome::Appended)
    }

    async fn load_latest(&self, run_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        let runs = self.runs.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(runs.get(run_id).and_then(|log| log.last().cloned()))
    }

    async fn history(&self, run_id: &str) -> Result<Vec<Checkpoint>, StoreError> {
        let runs = self.runs.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(runs.get(run_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::super::contract;
    use super::*;

    #[tokio::test]
    async fn test_append_then_load() {
        contract::append_then_load(&MemoryCheckpointStore::new()).await;
    }

    #[tokio::test]
    async fn test_rejects_out_of_order() {
        contract::rejects_out_of_order(&MemoryCheckpointStore::new()).await;
    }

    #[tokio::test]
    async fn test_runs_are_independent() {
        contract::runs_are_independent(&MemoryCheckpointStore::new()).await;
    }
}
