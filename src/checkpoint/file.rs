//! JSON-lines checkpoint log, one file per run.
//!
//! Each line of `<dir>/<run_id>.jsonl` is one serialized [`Checkpoint`].
//! Appends take an exclusive `fs2` lock on the file, re-read the tail to
//! check the sequence number, write the line and `fsync` before unlocking,
//! so writers in other processes are serialized too.
//!
//! A final line without its newline is a write that never completed. Readers
//! ignore it and the next append truncates it away; only complete lines that
//! fail to parse count as corruption.

use async_trait::async_trait;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{AppendOutcome, Checkpoint, CheckpointStore, accepts, validate_run_id};
use crate::errors::StoreError;

#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Store logs under `dir`, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn log_path(&self, run_id: &str) -> Result<PathBuf, StoreError> {
        validate_run_id(run_id)?;
        Ok(self.dir.join(format!("{}.jsonl", run_id)))
    }

    fn io(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
        move |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Split `content` into its newline-terminated records and a torn tail.
    fn split_torn_tail(content: &str) -> (&str, &str) {
        match content.rfind('\n') {
            Some(end) => content.split_at(end + 1),
            None => ("", content),
        }
    }

    fn latest_in(run_id: &str, content: &str) -> Result<Option<Checkpoint>, StoreError> {
        let (complete, _) = Self::split_torn_tail(content);
        match complete.lines().rev().find(|l| !l.trim().is_empty()) {
            Some(line) => serde_json::from_str(line)
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    run_id: run_id.to_string(),
                    detail: format!("last line: {}", e),
                }),
            None => Ok(None),
        }
    }

    fn parse_log(run_id: &str, content: &str) -> Result<Vec<Checkpoint>, StoreError> {
        let (content, _) = Self::split_torn_tail(content);
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                serde_json::from_str::<Checkpoint>(line).map_err(|e| StoreError::Corrupt {
                    run_id: run_id.to_string(),
                    detail: format!("line {}: {}", idx + 1, e),
                })
            })
            .collect()
    }

    fn read_all(&self, run_id: &str) -> Result<Vec<Checkpoint>, StoreError> {
        let path = self.log_path(run_id)?;
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path).map_err(Self::io(&path))?;
        Self::parse_log(run_id, &content)
    }

    fn append_locked(&self, file: &mut File, path: &Path, checkpoint: &Checkpoint) -> Result<AppendOutcome, StoreError> {
        let mut content = String::new();
        file.seek(SeekFrom::Start(0)).map_err(Self::io(path))?;
        file.read_to_string(&mut content).map_err(Self::io(path))?;

        let latest = Self::latest_in(&checkpoint.run_id, &content)?.map(|c| c.sequence_no);
        if !accepts(latest, checkpoint.sequence_no) {
            debug!(
                run_id = %checkpoint.run_id,
                sequence_no = checkpoint.sequence_no,
                latest = ?latest,
                "checkpoint append conflict"
            );
            return Ok(AppendOutcome::Conflict);
        }

        let (complete, torn) = Self::split_torn_tail(&content);
        if !torn.is_empty() {
            warn!(
                run_id = %checkpoint.run_id,
                bytes = torn.len(),
                "dropping incomplete trailing checkpoint write"
            );
            file.set_len(complete.len() as u64).map_err(Self::io(path))?;
        }

        let mut line = serde_json::to_string(checkpoint).map_err(StoreError::Serialize)?;
        line.push('\n');
        file.seek(SeekFrom::End(0)).map_err(Self::io(path))?;
        file.write_all(line.as_bytes()).map_err(Self::io(path))?;
        file.sync_all().map_err(Self::io(path))?;
        Ok(AppendOutcome::Appended)
    }

    fn append_blocking(&self, checkpoint: &Checkpoint) -> Result<AppendOutcome, StoreError> {
        let path = self.log_path(&checkpoint.run_id)?;
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(Self::io(&path))?;
        file.lock_exclusive().map_err(Self::io(&path))?;
        let result = self.append_locked(&mut file, &path, checkpoint);
        // Unlock errors are not actionable; the lock is released on close anyway.
        let _ = FileExt::unlock(&file);
        result
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn append(&self, checkpoint: &Checkpoint) -> Result<AppendOutcome, StoreError> {
        let store = self.clone();
        let checkpoint = checkpoint.clone();
        tokio::task::spawn_blocking(move || store.append_blocking(&checkpoint))
            .await
            .map_err(|e| StoreError::Database(anyhow::anyhow!("checkpoint task panicked: {}", e)))?
    }

    async fn load_latest(&self, run_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        let store = self.clone();
        let run_id = run_id.to_string();
        tokio::task::spawn_blocking(move || {
            let path = store.log_path(&run_id)?;
            if !path.exists() {
                return Ok(None);
            }
            let content = fs::read_to_string(&path).map_err(Self::io(&path))?;
            Self::latest_in(&run_id, &content)
        })
        .await
        .map_err(|e| StoreError::Database(anyhow::anyhow!("checkpoint task panicked: {}", e)))?
    }

    async fn history(&self, run_id: &str) -> Result<Vec<Checkpoint>, StoreError> {
        let store = self.clone();
        let run_id = run_id.to_string();
        tokio::task::spawn_blocking(move || store.read_all(&run_id))
            .await
            .map_err(|e| StoreError::Database(anyhow::anyhow!("checkpoint task panicked: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::super::contract;
    use super::*;
    use crate::blackboard::Blackboard;
    use crate::steps::{StepHint, StepName};
    use tempfile::tempdir;

    fn make_store() -> (FileCheckpointStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("checkpoints")).unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_append_then_load() {
        let (store, _dir) = make_store();
        contract::append_then_load(&store).await;
    }

    #[tokio::test]
    async fn test_rejects_out_of_order() {
        let (store, _dir) = make_store();
        contract::rejects_out_of_order(&store).await;
    }

    #[tokio::test]
    async fn test_runs_are_independent() {
        let (store, _dir) = make_store();
        contract::runs_are_independent(&store).await;
    }

    #[tokio::test]
    async fn test_recovery_after_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoints");
        {
            let store = FileCheckpointStore::new(&path).unwrap();
            let first = Checkpoint::initial(Blackboard::new("run-r", "intent"));
            store.append(&first).await.unwrap();
            let second = first.successor(Some(StepName::Coordinator), StepHint::Revise, first.state.clone());
            store.append(&second).await.unwrap();
        }

        // Simulate a restart by creating a new store over the same directory
        let store = FileCheckpointStore::new(&path).unwrap();
        let latest = store.load_latest("run-r").await.unwrap().unwrap();
        assert_eq!(latest.sequence_no, 1);
        assert_eq!(latest.step_name, Some(StepName::Coordinator));
        let third = latest.successor(Some(StepName::Drafter), StepHint::Proceed, latest.state.clone());
        assert_eq!(store.append(&third).await.unwrap(), AppendOutcome::Appended);
    }

    #[tokio::test]
    async fn test_corrupt_line_is_reported() {
        let (store, _dir) = make_store();
        let first = Checkpoint::initial(Blackboard::new("run-x", "intent"));
        store.append(&first).await.unwrap();
        let path = store.log_path("run-x").unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{not json").unwrap();

        let err = store.load_latest("run-x").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
        let err = store.history("run-x").await.unwrap_err();
        assert!(err.to_string().contains("line 2"));
        let next = first.successor(None, StepHint::Proceed, first.state.clone());
        assert!(matches!(
            store.append(&next).await.unwrap_err(),
            StoreError::Corrupt { .. }
        ));
    }

    #[tokio::test]
    async fn test_incomplete_trailing_write_is_ignored() {
        let (store, _dir) = make_store();
        let first = Checkpoint::initial(Blackboard::new("run-t", "intent"));
        store.append(&first).await.unwrap();
        let path = store.log_path("run-t").unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "{{\"run_id\":\"").unwrap();
        drop(file);

        let latest = store.load_latest("run-t").await.unwrap().unwrap();
        assert_eq!(latest.sequence_no, 0);
        assert_eq!(store.history("run-t").await.unwrap().len(), 1);

        // The next append replaces the fragment instead of gluing onto it.
        let next = first.successor(Some(StepName::Coordinator), StepHint::Revise, first.state.clone());
        assert_eq!(store.append(&next).await.unwrap(), AppendOutcome::Appended);
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.ends_with('\n'));
        assert_eq!(store.load_latest("run-t").await.unwrap().unwrap().sequence_no, 1);
    }

    #[tokio::test]
    async fn test_rejects_path_like_run_ids() {
        let (store, _dir) = make_store();
        assert!(matches!(
            store.load_latest("../escape").await.unwrap_err(),
            StoreError::InvalidRunId(_)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_writers_only_one_wins() {
        let (store, _dir) = make_store();
        let first = Checkpoint::initial(Blackboard::new("run-w", "intent"));
        store.append(&first).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            let next = first.successor(Some(StepName::Coordinator), StepHint::Revise, first.state.clone());
            handles.push(tokio::spawn(async move { store.append(&next).await.unwrap() }));
        }
        let mut appended = 0;
        for handle in handles {
            if handle.await.unwrap() == AppendOutcome::Appended {
                appended += 1;
            }
        }
        assert_eq!(appended, 1);
        assert_eq!(store.history("run-w").await.unwrap().len(), 2);
    }
}
