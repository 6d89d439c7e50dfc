use async_trait::async_trait;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use std::path::Path;
use std::sync::Arc;

use super::{AppendOutcome, Checkpoint, CheckpointStore};
use crate::errors::StoreError;
use crate::steps::StepName;

/// SQLite-backed store.
///
/// Wraps the connection behind `Arc<Mutex>` and runs every query on tokio's
/// blocking pool via `spawn_blocking`, so SQLite I/O never ties up async
/// worker threads.
#[derive(Clone)]
pub struct SqliteCheckpointStore {
    inner: Arc<std::sync::Mutex<CheckpointDb>>,
}

impl SqliteCheckpointStore {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::from_connection(conn)
    }

    /// In-memory database, for tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        let db = CheckpointDb { conn };
        db.init()?;
        Ok(Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        })
    }

    /// Run a closure with access to the database on a blocking thread.
    async fn call<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&CheckpointDb) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Database(anyhow::anyhow!("DB task panicked: {}", e)))?
    }
}

fn db_err(e: rusqlite::Error) -> StoreError {
    StoreError::Database(e.into())
}

struct CheckpointDb {
    conn: Connection,
}

/// Raw row before JSON columns are decoded.
struct CheckpointRow {
    run_id: String,
    sequence_no: i64,
    step_name: Option<String>,
    hint: String,
    state: String,
    written_at: String,
}

impl CheckpointDb {
    fn init(&self) -> Result<(), StoreError> {
        self.conn
            .execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")
            .map_err(db_err)?;
        self.run_migrations()
    }

    fn run_migrations(&self) -> Result<(), StoreError> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS checkpoints (
                    run_id TEXT NOT NULL,
                    sequence_no INTEGER NOT NULL,
                    step_name TEXT,
                    hint TEXT NOT NULL,
                    state TEXT NOT NULL,
                    written_at TEXT NOT NULL,
                    PRIMARY KEY (run_id, sequence_no)
                );
                ",
            )
            .map_err(db_err)
    }

    /// Insert only when `sequence_no` is one past the stored maximum.
    fn append(&self, checkpoint: &Checkpoint) -> Result<AppendOutcome, StoreError> {
        let hint = serde_json::to_string(&checkpoint.hint).map_err(StoreError::Serialize)?;
        let state = serde_json::to_string(&checkpoint.state).map_err(StoreError::Serialize)?;
        let result = self.conn.execute(
            "INSERT INTO checkpoints (run_id, sequence_no, step_name, hint, state, written_at)
             SELECT ?1, ?2, ?3, ?4, ?5, ?6
             WHERE COALESCE(
                 (SELECT MAX(sequence_no) FROM checkpoints WHERE run_id = ?1), -1
             ) = ?2 - 1",
            params![
                checkpoint.run_id,
                checkpoint.sequence_no as i64,
                checkpoint.step_name.map(|s| s.as_str()),
                hint,
                state,
                checkpoint.written_at.to_rfc3339(),
            ],
        );
        match result {
            Ok(1) => Ok(AppendOutcome::Appended),
            Ok(_) => Ok(AppendOutcome::Conflict),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Ok(AppendOutcome::Conflict)
            }
            Err(e) => Err(db_err(e)),
        }
    }

    fn load_latest(&self, run_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT run_id, sequence_no, step_name, hint, state, written_at
                 FROM checkpoints WHERE run_id = ?1
                 ORDER BY sequence_no DESC LIMIT 1",
                params![run_id],
                map_row,
            )
            .optional()
            .map_err(db_err)?;
        row.map(decode).transpose()
    }

    fn history(&self, run_id: &str) -> Result<Vec<Checkpoint>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT run_id, sequence_no, step_name, hint, state, written_at
                 FROM checkpoints WHERE run_id = ?1
                 ORDER BY sequence_no ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![run_id], map_row)
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        rows.into_iter().map(decode).collect()
    }
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CheckpointRow> {
    Ok(CheckpointRow {
        run_id: row.get(0)?,
        sequence_no: row.get(1)?,
        step_name: row.get(2)?,
        hint: row.get(3)?,
        state: row.get(4)?,
        written_at: row.get(5)?,
    })
}

fn decode(row: CheckpointRow) -> Result<Checkpoint, StoreError> {
    let corrupt = |detail: String| StoreError::Corrupt {
        run_id: row.run_id.clone(),
        detail: format!("sequence {}: {}", row.sequence_no, detail),
    };
    let step_name = row
        .step_name
        .as_deref()
        .map(str::parse::<StepName>)
        .transpose()
        .map_err(corrupt)?;
    let hint = serde_json::from_str(&row.hint).map_err(|e| corrupt(e.to_string()))?;
    let state = serde_json::from_str(&row.state).map_err(|e| corrupt(e.to_string()))?;
    let written_at = chrono::DateTime::parse_from_rfc3339(&row.written_at)
        .map_err(|e| corrupt(e.to_string()))?
        .with_timezone(&chrono::Utc);
    Ok(Checkpoint {
        run_id: row.run_id.clone(),
        sequence_no: row.sequence_no as u64,
        step_name,
        hint,
        state,
        written_at,
    })
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn append(&self, checkpoint: &Checkpoint) -> Result<AppendOutcome, StoreError> {
        let checkpoint = checkpoint.clone();
        self.call(move |db| db.append(&checkpoint)).await
    }

    async fn load_latest(&self, run_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        let run_id = run_id.to_string();
        self.call(move |db| db.load_latest(&run_id)).await
    }

    async fn history(&self, run_id: &str) -> Result<Vec<Checkpoint>, StoreError> {
        let run_id = run_id.to_string();
        self.call(move |db| db.history(&run_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::contract;
    use super::*;
    use crate::blackboard::Blackboard;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_append_then_load() {
        contract::append_then_load(&SqliteCheckpointStore::in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_rejects_out_of_order() {
        contract::rejects_out_of_order(&SqliteCheckpointStore::in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_runs_are_independent() {
        contract::runs_are_independent(&SqliteCheckpointStore::in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_migrations_create_table() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        let count: i64 = store
            .call(|db| {
                db.conn
                    .query_row(
                        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='checkpoints'",
                        [],
                        |row| row.get(0),
                    )
                    .map_err(db_err)
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("draftgate.db");
        {
            let store = SqliteCheckpointStore::open(&path).unwrap();
            store
                .append(&Checkpoint::initial(Blackboard::new("run-s", "intent")))
                .await
                .unwrap();
        }
        let store = SqliteCheckpointStore::open(&path).unwrap();
        let latest = store.load_latest("run-s").await.unwrap().unwrap();
        assert_eq!(latest.state.intent, "intent");
    }

    #[tokio::test]
    async fn test_unreadable_state_is_corrupt() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        store
            .call(|db| {
                db.conn
                    .execute(
                        "INSERT INTO checkpoints VALUES ('run-z', 0, NULL, '{\"kind\":\"proceed\"}', 'garbage', '2026-01-01T00:00:00Z')",
                        [],
                    )
                    .map_err(db_err)
            })
            .await
            .unwrap();
        let err = store.load_latest("run-z").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }
}
