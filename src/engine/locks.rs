//! Per-run mutual exclusion inside one process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockTable = Arc<Mutex<HashMap<String, Slot>>>;

#[derive(Debug)]
struct Slot {
    mutex: Arc<AsyncMutex<()>>,
    /// Callers holding or waiting for `mutex`.
    users: usize,
}

/// Lock table keyed by run id. Entries are dropped once nobody holds or waits
/// for them, so the table only grows with concurrently active runs.
#[derive(Debug, Clone, Default)]
pub struct RunLocks {
    table: LockTable,
}

/// A caller's claim on a table entry. Released on drop whether or not the
/// lock was ever obtained, so abandoned waits do not leak entries.
struct Registration {
    run_id: String,
    table: LockTable,
}

impl Registration {
    fn register(table: &LockTable, run_id: &str) -> (Self, Arc<AsyncMutex<()>>) {
        let mut slots = table.lock().unwrap_or_else(|p| p.into_inner());
        let slot = slots.entry(run_id.to_string()).or_insert_with(|| Slot {
            mutex: Arc::new(AsyncMutex::new(())),
            users: 0,
        });
        slot.users += 1;
        let registration = Self {
            run_id: run_id.to_string(),
            table: table.clone(),
        };
        (registration, slot.mutex.clone())
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut slots = self.table.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(slot) = slots.get_mut(&self.run_id) {
            slot.users = slot.users.saturating_sub(1);
            if slot.users == 0 {
                slots.remove(&self.run_id);
            }
        }
    }
}

/// Held while a caller executes steps for one run.
pub struct RunGuard {
    // Fields drop in order: the run is released before the entry is.
    _guard: OwnedMutexGuard<()>,
    _registration: Registration,
}

impl RunLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `run_id`.
    pub async fn acquire(&self, run_id: &str) -> RunGuard {
        let (registration, mutex) = Registration::register(&self.table, run_id);
        let guard = mutex.lock_owned().await;
        RunGuard {
            _guard: guard,
            _registration: registration,
        }
    }

    /// Number of runs currently locked or waited on.
    pub fn active(&self) -> usize {
        self.table.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_run_is_serialized() {
        let locks = RunLocks::new();
        let inside = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("run-1").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_different_runs_do_not_block() {
        let locks = RunLocks::new();
        let _a = locks.acquire("run-a").await;
        let acquired = tokio::time::timeout(Duration::from_millis(100), locks.acquire("run-b")).await;
        assert!(acquired.is_ok());
        assert_eq!(locks.active(), 2);
    }

    #[tokio::test]
    async fn test_abandoned_wait_does_not_leak_entry() {
        let locks = RunLocks::new();
        let held = locks.acquire("run-c").await;
        let waited = tokio::time::timeout(Duration::from_millis(20), locks.acquire("run-c")).await;
        assert!(waited.is_err());
        assert_eq!(locks.active(), 1);

        drop(held);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_entry_removed_when_idle() {
        let locks = RunLocks::new();
        {
            let _guard = locks.acquire("run-x").await;
            assert_eq!(locks.active(), 1);
        }
        assert_eq!(locks.active(), 0);
    }
}
