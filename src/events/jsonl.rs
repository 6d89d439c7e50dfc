use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use super::{EventSink, StepEvent};

enum WriterMessage {
    Append { path: PathBuf, line: String },
    Flush(oneshot::Sender<()>),
}

/// Append-only per-run event file: `<dir>/<run_id>.events.jsonl`.
///
/// Unlike the checkpoint log this is purely for observers; the engine never
/// reads it back. `on_step` only queues the line; a dedicated writer thread
/// does the file I/O in order. Dropping the log drains the queue.
pub struct JsonlEventLog {
    dir: PathBuf,
    tx: Option<mpsc::UnboundedSender<WriterMessage>>,
    writer: Option<JoinHandle<()>>,
}

impl JsonlEventLog {
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create event log dir {}", dir.display()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = std::thread::Builder::new()
            .name("event-log".to_string())
            .spawn(move || write_loop(rx))
            .context("Failed to start event log writer")?;
        Ok(Self {
            dir: dir.to_path_buf(),
            tx: Some(tx),
            writer: Some(writer),
        })
    }

    pub fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{}.events.jsonl", run_id))
    }

    /// Block until every event queued so far is on disk. Must not be called
    /// from inside an async task.
    pub fn flush(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.send(WriterMessage::Flush(done_tx))?;
        done_rx
            .blocking_recv()
            .context("Event log writer stopped before flushing")
    }

    /// Read back all events recorded for a run.
    pub fn read(&self, run_id: &str) -> Result<Vec<StepEvent>> {
        let path = self.path_for(run_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path).context("Failed to read event log")?;
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).context("Failed to parse event log entry"))
            .collect()
    }

    fn send(&self, message: WriterMessage) -> Result<()> {
        self.tx
            .as_ref()
            .context("Event log is closed")?
            .send(message)
            .map_err(|_| anyhow::anyhow!("Event log writer stopped"))
    }
}

fn write_loop(mut rx: mpsc::UnboundedReceiver<WriterMessage>) {
    while let Some(message) = rx.blocking_recv() {
        match message {
            WriterMessage::Append { path, line } => {
                if let Err(e) = append_line(&path, &line) {
                    warn!(path = %path.display(), error = %e, "failed to write event");
                }
            }
            WriterMessage::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?
        .write_all(line.as_bytes())
}

impl EventSink for JsonlEventLog {
    fn on_step(&self, event: &StepEvent) -> Result<()> {
        let mut line = serde_json::to_string(event).context("Failed to serialize event")?;
        line.push('\n');
        self.send(WriterMessage::Append {
            path: self.path_for(&event.run_id),
            line,
        })
    }
}

impl Drop for JsonlEventLog {
    fn drop(&mut self) {
        // Closing the channel ends the writer once the queue is drained.
        self.tx.take();
        if let Some(writer) = self.writer.take()
            && writer.join().is_err()
        {
            warn!("event log writer panicked");
        }
    }
}
