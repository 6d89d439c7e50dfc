//! Step-transition events for observers.
//!
//! The engine calls [`EventSink::on_step`] once per persisted checkpoint. Sinks
//! must return quickly; an error is logged and otherwise ignored so a broken
//! observer can never stall or fail a run.

mod jsonl;

pub use jsonl::JsonlEventLog;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use crate::blackboard::{Blackboard, RunStatus};
use crate::checkpoint::Checkpoint;
use crate::steps::{StepHint, StepName};

/// One persisted transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepEvent {
    pub run_id: String,
    pub sequence_no: u64,
    /// `None` for the initial checkpoint and for engine-written suspensions.
    pub step_name: Option<StepName>,
    pub hint: StepHint,
    pub run_status: RunStatus,
    pub state: Blackboard,
    pub emitted_at: DateTime<Utc>,
}

impl StepEvent {
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Self {
        Self {
            run_id: checkpoint.run_id.clone(),
            sequence_no: checkpoint.sequence_no,
            step_name: checkpoint.step_name,
            hint: checkpoint.hint,
            run_status: checkpoint.state.run_status,
            state: checkpoint.state.clone(),
            emitted_at: Utc::now(),
        }
    }

    /// Mark the event as written by the engine rather than a step. Such
    /// checkpoints carry the previous step name only for routing.
    pub fn by_engine(mut self) -> Self {
        self.step_name = None;
        self
    }

    /// Short label for logs: the step name or the engine itself.
    pub fn label(&self) -> &'static str {
        self.step_name.map(|s| s.as_str()).unwrap_or("engine")
    }
}

pub trait EventSink: Send + Sync {
    fn on_step(&self, event: &StepEvent) -> anyhow::Result<()>;
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn on_step(&self, _event: &StepEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Logs each transition at `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_step(&self, event: &StepEvent) -> anyhow::Result<()> {
        let note = event
            .state
            .last_note()
            .map(|n| n.message.as_str())
            .unwrap_or("");
        info!(
            run_id = %event.run_id,
            sequence_no = event.sequence_no,
            step = event.label(),
            hint = %event.hint,
            status = %event.run_status,
            iteration = event.state.iteration_count,
            "{}",
            note
        );
        Ok(())
    }
}

/// Serializes events to JSON and publishes them on a tokio broadcast channel.
///
/// Sending with no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<String>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn on_step(&self, event: &StepEvent) -> anyhow::Result<()> {
        let json = serde_json::to_string(event)?;
        let _ = self.tx.send(json); // Ignore error if no receivers
        Ok(())
    }
}

/// Forwards each event to several sinks; every sink sees every event.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn on_step(&self, event: &StepEvent) -> anyhow::Result<()> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.on_step(event)
                && first_err.is_none()
            {
                first_err = Some(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event() -> StepEvent {
        let cp = Checkpoint::initial(Blackboard::new("run-e", "intent"));
        StepEvent::from_checkpoint(&cp)
    }

    struct Counting(AtomicUsize);

    impl EventSink for Counting {
        fn on_step(&self, _event: &StepEvent) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    impl EventSink for Failing {
        fn on_step(&self, _event: &StepEvent) -> anyhow::Result<()> {
            anyhow::bail!("observer offline")
        }
    }

    #[tokio::test]
    async fn test_broadcast_delivers_to_subscribers() {
        let sink = BroadcastSink::new(16);
        let mut rx = sink.subscribe();
        sink.on_step(&event()).unwrap();
        let json = rx.recv().await.unwrap();
        let parsed: StepEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.run_id, "run-e");
        assert_eq!(parsed.sequence_no, 0);
    }

    #[test]
    fn test_broadcast_without_receivers_is_ok() {
        let sink = BroadcastSink::new(4);
        assert!(sink.on_step(&event()).is_ok());
    }

    #[test]
    fn test_fanout_reaches_all_sinks_despite_errors() {
        let counter = Arc::new(Counting(AtomicUsize::new(0)));
        let fanout = FanoutSink::new()
            .with(Arc::new(Failing))
            .with(counter.clone());
        let err = fanout.on_step(&event()).unwrap_err();
        assert!(err.to_string().contains("observer offline"));
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_initial_event_label_is_engine() {
        assert_eq!(event().label(), "engine");
        assert!(NoopSink.on_step(&event()).is_ok());
        assert!(TracingSink.on_step(&event()).is_ok());
    }
}
