//! The execution engine.
//!
//! One call to [`Engine::start`] or [`Engine::resume`] drives a run forward
//! until it suspends at the human gate, reaches a terminal status, or loses
//! a checkpoint race to another worker. Each completed step is persisted
//! before the next route is evaluated, so the latest checkpoint is always a
//! safe resume point and no step is ever executed twice.
//!
//! ```text
//! load latest ─▶ terminal? ─yes─▶ return
//!      ▲            │no
//!      │         route(step, hint, state)
//!      │            │
//!      │    human gate without decision ─▶ persist awaiting_human ─▶ suspend
//!      │            │
//!      │      execute (timeout + retry) ─▶ verify effects
//!      │            │
//!      └── append checkpoint (conflict ─▶ superseded) ◀─┘
//! ```

mod locks;
mod retry;

pub use locks::{RunGuard, RunLocks};
pub use retry::{RetryPolicy, execute_with_retry};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::blackboard::{Blackboard, HumanDecision, ReviewAction, RunStatus, ScratchpadNote};
use crate::checkpoint::{AppendOutcome, Checkpoint, CheckpointStore};
use crate::collaborators::Collaborators;
use crate::config::EngineConfig;
use crate::errors::{EngineError, FailureCode};
use crate::events::{EventSink, NoopSink, StepEvent};
use crate::router::{GatePolicy, Route, Router};
use crate::steps::{StepExecutor, StepName, StepSet, verify_step_effects};

/// How a `start`/`resume` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// approved, rejected or cancelled
    Terminal,
    /// Waiting at the human gate.
    Suspended,
    /// The run ended in `failed`.
    Error,
    /// Another worker appended first; this call stopped without mutating.
    Superseded,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Terminal => "terminal",
            Self::Suspended => "suspended",
            Self::Error => "error",
            Self::Superseded => "superseded",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: ExecutionStatus,
    pub snapshot: Blackboard,
}

/// Acknowledgement for an accepted review decision, with where the run
/// ended up after acting on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewAck {
    pub run_id: String,
    pub action: ReviewAction,
    /// Checkpoint that recorded the decision.
    pub sequence_no: u64,
    pub outcome: RunOutcome,
}

pub struct EngineBuilder {
    config: EngineConfig,
    store: Arc<dyn CheckpointStore>,
    collaborators: Collaborators,
    overrides: Vec<Arc<dyn StepExecutor>>,
    sink: Arc<dyn EventSink>,
    retry: Option<RetryPolicy>,
}

impl EngineBuilder {
    pub fn collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = collaborators;
        self
    }

    /// Replace one standard step executor.
    pub fn executor(mut self, executor: Arc<dyn StepExecutor>) -> Self {
        self.overrides.push(executor);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Override the timeout/retry settings derived from the config.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn build(self) -> Engine {
        let policy = GatePolicy::from_config(&self.config);
        let steps = self
            .overrides
            .into_iter()
            .fold(StepSet::new(policy, self.collaborators), |set, executor| {
                set.with_executor(executor)
            });
        Engine {
            retry: self.retry.unwrap_or_else(|| RetryPolicy::from_config(&self.config)),
            router: Router::new(policy),
            config: self.config,
            store: self.store,
            steps,
            sink: self.sink,
            locks: RunLocks::new(),
        }
    }
}

/// Drives runs through the workflow. Cheap to share behind an `Arc`.
pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn CheckpointStore>,
    steps: StepSet,
    router: Router,
    retry: RetryPolicy,
    sink: Arc<dyn EventSink>,
    locks: RunLocks,
}

impl Engine {
    pub fn builder(config: EngineConfig, store: Arc<dyn CheckpointStore>) -> EngineBuilder {
        EngineBuilder {
            config,
            store,
            collaborators: Collaborators::heuristic(),
            overrides: Vec::new(),
            sink: Arc::new(NoopSink),
            retry: None,
        }
    }

    /// Engine with heuristic collaborators and no event sink.
    pub fn new(config: EngineConfig, store: Arc<dyn CheckpointStore>) -> Self {
        Self::builder(config, store).build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a run for `intent` and drive it until it suspends or ends.
    pub async fn start(&self, intent: &str) -> Result<RunOutcome, EngineError> {
        let intent = intent.trim();
        if intent.is_empty() {
            return Err(EngineError::BadRequest("intent must not be empty".to_string()));
        }

        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("run", run_id = %run_id);
        self.start_run(&run_id, intent).instrument(span).await
    }

    async fn start_run(&self, run_id: &str, intent: &str) -> Result<RunOutcome, EngineError> {
        let _guard = self.locks.acquire(run_id).await;
        let initial = Checkpoint::initial(Blackboard::new(run_id, intent));
        if self.store.append(&initial).await? == AppendOutcome::Conflict {
            return self.superseded(run_id).await;
        }
        info!(intent = %crate::util::preview(intent, 80), "run started");
        self.emit(StepEvent::from_checkpoint(&initial));
        self.drive(initial).await
    }

    /// Continue a run from its latest checkpoint, optionally attaching a
    /// human decision first.
    ///
    /// Resuming a suspended run without a decision is a no-op that returns
    /// the same snapshot.
    pub async fn resume(
        &self,
        run_id: &str,
        decision: Option<HumanDecision>,
    ) -> Result<RunOutcome, EngineError> {
        let span = info_span!("run", run_id = %run_id);
        self.resume_run(run_id, decision).instrument(span).await
    }

    async fn resume_run(
        &self,
        run_id: &str,
        decision: Option<HumanDecision>,
    ) -> Result<RunOutcome, EngineError> {
        let _guard = self.locks.acquire(run_id).await;
        let mut latest = self.load(run_id).await?;
        let status = latest.state.run_status;
        if status.is_terminal() {
            return Err(EngineError::RunTerminal {
                run_id: run_id.to_string(),
                status: status.to_string(),
            });
        }
        if let Some(decision) = decision {
            if status != RunStatus::AwaitingHuman {
                return Err(EngineError::NotAwaitingReview {
                    run_id: run_id.to_string(),
                    status: status.to_string(),
                });
            }
            debug!(action = %decision.action, "decision attached on resume");
            latest.state.pending_human_decision = Some(decision);
        }
        self.drive(latest).await
    }

    /// Latest snapshot for a run.
    pub async fn get_state(&self, run_id: &str) -> Result<Blackboard, EngineError> {
        Ok(self.load(run_id).await?.state)
    }

    /// All checkpoints for a run, oldest first.
    pub async fn history(&self, run_id: &str) -> Result<Vec<Checkpoint>, EngineError> {
        let history = self.store.history(run_id).await?;
        if history.is_empty() {
            return Err(EngineError::RunNotFound {
                run_id: run_id.to_string(),
            });
        }
        Ok(history)
    }

    /// Record a human decision for a run waiting at the gate and drive the
    /// run with it, like `resume` with a decision attached.
    ///
    /// The decision is checkpointed before the gate runs, so a crash in
    /// between leaves it pending for the next `resume`.
    pub async fn submit_review(
        &self,
        run_id: &str,
        decision: HumanDecision,
    ) -> Result<ReviewAck, EngineError> {
        let span = info_span!("review", run_id = %run_id, action = %decision.action);
        self.record_review(run_id, decision).instrument(span).await
    }

    async fn record_review(
        &self,
        run_id: &str,
        decision: HumanDecision,
    ) -> Result<ReviewAck, EngineError> {
        let _guard = self.locks.acquire(run_id).await;
        let latest = self.load(run_id).await?;
        if latest.state.run_status != RunStatus::AwaitingHuman {
            return Err(EngineError::NotAwaitingReview {
                run_id: run_id.to_string(),
                status: latest.state.run_status.to_string(),
            });
        }

        let action = decision.action;
        let mut state = latest.state.clone();
        state.note(
            ScratchpadNote::new("engine", format!("Review decision received: {}", action))
                .with_input(format!(
                    "Feedback: {}\nEdited text: {}",
                    decision.feedback.as_deref().unwrap_or("none"),
                    if decision.edited_text.is_some() { "yes" } else { "no" }
                )),
        );
        state.pending_human_decision = Some(decision);

        // Keep the routing origin so the gate is re-derived on resume.
        let checkpoint = latest.successor(latest.step_name, latest.hint, state);
        if !self.persist(&checkpoint, true).await? {
            return Err(EngineError::BadRequest(format!(
                "run {} changed while the review was being recorded; retry",
                run_id
            )));
        }
        info!(sequence_no = checkpoint.sequence_no, "review decision recorded");
        let sequence_no = checkpoint.sequence_no;
        let outcome = self.drive(checkpoint).await?;
        Ok(ReviewAck {
            run_id: run_id.to_string(),
            action,
            sequence_no,
            outcome,
        })
    }

    async fn load(&self, run_id: &str) -> Result<Checkpoint, EngineError> {
        self.store
            .load_latest(run_id)
            .await?
            .ok_or_else(|| EngineError::RunNotFound {
                run_id: run_id.to_string(),
            })
    }

    async fn superseded(&self, run_id: &str) -> Result<RunOutcome, EngineError> {
        let latest = self.load(run_id).await?;
        warn!(sequence_no = latest.sequence_no, "checkpoint conflict; another worker owns the run");
        Ok(RunOutcome {
            run_id: run_id.to_string(),
            status: ExecutionStatus::Superseded,
            snapshot: latest.state,
        })
    }

    fn emit(&self, event: StepEvent) {
        if let Err(e) = self.sink.on_step(&event) {
            warn!(sequence_no = event.sequence_no, error = %e, "event sink failed");
        }
    }

    fn outcome(checkpoint: Checkpoint, status: ExecutionStatus) -> RunOutcome {
        RunOutcome {
            run_id: checkpoint.run_id,
            status,
            snapshot: checkpoint.state,
        }
    }

    /// Persist `checkpoint`, returning `false` when another writer won.
    async fn persist(&self, checkpoint: &Checkpoint, by_engine: bool) -> Result<bool, EngineError> {
        match self.store.append(checkpoint).await? {
            AppendOutcome::Appended => {
                let event = StepEvent::from_checkpoint(checkpoint);
                self.emit(if by_engine { event.by_engine() } else { event });
                Ok(true)
            }
            AppendOutcome::Conflict => Ok(false),
        }
    }

    /// The run loop. `latest` is the newest persisted checkpoint, except that
    /// its state may carry a decision attached by `resume`.
    async fn drive(&self, mut latest: Checkpoint) -> Result<RunOutcome, EngineError> {
        loop {
            let status = latest.state.run_status;
            if status.is_terminal() {
                let exec = if status == RunStatus::Failed {
                    ExecutionStatus::Error
                } else {
                    ExecutionStatus::Terminal
                };
                info!(status = %status, sequence_no = latest.sequence_no, "run finished");
                return Ok(Self::outcome(latest, exec));
            }

            let step = match self.router.route(latest.step_name, latest.hint, &latest.state) {
                Route::Run(step) => step,
                Route::Finish(expected) => {
                    // Terminal routes are only produced after a step already set the status.
                    let mut state = latest.state.clone();
                    state.fail(
                        FailureCode::ContractViolation,
                        format!("router finished with {} but run is {}", expected, status),
                    );
                    let checkpoint = latest.successor(latest.step_name, latest.hint, state);
                    if !self.persist(&checkpoint, true).await? {
                        return self.superseded(&latest.run_id).await;
                    }
                    latest = checkpoint;
                    continue;
                }
            };

            let mut working = latest.state.clone();
            if step == StepName::HumanGate && working.pending_human_decision.is_none() {
                if self.config.auto_approve {
                    info!("auto-approve enabled; injecting approval");
                    working.pending_human_decision = Some(HumanDecision::automatic_approve());
                } else if status == RunStatus::AwaitingHuman {
                    debug!(sequence_no = latest.sequence_no, "already awaiting human review");
                    return Ok(Self::outcome(latest, ExecutionStatus::Suspended));
                } else {
                    let checkpoint = self.suspension(&latest);
                    if !self.persist(&checkpoint, true).await? {
                        return self.superseded(&latest.run_id).await;
                    }
                    info!(sequence_no = checkpoint.sequence_no, "suspended awaiting human review");
                    return Ok(Self::outcome(checkpoint, ExecutionStatus::Suspended));
                }
            }

            let checkpoint = self.run_step(&latest, step, working).await;
            if !self.persist(&checkpoint, false).await? {
                return self.superseded(&latest.run_id).await;
            }
            latest = checkpoint;
        }
    }

    /// Execute one step and build the checkpoint that records its result,
    /// or the failure that ended the run.
    async fn run_step(&self, latest: &Checkpoint, step: StepName, working: Blackboard) -> Checkpoint {
        let sequence_no = latest.sequence_no + 1;
        debug!(step = step.as_str(), sequence_no, "executing step");
        let executor = self.steps.get(step);

        let result = execute_with_retry(executor.as_ref(), &working, &self.retry)
            .await
            .and_then(|output| {
                verify_step_effects(step, &working, &output.state).map(|_| output)
            });

        match result {
            Ok(output) => {
                debug!(
                    step = step.as_str(),
                    hint = %output.hint,
                    status = %output.state.run_status,
                    "step completed"
                );
                latest.successor(Some(step), output.hint, output.state)
            }
            Err(err) => {
                error!(step = step.as_str(), code = %err.failure_code(), error = %err, "step failed; failing run");
                let mut failed = working;
                failed.fail(err.failure_code(), err.to_string());
                latest.successor(Some(step), latest.hint, failed)
            }
        }
    }

    /// Checkpoint that parks the run at the gate. It keeps the previous
    /// step and hint so the route to the gate is re-derived on resume.
    fn suspension(&self, latest: &Checkpoint) -> Checkpoint {
        let mut state = latest.state.clone();
        let policy = self.router.policy();
        state.run_status = RunStatus::AwaitingHuman;
        state.note(
            ScratchpadNote::new(
                "engine",
                format!(
                    "Awaiting human review. Safety: {}/100, Quality: {}/100. Iteration: {}/{}.",
                    state.safety_score, state.quality_score, state.iteration_count, policy.max_iterations
                ),
            )
            .with_output("Status: Awaiting human decision"),
        );
        latest.successor(latest.step_name, latest.hint, state)
    }
}
