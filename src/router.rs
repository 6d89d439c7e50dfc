//! Routing policy: which step runs after the one that just completed.
//!
//! [`Router::route`] is a pure function of the last completed step, the hint
//! it returned, and the blackboard. The [`GatePolicy`] thresholds are
//! authoritative for every reviewer transition; the hint only matters after
//! the human gate, where the consumed decision is no longer on the
//! blackboard.

use serde::{Deserialize, Serialize};

use crate::blackboard::{Blackboard, ReviewAction, RunStatus};
use crate::config::EngineConfig;
use crate::steps::{StepHint, StepName};

/// Thresholds and loop bounds shared by the router and the Coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatePolicy {
    pub safety_threshold: u8,
    pub quality_threshold: u8,
    pub max_iterations: u32,
    /// 0 means human rejections never end the run.
    pub max_human_rejections: u32,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Coordinator verdict for the current scores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Nothing drafted yet.
    FirstPass,
    /// Both scores clear their thresholds.
    ReadyForReview,
    /// Scores fall short and iterations remain.
    Revise { reasons: Vec<String> },
    /// Scores fall short and the iteration budget is spent.
    ForcedEscalation { reasons: Vec<String> },
}

impl Verdict {
    pub fn goes_to_human(&self) -> bool {
        matches!(self, Self::ReadyForReview | Self::ForcedEscalation { .. })
    }
}

impl GatePolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            safety_threshold: config.safety_threshold,
            quality_threshold: config.quality_threshold,
            max_iterations: config.max_iterations,
            max_human_rejections: config.max_human_rejections,
        }
    }

    pub fn safety_passes(&self, score: u8) -> bool {
        score >= self.safety_threshold
    }

    pub fn quality_passes(&self, score: u8) -> bool {
        score >= self.quality_threshold
    }

    pub fn iterations_exhausted(&self, iteration_count: u32) -> bool {
        iteration_count >= self.max_iterations
    }

    pub fn rejections_exhausted(&self, rejections: u32) -> bool {
        self.max_human_rejections > 0 && rejections >= self.max_human_rejections
    }

    /// Reasons the current scores fall short, empty when both pass.
    pub fn shortfalls(&self, state: &Blackboard) -> Vec<String> {
        let mut reasons = Vec::new();
        if !self.safety_passes(state.safety_score) {
            reasons.push(format!(
                "Safety score ({}) below threshold ({})",
                state.safety_score, self.safety_threshold
            ));
        }
        if !self.quality_passes(state.quality_score) {
            reasons.push(format!(
                "Quality score ({}) below threshold ({})",
                state.quality_score, self.quality_threshold
            ));
        }
        reasons
    }

    /// Forced escalation wins over looping once the budget is spent.
    pub fn coordinate(&self, state: &Blackboard) -> Verdict {
        if state.iteration_count == 0 {
            return Verdict::FirstPass;
        }
        let reasons = self.shortfalls(state);
        if reasons.is_empty() {
            Verdict::ReadyForReview
        } else if self.iterations_exhausted(state.iteration_count) {
            Verdict::ForcedEscalation { reasons }
        } else {
            Verdict::Revise { reasons }
        }
    }
}

/// What the engine should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Run(StepName),
    Finish(RunStatus),
}

#[derive(Debug, Clone, Copy)]
pub struct Router {
    policy: GatePolicy,
}

impl Router {
    pub fn new(policy: GatePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    /// Decide the next step. `last_step` is `None` for a fresh run.
    pub fn route(&self, last_step: Option<StepName>, hint: StepHint, state: &Blackboard) -> Route {
        let Some(step) = last_step else {
            return Route::Run(StepName::Coordinator);
        };

        match step {
            StepName::Coordinator => {
                if self.policy.coordinate(state).goes_to_human() {
                    Route::Run(StepName::HumanGate)
                } else {
                    Route::Run(StepName::Drafter)
                }
            }
            StepName::Drafter => Route::Run(StepName::SafetyReviewer),
            StepName::SafetyReviewer => {
                if self.policy.safety_passes(state.safety_score) {
                    Route::Run(StepName::QualityReviewer)
                } else if self.policy.iterations_exhausted(state.iteration_count) {
                    Route::Run(StepName::HumanGate)
                } else {
                    Route::Run(StepName::Drafter)
                }
            }
            StepName::QualityReviewer => Route::Run(StepName::Coordinator),
            StepName::HumanGate => match hint {
                StepHint::Decision(ReviewAction::Approve) => Route::Run(StepName::Finalizer),
                StepHint::Decision(ReviewAction::Reject) => {
                    if state.run_status == RunStatus::Rejected {
                        Route::Finish(RunStatus::Rejected)
                    } else {
                        Route::Run(StepName::Drafter)
                    }
                }
                StepHint::Decision(ReviewAction::Cancel) => Route::Finish(RunStatus::Cancelled),
                // The gate ran without consuming a decision: stay at the gate.
                _ => Route::Run(StepName::HumanGate),
            },
            StepName::Finalizer => Route::Finish(RunStatus::Approved),
        }
    }
}
