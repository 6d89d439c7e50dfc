//! Timeout and retry around a single step execution.

use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::warn;

use crate::blackboard::Blackboard;
use crate::config::EngineConfig;
use crate::errors::StepError;
use crate::steps::{StepExecutor, StepOutput};

/// How a failing step is retried.
///
/// Timeouts and transient errors get up to `max_retries` extra attempts with
/// exponential backoff. Malformed output gets one extra attempt. Contract
/// violations are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
    pub step_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_retries: config.max_step_retries,
            backoff: config.retry_backoff(),
            step_timeout: config.step_timeout(),
        }
    }

    /// Whether a failure on attempt `attempt` (1-based) earns another try.
    pub fn should_retry(&self, err: &StepError, attempt: u32) -> bool {
        match err {
            StepError::Timeout { .. } | StepError::Transient { .. } => attempt <= self.max_retries,
            StepError::Malformed { .. } => attempt == 1,
            StepError::ContractViolation { .. } => false,
        }
    }

    /// Delay before attempt `attempt + 1`: `backoff * 2^(attempt - 1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Run `executor` against `state`, enforcing the timeout and retry policy.
pub async fn execute_with_retry(
    executor: &dyn StepExecutor,
    state: &Blackboard,
    policy: &RetryPolicy,
) -> Result<StepOutput, StepError> {
    let step = executor.name();
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let result = match timeout(policy.step_timeout, executor.execute(state)).await {
            Ok(result) => result,
            Err(_) => Err(StepError::Timeout {
                step: step.as_str().to_string(),
                limit: policy.step_timeout,
            }),
        };

        match result {
            Ok(output) => return Ok(output),
            Err(err) if policy.should_retry(&err, attempt) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    run_id = %state.run_id,
                    step = step.as_str(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "step failed, retrying"
                );
                sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::ScratchpadNote;
    use crate::steps::{StepHint, StepName};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with `make_err` for the first `failures` calls, then succeeds.
    struct Flaky {
        calls: AtomicU32,
        failures: u32,
        make_err: fn() -> StepError,
    }

    impl Flaky {
        fn new(failures: u32, make_err: fn() -> StepError) -> Self {
            Self {
                calls: AtomicU32::new(0),
                failures,
                make_err,
            }
        }
    }

    #[async_trait]
    impl StepExecutor for Flaky {
        fn name(&self) -> StepName {
            StepName::Coordinator
        }

        async fn execute(&self, state: &Blackboard) -> Result<StepOutput, StepError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err((self.make_err)());
            }
            let mut next = state.clone();
            next.note(ScratchpadNote::new("coordinator", "ok"));
            Ok(StepOutput::new(next, StepHint::Proceed))
        }
    }

    struct Sleepy;

    #[async_trait]
    impl StepExecutor for Sleepy {
        fn name(&self) -> StepName {
            StepName::Drafter
        }

        async fn execute(&self, _state: &Blackboard) -> Result<StepOutput, StepError> {
            sleep(Duration::from_secs(5)).await;
            Err(StepError::transient("drafter", "unreachable"))
        }
    }

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff: Duration::from_millis(1),
            step_timeout: Duration::from_millis(200),
        }
    }

    fn transient() -> StepError {
        StepError::transient("coordinator", "connection reset")
    }

    fn malformed() -> StepError {
        StepError::malformed("coordinator", "no JSON")
    }

    fn contract() -> StepError {
        StepError::contract("coordinator", "bad")
    }

    #[test]
    fn test_backoff_is_exponential() {
        let policy = RetryPolicy {
            max_retries: 3,
            backoff: Duration::from_millis(200),
            step_timeout: Duration::from_secs(60),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
    }

    #[tokio::test]
    async fn test_transient_recovers_within_budget() {
        let step = Flaky::new(2, transient);
        let bb = Blackboard::new("run", "intent");
        assert!(execute_with_retry(&step, &bb, &fast(2)).await.is_ok());
        assert_eq!(step.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_transient_exhausts_budget() {
        let step = Flaky::new(5, transient);
        let bb = Blackboard::new("run", "intent");
        let err = execute_with_retry(&step, &bb, &fast(2)).await.unwrap_err();
        assert!(matches!(err, StepError::Transient { .. }));
        assert_eq!(step.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_malformed_retried_once() {
        let bb = Blackboard::new("run", "intent");
        let step = Flaky::new(1, malformed);
        assert!(execute_with_retry(&step, &bb, &fast(5)).await.is_ok());

        let step = Flaky::new(2, malformed);
        let err = execute_with_retry(&step, &bb, &fast(5)).await.unwrap_err();
        assert!(matches!(err, StepError::Malformed { .. }));
        assert_eq!(step.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_contract_violation_not_retried() {
        let step = Flaky::new(1, contract);
        let bb = Blackboard::new("run", "intent");
        assert!(execute_with_retry(&step, &bb, &fast(5)).await.is_err());
        assert_eq!(step.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_classified() {
        let bb = Blackboard::new("run", "intent");
        let err = execute_with_retry(&Sleepy, &bb, &fast(0)).await.unwrap_err();
        assert!(matches!(err, StepError::Timeout { .. }));
        assert!(err.to_string().ends_with("after 200ms"));
    }
}
