//! Guarded collaborator calls.
//!
//! Every external call goes through [`Invoker::call`]: a gate slot is held for the duration of
//! one attempt (not across backoff waits), the attempt carries a wall-clock timeout, transient
//! failures are retried along the policy's schedule, and the stop signal wins over both the call
//! and any pending backoff.

use crate::concurrency::ConcurrencyGate;
use crate::control::StopSignal;
use crate::error::PipelineError;
use crate::retry::{FailureClass, RetryPolicy};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Clone, Debug)]
pub struct Invoker {
    gate: ConcurrencyGate,
    policy: RetryPolicy,
}

impl Invoker {
    pub fn new(gate: ConcurrencyGate, policy: RetryPolicy) -> Self {
        Self { gate, policy }
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `make_call` until it succeeds, fails fatally, exhausts the retry budget or `stop` is set.
    pub async fn call<T, F, Fut>(
        &self,
        operation: &str,
        timeout: Duration,
        stop: &StopSignal,
        mut make_call: F,
    ) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let mut backoff_index = 0usize;
        let mut timeouts_seen = 0u32;

        loop {
            if stop.is_stopped() {
                return Err(PipelineError::Cancelled);
            }

            let outcome = tokio::select! {
                biased;
                _ = stop.cancelled() => return Err(PipelineError::Cancelled),
                outcome = self.attempt(operation, timeout, &mut make_call) => outcome,
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let wait = match RetryPolicy::classify(&err) {
                FailureClass::Fatal => return Err(err),
                FailureClass::Timeout => {
                    timeouts_seen += 1;
                    if timeouts_seen > self.policy.timeout_retries() {
                        return Err(err);
                    }
                    Duration::ZERO
                }
                FailureClass::TransientRateLimited => {
                    let Some(wait) = self.policy.next_wait(backoff_index) else {
                        warn!(operation, error = %err, "Retry schedule exhausted");
                        return Err(err);
                    };
                    backoff_index += 1;
                    wait
                }
            };

            debug!(
                operation,
                error = %err,
                wait_ms = wait.as_millis() as u64,
                "Retrying collaborator call"
            );
            if !wait.is_zero() {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => return Err(PipelineError::Cancelled),
                    _ = tokio::time::sleep(wait) => {}
                }
            }
        }
    }

    async fn attempt<T, F, Fut>(
        &self,
        operation: &str,
        timeout: Duration,
        make_call: &mut F,
    ) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let _permit = self.gate.acquire().await?;
        match tokio::time::timeout(timeout, make_call()).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::ProviderTimeout {
                operation: operation.to_string(),
                timeout_secs: timeout.as_secs(),
            }),
        }
    }
}
