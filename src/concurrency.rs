//! Concurrency Gate
//!
//! Process-wide bound on simultaneously in-flight external agent calls. One gate is shared by
//! every run, so a large parallel group in one run cannot starve the others or push the
//! provider into rate limiting.

use crate::error::PipelineError;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

/// Counting gate over external calls. Cloning shares the same slots.
#[derive(Clone, Debug)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A held slot. The slot is released when the permit is dropped, on every exit path.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyGate {
    pub const DEFAULT_CAPACITY: usize = 10;

    /// Create a gate with `capacity` slots. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Suspend until a slot is free.
    pub async fn acquire(&self) -> Result<GatePermit, PipelineError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::ProviderRateLimit("Concurrency gate closed".to_string()))?;
        trace!(available = self.available(), "Acquired concurrency gate slot");
        Ok(GatePermit { _permit: permit })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl Default for ConcurrencyGate {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
