//! Stop Controller
//!
//! Cancellation is two-layered. The cooperative layer is a per-run [`StopSignal`] observed at
//! phase entry, step entry and around every collaborator call. The forcible layer is the abort
//! handle of the run's supervisory task, used when the flag is not observed within the grace
//! period. Both live in one [`RunControl`] that is passed explicitly to the workflow driver.

use crate::types::RunId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info};

/// Per-run cancellation flag. Set once, never reset.
#[derive(Clone, Debug, Default)]
pub struct StopSignal {
    token: CancellationToken,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the signal is set.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// A signal that is set whenever this one is, but can also be set on its own.
    /// Used to abort the siblings of a failed step without stopping the run.
    pub fn child(&self) -> StopSignal {
        StopSignal {
            token: self.token.child_token(),
        }
    }
}

/// Stop flag plus the cancellable handle of the run's supervisory task.
#[derive(Clone, Debug)]
pub struct RunControl {
    run_id: RunId,
    signal: StopSignal,
    handle: Arc<Mutex<Option<AbortHandle>>>,
}

impl RunControl {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            signal: StopSignal::new(),
            handle: Arc::new(Mutex::new(None)),
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn signal(&self) -> &StopSignal {
        &self.signal
    }

    pub fn is_stopped(&self) -> bool {
        self.signal.is_stopped()
    }

    pub fn attach(&self, handle: AbortHandle) {
        *self.handle.lock() = Some(handle);
    }

    pub fn detach(&self) {
        self.handle.lock().take();
    }

    /// True while a supervisory task is attached and has not finished.
    pub fn is_active(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    fn abort_handle(&self) -> Option<AbortHandle> {
        self.handle.lock().clone()
    }
}

/// Registry of run controls, keyed by run id. Injectable so tests can share or isolate it.
#[derive(Debug, Default)]
pub struct RunRegistry {
    runs: Mutex<HashMap<RunId, RunControl>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The control for `run_id`, created on first reference.
    pub fn control(&self, run_id: &RunId) -> RunControl {
        self.runs
            .lock()
            .entry(run_id.clone())
            .or_insert_with(|| RunControl::new(run_id.clone()))
            .clone()
    }

    pub fn get(&self, run_id: &RunId) -> Option<RunControl> {
        self.runs.lock().get(run_id).cloned()
    }

    /// Detach the supervisory handle of a run that has ended. Entries of stopped runs are kept
    /// so their flag stays observable; all others are dropped.
    pub fn release(&self, run_id: &RunId) {
        let mut runs = self.runs.lock();
        let Some(control) = runs.get(run_id) else {
            return;
        };
        control.detach();
        if !control.is_stopped() {
            runs.remove(run_id);
        }
    }

    pub fn active_runs(&self) -> Vec<RunId> {
        self.runs
            .lock()
            .values()
            .filter(|control| control.is_active())
            .map(|control| control.run_id.clone())
            .collect()
    }
}

#[derive(Clone, Debug)]
pub struct StopController {
    registry: Arc<RunRegistry>,
    grace: Duration,
}

impl StopController {
    pub fn new(registry: Arc<RunRegistry>, grace: Duration) -> Self {
        Self { registry, grace }
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    /// Set the run's stop flag, then abort its supervisory task if it is still running once the
    /// grace period has elapsed. Returns whether a live task was registered for the run.
    ///
    /// Ids the registry has never seen are ignored, so stray requests leave no entry behind.
    pub fn request_stop(&self, run_id: &RunId) -> bool {
        let Some(control) = self.registry.get(run_id) else {
            debug!(run_id = %run_id, "Stop requested for unknown run");
            return false;
        };
        control.signal().stop();
        info!(run_id = %run_id, "Stop requested");

        let Some(handle) = control.abort_handle() else {
            return false;
        };
        if handle.is_finished() {
            return false;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) if !self.grace.is_zero() => {
                let grace = self.grace;
                let run_id = run_id.clone();
                runtime.spawn(async move {
                    tokio::time::sleep(grace).await;
                    if !handle.is_finished() {
                        debug!(run_id = %run_id, "Stop flag not observed within grace period, aborting");
                        handle.abort();
                    }
                });
            }
            _ => handle.abort(),
        }
        true
    }

    pub fn is_stopped(&self, run_id: &RunId) -> bool {
        self.registry
            .get(run_id)
            .map(|control| control.is_stopped())
            .unwrap_or(false)
    }
}
