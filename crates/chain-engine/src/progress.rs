//! Cooperative pause / resume / abort for a running execution
//!
//! The controller is shared between the executor and whoever drives the
//! execution from outside. The executor calls [`ProgressController::suspend`]
//! at every node boundary: it returns immediately while running, waits on a
//! watch channel while paused, and fails with [`ChainError::Aborted`] once
//! aborted.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::{ChainError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ProgressState {
    paused: bool,
    aborted: bool,
}

/// Pause and cancellation token for one execution
#[derive(Debug)]
pub struct ProgressController {
    state: watch::Sender<ProgressState>,
    time_paused: Mutex<Duration>,
}

impl ProgressController {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ProgressState::default());
        Self {
            state,
            time_paused: Mutex::new(Duration::ZERO),
        }
    }

    /// Request a pause at the next node boundary
    pub fn pause(&self) {
        self.state.send_if_modified(|state| {
            let changed = !state.paused;
            state.paused = true;
            changed
        });
    }

    pub fn resume(&self) {
        self.state.send_if_modified(|state| {
            let changed = state.paused;
            state.paused = false;
            changed
        });
    }

    /// Abort the execution; also releases a paused executor
    pub fn abort(&self) {
        self.state.send_if_modified(|state| {
            let changed = !state.aborted;
            state.aborted = true;
            changed
        });
    }

    pub fn is_paused(&self) -> bool {
        self.state.borrow().paused
    }

    pub fn is_aborted(&self) -> bool {
        self.state.borrow().aborted
    }

    /// Total time spent waiting in [`suspend`](Self::suspend)
    pub fn time_paused(&self) -> Duration {
        *self.time_paused.lock()
    }

    /// Wait while paused, fail if aborted
    pub async fn suspend(&self) -> Result<()> {
        let mut receiver = self.state.subscribe();
        let current = *receiver.borrow_and_update();
        if current.aborted {
            return Err(ChainError::Aborted);
        }
        if !current.paused {
            return Ok(());
        }

        log::debug!("Execution paused");
        let started = Instant::now();
        let waited = receiver
            .wait_for(|state| state.aborted || !state.paused)
            .await
            .map(|state| *state);
        *self.time_paused.lock() += started.elapsed();

        match waited {
            Ok(state) if state.aborted => Err(ChainError::Aborted),
            Ok(_) => {
                log::debug!("Execution resumed");
                Ok(())
            }
            // The sender lives in `self`, so the channel cannot close here
            Err(_) => Err(ChainError::Aborted),
        }
    }
}

impl Default for ProgressController {
    fn default() -> Self {
        Self::new()
    }
}
