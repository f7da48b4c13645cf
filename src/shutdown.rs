//! Process-wide exit signal.
//!
//! Worker threads poll `is_triggered()`; the control thread parks in `wait()`
//! until someone calls `trigger()` (a signal handler or code).

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    exit: AtomicBool,
    parked: Mutex<bool>,
    wake: Condvar,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request exit. Idempotent.
    pub fn trigger(&self) {
        self.exit.store(true, Ordering::SeqCst);
        let mut requested = self.parked.lock().unwrap_or_else(PoisonError::into_inner);
        *requested = true;
        self.wake.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        self.exit.load(Ordering::SeqCst)
    }

    /// Park the caller until `trigger()` has been called.
    pub fn wait(&self) {
        let mut requested = self.parked.lock().unwrap_or_else(PoisonError::into_inner);
        while !*requested {
            requested = self
                .wake
                .wait(requested)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like `wait()`, but gives up after `timeout`. Returns whether exit was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let requested = self.parked.lock().unwrap_or_else(PoisonError::into_inner);
        let (requested, _) = self
            .wake
            .wait_timeout_while(requested, timeout, |requested| !*requested)
            .unwrap_or_else(PoisonError::into_inner);
        *requested
    }

    /// Route Ctrl-C / SIGTERM to `trigger()`.
    ///
    /// Only one handler can be installed per process.
    pub fn install_signal_handler(self: &Arc<Self>) -> Result<()> {
        let coordinator = Arc::clone(self);
        ctrlc::set_handler(move || {
            log::info!("termination signal received, shutting down");
            coordinator.trigger();
        })
        .context("failed to install termination signal handler")
    }
}
