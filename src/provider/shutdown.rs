//! Stop signal fired by `dispose()`.
//!
//! `AtomicBool` + `Notify`: the flag is checked synchronously by fetch
//! attempts, the notification wakes the timer loop and in-flight fetches.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Clone-cheap stop signal. Fire once, observed by every clone.
#[derive(Debug, Clone)]
pub(crate) struct ShutdownSignal {
    stopped: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownSignal {
    pub(crate) fn new() -> Self {
        Self {
            stopped: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Fire the signal. Returns `true` only for the call that fired it.
    pub(crate) fn trigger(&self) -> bool {
        let first = !self.stopped.swap(true, Ordering::AcqRel);
        if first {
            self.notify.notify_waiters();
        }
        first
    }

    pub(crate) fn is_triggered(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Resolve once the signal fires; immediately if it already has.
    pub(crate) async fn wait(&self) {
        // Register before checking the flag so a trigger in between is not lost.
        loop {
            let notified = self.notify.notified();
            if self.stopped.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }

    /// Drive `task` until it finishes or the signal fires. The signal wins
    /// when both are ready.
    pub(crate) async fn run_until_triggered<F>(&self, task: F) -> Option<F::Output>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            _ = self.wait() => None,
            result = task => Some(result),
        }
    }
}
