//! Refresh state machine and completion markers.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Whether a background refresh is executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Refreshing,
}

impl RefreshState {
    const IDLE: u8 = 0;
    const REFRESHING: u8 = 1;

    fn from_raw(raw: u8) -> Self {
        if raw == Self::REFRESHING {
            RefreshState::Refreshing
        } else {
            RefreshState::Idle
        }
    }
}

/// Atomic holder for [`RefreshState`].
///
/// The only way into `Refreshing` is [`try_begin`](Self::try_begin), a single
/// compare-and-set. The returned guard moves the state back to `Idle` when
/// dropped, including on panic or cancellation.
#[derive(Debug)]
pub(crate) struct RefreshGate {
    state: AtomicU8,
}

impl RefreshGate {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(RefreshState::IDLE),
        }
    }

    pub(crate) fn state(&self) -> RefreshState {
        RefreshState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Transition Idle -> Refreshing. `None` if a refresh already holds the gate.
    pub(crate) fn try_begin(&self) -> Option<RefreshGuard<'_>> {
        self.state
            .compare_exchange(
                RefreshState::IDLE,
                RefreshState::REFRESHING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()
            .map(|_| RefreshGuard { gate: self })
    }
}

pub(crate) struct RefreshGuard<'a> {
    gate: &'a RefreshGate,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.gate.state.store(RefreshState::IDLE, Ordering::Release);
    }
}

/// Sets a flag when dropped.
pub(crate) struct CompletionMark<'a> {
    flag: &'a AtomicBool,
}

impl<'a> CompletionMark<'a> {
    pub(crate) fn new(flag: &'a AtomicBool) -> Self {
        Self { flag }
    }
}

impl Drop for CompletionMark<'_> {
    fn drop(&mut self) {
        self.flag.store(true, Ordering::Release);
    }
}
