//! Broker control primitives
//!
//! - [`PauseGate`]: two-state gate the generation loop passes through once per turn.
//!   Pause closes it, Resume opens it. Transitions are checked, so a second pause or
//!   a resume without a pause is an [`ControlError`] instead of a hang.
//! - [`ControlState`]: the reset request (edge-triggered, consumed by the loop) and
//!   the one-way shutdown flag, plus a watch channel the service loop uses to learn
//!   that the terminal transition has finished.

use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::watch;

/// Illegal pause/resume transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("broker is already paused")]
    AlreadyPaused,

    #[error("broker is not paused")]
    NotPaused,
}

/// Open/closed gate blocking the generation loop while closed
#[derive(Debug)]
pub struct PauseGate {
    /// `true` while open
    open: watch::Sender<bool>,
}

impl PauseGate {
    /// Create an open gate
    pub fn new() -> Self {
        let (open, _) = watch::channel(true);
        Self { open }
    }

    pub fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    /// Close the gate (pause)
    pub fn close(&self) -> Result<(), ControlError> {
        let changed = self.open.send_if_modified(|open| {
            if *open {
                *open = false;
                true
            } else {
                false
            }
        });
        if changed {
            Ok(())
        } else {
            Err(ControlError::AlreadyPaused)
        }
    }

    /// Open the gate (resume)
    pub fn open(&self) -> Result<(), ControlError> {
        if self.force_open() {
            Ok(())
        } else {
            Err(ControlError::NotPaused)
        }
    }

    /// Open the gate whatever its state; returns whether it was closed
    pub fn force_open(&self) -> bool {
        self.open.send_if_modified(|open| {
            if *open {
                false
            } else {
                *open = true;
                true
            }
        })
    }

    /// Wait until the gate is open
    pub async fn wait_open(&self) {
        let mut rx = self.open.subscribe();
        // The sender lives in `self`, so this only returns once the gate is open
        let _ = rx.wait_for(|open| *open).await;
    }
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Reset and shutdown flags
#[derive(Debug)]
pub struct ControlState {
    reset_requested: AtomicBool,
    shutting_down: AtomicBool,
    terminated: watch::Sender<bool>,
}

impl ControlState {
    pub fn new() -> Self {
        let (terminated, _) = watch::channel(false);
        Self {
            reset_requested: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            terminated,
        }
    }

    pub fn request_reset(&self) {
        self.reset_requested.store(true, Ordering::SeqCst);
    }

    /// Consume a pending reset request
    pub fn take_reset(&self) -> bool {
        self.reset_requested.swap(false, Ordering::SeqCst)
    }

    pub fn clear_reset(&self) {
        self.reset_requested.store(false, Ordering::SeqCst);
    }

    pub fn is_reset_requested(&self) -> bool {
        self.reset_requested.load(Ordering::SeqCst)
    }

    /// Enter the terminal state; returns `false` if shutdown had already begun
    pub fn begin_shutdown(&self) -> bool {
        !self.shutting_down.swap(true, Ordering::SeqCst)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Mark the terminal transition as finished
    pub fn mark_terminated(&self) {
        self.terminated.send_replace(true);
    }

    pub fn is_terminated(&self) -> bool {
        *self.terminated.borrow()
    }

    /// Wait until [`mark_terminated`](Self::mark_terminated) has been called
    pub async fn wait_terminated(&self) {
        let mut rx = self.terminated.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_gate_transitions() {
        let gate = PauseGate::new();
        assert!(gate.is_open());

        assert_eq!(gate.open(), Err(ControlError::NotPaused));
        assert_eq!(gate.close(), Ok(()));
        assert!(!gate.is_open());
        assert_eq!(gate.close(), Err(ControlError::AlreadyPaused));
        assert_eq!(gate.open(), Ok(()));
        assert!(gate.is_open());
    }

    #[test]
    fn test_force_open_reports_previous_state() {
        let gate = PauseGate::new();
        assert!(!gate.force_open());
        gate.close().unwrap();
        assert!(gate.force_open());
        assert!(gate.is_open());
    }

    #[tokio::test]
    async fn test_wait_open_blocks_until_resume() {
        let gate = Arc::new(PauseGate::new());
        gate.close().unwrap();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_open().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        gate.open().unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish after resume")
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_open_passes_open_gate() {
        let gate = PauseGate::new();
        tokio::time::timeout(Duration::from_millis(100), gate.wait_open())
            .await
            .unwrap();
    }

    #[test]
    fn test_reset_is_edge_triggered() {
        let control = ControlState::new();
        assert!(!control.take_reset());
        control.request_reset();
        assert!(control.is_reset_requested());
        assert!(control.take_reset());
        assert!(!control.take_reset());
    }

    #[test]
    fn test_shutdown_is_one_way() {
        let control = ControlState::new();
        assert!(!control.is_shutting_down());
        assert!(control.begin_shutdown());
        assert!(!control.begin_shutdown());
        assert!(control.is_shutting_down());
    }

    #[tokio::test]
    async fn test_wait_terminated() {
        let control = Arc::new(ControlState::new());
        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.wait_terminated().await })
        };
        control.mark_terminated();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(control.is_terminated());
    }
}
