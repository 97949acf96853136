//! Session lifetime guard
//!
//! One `SessionContext` is created at startup and handed to every component.
//! Once logout begins the context goes inactive and never comes back for this
//! process; a fresh login requires a restart. Every event handler, timer
//! callback and async continuation checks `is_active()` before mutating
//! state, so async work that completes after logout lands as a no-op instead
//! of resurrecting state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct SessionContext {
    logging_out: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl SessionContext {
    pub fn new() -> Self {
        Self {
            logging_out: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        }
    }

    /// True until logout begins.
    pub fn is_active(&self) -> bool {
        !self.logging_out.load(Ordering::SeqCst)
    }

    /// Flip the one-way gate. Returns true for the caller that actually
    /// initiated logout, false if it was already underway.
    pub fn begin_logout(&self) -> bool {
        let first = !self.logging_out.swap(true, Ordering::SeqCst);
        if first {
            tracing::info!("session guard engaged, suppressing further state mutation");
            self.cancel.cancel();
        }
        first
    }

    /// Token cancelled at logout; long-lived loops select on this.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_is_one_way() {
        let ctx = SessionContext::new();
        assert!(ctx.is_active());

        assert!(ctx.begin_logout());
        assert!(!ctx.is_active());

        // second caller does not re-initiate, gate stays closed
        assert!(!ctx.begin_logout());
        assert!(!ctx.is_active());
    }

    #[test]
    fn test_clones_share_the_gate() {
        let ctx = SessionContext::new();
        let other = ctx.clone();

        ctx.begin_logout();
        assert!(!other.is_active());
        assert!(other.cancellation().is_cancelled());
    }
}
