//! Repaint pass identity and cancellation

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

/// Unique identifier for one repaint pass
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PassId(pub u64);

impl PassId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Shared cancel-requested flag for one in-flight pass.
///
/// Checked between stages and between pages; a long-running native call
/// is never aborted mid-call, cancellation only prevents scheduling
/// further stages.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// How a pass ended. Cancellation is a quiet outcome the caller treats
/// as a no-op, distinct from failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PassOutcome {
    /// Ran to the end; counts stages actually executed and canvas
    /// chains dispatched to the worker
    Completed {
        stages_run: usize,
        canvas_jobs: usize,
    },
    /// Superseded by a newer pass before finishing
    Cancelled,
    /// The pass itself could not run (not a per-page stage failure)
    Failed(String),
}

/// One in-flight repaint pass; at most one is authoritative at a time
#[derive(Clone, Debug)]
pub struct RenderTask {
    pub id: PassId,
    pub token: CancelToken,
}

impl RenderTask {
    #[must_use]
    pub fn new(id: PassId) -> Self {
        Self {
            id,
            token: CancelToken::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_starts_clear_and_latches() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());

        let clone = token.clone();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn clones_share_the_flag() {
        let token = CancelToken::new();
        let seen_by_worker = token.clone();
        token.cancel();
        assert!(seen_by_worker.is_cancelled());
    }
}
