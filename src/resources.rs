//! Shared pool of drawing primitives pushed by the kernel

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// One named drawing primitive, typically a glyph outline definition.
/// Keyed by a stable identifier emitted by the kernel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEntry {
    pub id: String,
    pub markup: String,
}

#[derive(Default)]
struct PoolState {
    entries: Vec<ResourceEntry>,
    seen: HashSet<String>,
    torn_down: bool,
}

/// Append-only store of drawing primitives shared by all pages of one
/// document. The kernel deduplicates what it pushes; re-insertion of an
/// already-seen id is ignored so insertion stays idempotent from the
/// host's view. Torn down exactly once, with the owning document.
#[derive(Default)]
pub struct ResourcePool {
    state: Mutex<PoolState>,
}

impl ResourcePool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts a primitive pushed by the kernel. Pushes after teardown
    /// are dropped with a warning; a disposed surface has nowhere to
    /// mount them.
    pub fn push(&self, entry: ResourceEntry) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.torn_down {
            warn!("resource {:?} pushed after pool teardown, dropped", entry.id);
            return;
        }
        if !state.seen.insert(entry.id.clone()) {
            return;
        }
        state.entries.push(entry);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .seen
            .contains(id)
    }

    /// Snapshot of all entries in insertion order
    #[must_use]
    pub fn entries(&self) -> Vec<ResourceEntry> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .clone()
    }

    /// Releases the pool. The first call wins; later calls are an error.
    pub fn tear_down(&self) -> Result<(), PoolTornDown> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.torn_down {
            return Err(PoolTornDown);
        }
        debug!("resource pool torn down, {} entries", state.entries.len());
        state.torn_down = true;
        state.entries.clear();
        state.seen.clear();
        Ok(())
    }

    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .torn_down
    }
}

/// The pool was already torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("resource pool already torn down")]
pub struct PoolTornDown;

#[cfg(test)]
mod tests {
    use super::*;

    fn glyph(id: &str) -> ResourceEntry {
        ResourceEntry {
            id: id.to_string(),
            markup: format!("<symbol id=\"{id}\"/>"),
        }
    }

    #[test]
    fn push_is_idempotent_per_id() {
        let pool = ResourcePool::new();
        pool.push(glyph("g0"));
        pool.push(glyph("g1"));
        pool.push(glyph("g0"));
        assert_eq!(pool.len(), 2);
        assert!(pool.contains("g0"));
        assert!(pool.contains("g1"));
    }

    #[test]
    fn tear_down_once() {
        let pool = ResourcePool::new();
        pool.push(glyph("g0"));
        assert!(pool.tear_down().is_ok());
        assert!(pool.is_torn_down());
        assert_eq!(pool.tear_down(), Err(PoolTornDown));
    }

    #[test]
    fn push_after_teardown_is_dropped() {
        let pool = ResourcePool::new();
        pool.tear_down().expect("first teardown");
        pool.push(glyph("late"));
        assert!(pool.is_empty());
        assert!(!pool.contains("late"));
    }
}
