//! Anchors for cross-page link navigation

use std::collections::HashMap;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Freshly generated identifier for a navigation anchor. Links carry
/// these instead of raw page/offset coordinates.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnchorId(String);

impl AnchorId {
    fn generate() -> Self {
        Self(format!(
            "anc-{:08x}{:08x}",
            rand::random::<u32>(),
            rand::random::<u32>()
        ))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Tracks anchors placed in destination pages' annotation layers.
///
/// A link can target a page whose layers do not exist yet; the wire
/// stays pending and is drained when the destination mounts. Mount
/// order never produces an error, only an unwired link.
#[derive(Debug, Default)]
pub struct AnchorRegistry {
    by_page: HashMap<usize, AnchorId>,
    wired: HashMap<AnchorId, usize>,
    pending: Vec<(AnchorId, usize)>,
}

impl AnchorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the anchor id for a destination page, generating one on
    /// first use. `dest_mounted` says whether that page's layers exist;
    /// if not, the wire stays pending.
    pub fn request(&mut self, dest_page: usize, dest_mounted: bool) -> AnchorId {
        let anchor = self
            .by_page
            .entry(dest_page)
            .or_insert_with(AnchorId::generate)
            .clone();

        if self.wired.contains_key(&anchor) {
            return anchor;
        }

        if dest_mounted {
            self.wired.insert(anchor.clone(), dest_page);
        } else if !self.pending.iter().any(|(a, _)| *a == anchor) {
            warn!("link target page {dest_page} not mounted yet, anchor left pending");
            self.pending.push((anchor.clone(), dest_page));
        }

        anchor
    }

    /// Drains pending wires for a freshly mounted page; returns the
    /// anchors that became live in its annotation layer
    pub fn page_mounted(&mut self, page: usize) -> Vec<AnchorId> {
        let mut live = Vec::new();
        let mut kept = Vec::new();
        for (anchor, dest) in self.pending.drain(..) {
            if dest == page {
                debug!("anchor {} wired to page {page}", anchor.as_str());
                self.wired.insert(anchor.clone(), dest);
                live.push(anchor);
            } else {
                kept.push((anchor, dest));
            }
        }
        self.pending = kept;
        live
    }

    /// Unwires every anchor targeting an unmounted page
    pub fn page_unmounted(&mut self, page: usize) {
        self.wired.retain(|_, dest| *dest != page);
    }

    /// Destination page of a wired anchor
    #[must_use]
    pub fn resolve(&self, anchor: &AnchorId) -> Option<usize> {
        self.wired.get(anchor).copied()
    }

    /// The wired anchor owned by a page, if one exists
    #[must_use]
    pub fn wired_anchor_for(&self, page: usize) -> Option<AnchorId> {
        self.by_page
            .get(&page)
            .filter(|a| self.wired.contains_key(*a))
            .cloned()
    }

    #[must_use]
    pub fn is_wired(&self, anchor: &AnchorId) -> bool {
        self.wired.contains_key(anchor)
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_wires_immediately_when_destination_mounted() {
        let mut reg = AnchorRegistry::new();
        let anchor = reg.request(2, true);
        assert!(reg.is_wired(&anchor));
        assert_eq!(reg.resolve(&anchor), Some(2));
        assert_eq!(reg.pending_count(), 0);
    }

    #[test]
    fn anchor_before_mount_resolves_after_mount() {
        let mut reg = AnchorRegistry::new();
        let anchor = reg.request(2, false);
        assert!(!reg.is_wired(&anchor));
        assert_eq!(reg.resolve(&anchor), None);

        let live = reg.page_mounted(2);
        assert_eq!(live, vec![anchor.clone()]);
        assert_eq!(reg.resolve(&anchor), Some(2));
    }

    #[test]
    fn mounting_unrelated_page_keeps_wire_pending() {
        let mut reg = AnchorRegistry::new();
        let anchor = reg.request(2, false);
        assert!(reg.page_mounted(1).is_empty());
        assert_eq!(reg.pending_count(), 1);
        assert!(!reg.is_wired(&anchor));
    }

    #[test]
    fn same_destination_reuses_one_anchor() {
        let mut reg = AnchorRegistry::new();
        let a = reg.request(3, false);
        let b = reg.request(3, false);
        assert_eq!(a, b);
        assert_eq!(reg.pending_count(), 1);
    }

    #[test]
    fn distinct_destinations_get_distinct_ids() {
        let mut reg = AnchorRegistry::new();
        let a = reg.request(1, true);
        let b = reg.request(2, true);
        assert_ne!(a, b);
    }

    #[test]
    fn unmount_unwires() {
        let mut reg = AnchorRegistry::new();
        let anchor = reg.request(2, true);
        reg.page_unmounted(2);
        assert_eq!(reg.resolve(&anchor), None);
    }
}
