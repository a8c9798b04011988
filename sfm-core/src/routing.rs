//! SSRC routing table
//!
//! Concurrent mapping from 32-bit SSRC to the [`SourceController`] that owns
//! the stream. The data plane resolves every incoming packet against this
//! table without blocking; the allocation cycle is the only writer. Entries
//! are never removed for the lifetime of the core, so a stale SSRC resolves
//! to an idle controller rather than to nothing.

use crate::track::SourceTrack;
use crate::traits::SourceController;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

pub struct RoutingTable {
    routes: DashMap<u32, Arc<dyn SourceController>>,
    /// Serializes the check-create-insert of a controller's whole SSRC
    /// family so a concurrent reader sees either none or all of a track's
    /// entries pointing at the same controller.
    insert_lock: Mutex<()>,
}

impl RoutingTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            routes: DashMap::new(),
            insert_lock: Mutex::new(()),
        }
    }

    /// Resolve an SSRC to its controller, if one has been installed.
    #[must_use]
    pub fn lookup(&self, ssrc: u32) -> Option<Arc<dyn SourceController>> {
        self.routes.get(&ssrc).map(|entry| Arc::clone(entry.value()))
    }

    /// Get the controller owning `track`, creating and installing it under
    /// every primary and retransmission SSRC of every layer if absent.
    ///
    /// The track is keyed by the primary SSRC of its lowest layer, which
    /// makes repeated allocation cycles idempotent. Returns `None` for a
    /// track with an empty encoding ladder.
    pub(crate) fn get_or_insert_with(
        &self,
        track: &SourceTrack,
        create: impl FnOnce() -> Arc<dyn SourceController>,
    ) -> Option<Arc<dyn SourceController>> {
        let key = track.encodings().first()?.primary_ssrc();

        let _guard = self.insert_lock.lock();
        if let Some(existing) = self.lookup(key) {
            return Some(existing);
        }

        let controller = create();
        for encoding in track.encodings() {
            self.routes
                .insert(encoding.primary_ssrc(), Arc::clone(&controller));
            if let Some(rtx) = encoding.rtx_ssrc() {
                self.routes.insert(rtx, Arc::clone(&controller));
            }
        }
        Some(controller)
    }

    /// Every distinct controller currently routed, in unspecified order.
    #[must_use]
    pub fn controllers(&self) -> Vec<Arc<dyn SourceController>> {
        let mut seen: Vec<Arc<dyn SourceController>> = Vec::new();
        for entry in self.routes.iter() {
            let controller = entry.value();
            if !seen
                .iter()
                .any(|known| Arc::ptr_eq(known, controller))
            {
                seen.push(Arc::clone(controller));
            }
        }
        seen
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}
