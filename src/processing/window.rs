//! Sliding-window aggregation of scans per tag and anchor
//!
//! Holds at most one scan per (uid, anchor): the one with the newest
//! timestamp. Scans arrive from independent anchors over an at-least-once
//! transport, so older scans arriving late are discarded rather than
//! overwriting fresher data. Expiry is lazy: a scan stays stored until pruned
//! but is only visible while `now - ts <= horizon`.

use crate::core::Scan;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

type Slots = HashMap<String, Scan>;

/// Concurrent per-uid window buffer
#[derive(Debug)]
pub struct WindowAggregator {
    horizon_ms: i64,
    buffers: RwLock<HashMap<String, Arc<Mutex<Slots>>>>,
}

impl WindowAggregator {
    pub fn new(horizon_ms: i64) -> Self {
        Self {
            horizon_ms,
            buffers: RwLock::new(HashMap::new()),
        }
    }

    pub fn horizon_ms(&self) -> i64 {
        self.horizon_ms
    }

    fn slots_for(&self, uid: &str) -> Arc<Mutex<Slots>> {
        if let Some(slots) = self
            .buffers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uid)
        {
            return Arc::clone(slots);
        }

        let mut buffers = self.buffers.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(buffers.entry(uid.to_string()).or_default())
    }

    /// Store `scan` if it is newer than what its (uid, anchor) slot holds.
    /// Returns whether the slot was updated.
    pub fn upsert(&self, scan: Scan) -> bool {
        let slots = self.slots_for(&scan.uid);
        let mut slots = slots.lock().unwrap_or_else(PoisonError::into_inner);

        match slots.get(&scan.anchor_id) {
            Some(stored) if stored.ts >= scan.ts => false,
            _ => {
                slots.insert(scan.anchor_id.clone(), scan);
                true
            }
        }
    }

    /// Snapshot of the scans for `uid` still inside the horizon at `now_ms`.
    ///
    /// The copy is taken under the uid's lock, so it never mixes slots from
    /// before and after a concurrent write.
    pub fn active_observations(&self, uid: &str, now_ms: i64) -> Vec<Scan> {
        let Some(slots) = self
            .buffers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uid)
            .cloned()
        else {
            return Vec::new();
        };

        let slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
        let mut active: Vec<Scan> = slots
            .values()
            .filter(|scan| now_ms - scan.ts <= self.horizon_ms)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.anchor_id.cmp(&b.anchor_id));
        active
    }

    /// Every uid that has ever been stored and not pruned
    pub fn uids(&self) -> Vec<String> {
        let mut uids: Vec<String> = self
            .buffers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        uids.sort();
        uids
    }

    /// Drop scans that are no longer visible and uids left empty.
    /// Returns the number of scans removed.
    pub fn prune(&self, now_ms: i64) -> usize {
        let mut buffers = self.buffers.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;

        buffers.retain(|_, slots| {
            let mut slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
            let before = slots.len();
            slots.retain(|_, scan| now_ms - scan.ts <= self.horizon_ms);
            removed += before - slots.len();
            !slots.is_empty()
        });

        removed
    }
}
