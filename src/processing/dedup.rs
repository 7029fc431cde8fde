//! Per-anchor duplicate suppression
//!
//! Tags rebroadcast the same payload many times between refreshes. An anchor
//! forwards a scan only when its `adv_seq` differs from the last one it
//! forwarded for that uid. Emergency scans and scans without a sequence are
//! always forwarded.

use crate::core::Scan;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Mutex, PoisonError};

/// Last forwarded sequence per uid
pub type DedupState = HashMap<String, u16>;

/// Outcome of a dedup check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupDecision {
    Forward,
    Suppress,
}

/// Owner of one anchor's [`DedupState`].
///
/// The receive callback may run concurrently with itself, so the
/// read-compare-write on the state happens under one lock.
#[derive(Debug, Default)]
pub struct Deduplicator {
    state: Mutex<DedupState>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether `scan` goes downstream, recording its sequence if so
    pub fn observe(&self, scan: &Scan) -> DedupDecision {
        match self.forward_if_new(scan, || Ok::<(), Infallible>(())) {
            Ok(Some(())) => DedupDecision::Forward,
            Ok(None) => DedupDecision::Suppress,
            Err(never) => match never {},
        }
    }

    /// Run `forward` unless `scan` repeats the last forwarded sequence.
    ///
    /// The sequence is recorded only when `forward` succeeds, so a scan that
    /// failed to go out is forwarded again on the tag's next rebroadcast.
    /// Check, forward and record happen under one lock. Returns `Ok(None)`
    /// when the scan was suppressed.
    pub fn forward_if_new<T, E, F>(&self, scan: &Scan, forward: F) -> Result<Option<T>, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let Some(seq) = scan.adv_seq else {
            return forward().map(Some);
        };

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !scan.emergency && state.get(&scan.uid) == Some(&seq) {
            return Ok(None);
        }
        let forwarded = forward()?;
        state.insert(scan.uid.clone(), seq);
        Ok(Some(forwarded))
    }

    /// Last forwarded sequence for `uid`
    pub fn last_seq(&self, uid: &str) -> Option<u16> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uid)
            .copied()
    }

    pub fn tracked_uids(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn scan(seq: u16, emergency: bool) -> Scan {
        Scan::presence(0, "A1", "W-01", -60.0).with_seq(seq).with_emergency(emergency)
    }

    #[test]
    fn test_repeated_sequence_is_suppressed() {
        let dedup = Deduplicator::new();
        assert_eq!(dedup.observe(&scan(100, false)), DedupDecision::Forward);
        assert_eq!(dedup.observe(&scan(100, false)), DedupDecision::Suppress);
        assert_eq!(dedup.observe(&scan(101, false)), DedupDecision::Forward);
        assert_eq!(dedup.last_seq("W-01"), Some(101));
    }

    #[test]
    fn test_emergency_bypasses_suppression() {
        let dedup = Deduplicator::new();
        assert_eq!(dedup.observe(&scan(100, true)), DedupDecision::Forward);
        assert_eq!(dedup.observe(&scan(100, true)), DedupDecision::Forward);
    }

    #[test]
    fn test_scans_without_sequence_always_forward() {
        let dedup = Deduplicator::new();
        let presence = Scan::presence(0, "A1", "W-01", -60.0);
        assert_eq!(dedup.observe(&presence), DedupDecision::Forward);
        assert_eq!(dedup.observe(&presence), DedupDecision::Forward);
        assert_eq!(dedup.tracked_uids(), 0);
    }

    #[test]
    fn test_uids_are_tracked_independently() {
        let dedup = Deduplicator::new();
        let other = Scan::presence(0, "A1", "W-02", -60.0).with_seq(100);
        assert_eq!(dedup.observe(&scan(100, false)), DedupDecision::Forward);
        assert_eq!(dedup.observe(&other), DedupDecision::Forward);
    }

    #[test]
    fn test_sequence_equality_only_after_wrap() {
        let dedup = Deduplicator::new();
        assert_eq!(dedup.observe(&scan(u16::MAX, false)), DedupDecision::Forward);
        assert_eq!(dedup.observe(&scan(0, false)), DedupDecision::Forward);
        assert_eq!(dedup.observe(&scan(5, false)), DedupDecision::Forward);
    }

    #[test]
    fn test_failed_forward_leaves_sequence_unrecorded() {
        let dedup = Deduplicator::new();

        let failed: Result<Option<()>, &str> = dedup.forward_if_new(&scan(7, false), || Err("down"));
        assert_eq!(failed, Err("down"));
        assert_eq!(dedup.last_seq("W-01"), None);

        let retried: Result<Option<u8>, &str> = dedup.forward_if_new(&scan(7, false), || Ok(1));
        assert_eq!(retried, Ok(Some(1)));
        assert_eq!(dedup.last_seq("W-01"), Some(7));

        let repeat: Result<Option<u8>, &str> =
            dedup.forward_if_new(&scan(7, false), || panic!("suppressed scans are not forwarded"));
        assert_eq!(repeat, Ok(None));
    }

    #[test]
    fn test_concurrent_duplicates_forward_once() {
        let dedup = Arc::new(Deduplicator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let dedup = Arc::clone(&dedup);
                thread::spawn(move || dedup.observe(&scan(42, false)))
            })
            .collect();

        let forwarded = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|d| *d == DedupDecision::Forward)
            .count();
        assert_eq!(forwarded, 1);
    }
}
