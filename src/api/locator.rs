//! Server-side locator service
//!
//! Scans from every anchor are ingested into the window; a periodic tick
//! estimates one fix per uid. Each tick snapshots a uid's observations and
//! computes outside any lock, so ingestion is never blocked by estimation.

use crate::algorithms::PositionEstimator;
use crate::api::messages::ScanMessage;
use crate::api::sink::FixSink;
use crate::processing::WindowAggregator;
use crate::utils::{AnchorRegistry, ConfigError, LocatorConfig};
use crate::validation::{DataValidator, MessageError, ValidationConfig};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Per-tick totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Uids with at least one observation inside the window
    pub uids_seen: usize,
    pub fixes_emitted: usize,
    /// Fixes withheld because the uid was written too recently
    pub throttled: usize,
    /// Uids whose estimate or write failed this tick
    pub failed: usize,
}

pub struct LocatorService {
    config: LocatorConfig,
    anchors: AnchorRegistry,
    validator: DataValidator,
    window: WindowAggregator,
    estimator: PositionEstimator,
    sink: Arc<dyn FixSink>,
    last_written: Mutex<HashMap<String, i64>>,
}

impl LocatorService {
    pub fn new(
        config: LocatorConfig,
        anchors: AnchorRegistry,
        sink: Arc<dyn FixSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if anchors.is_empty() {
            warn!("anchor registry is empty, no fixes will be produced");
        }
        info!(
            anchors = anchors.len(),
            window_ms = config.window_ms(),
            top_k = config.top_k,
            min_anchors = config.min_anchors,
            "locator configured"
        );

        Ok(Self {
            validator: DataValidator::with_config(ValidationConfig::from_locator(&config)),
            window: WindowAggregator::new(config.window_ms()),
            estimator: PositionEstimator::from_config(&config),
            config,
            anchors,
            sink,
            last_written: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &LocatorConfig {
        &self.config
    }

    pub fn anchors(&self) -> &AnchorRegistry {
        &self.anchors
    }

    pub fn window(&self) -> &WindowAggregator {
        &self.window
    }

    /// Validate one inbound message and fold it into the window.
    ///
    /// Returns whether the window changed; an older or equal timestamp for
    /// the same (uid, anchor) is accepted but discarded.
    pub fn ingest(&self, message: ScanMessage, now_ms: i64) -> Result<bool, MessageError> {
        let scan = self
            .validator
            .validate_scan(message, &self.anchors, now_ms)
            .inspect_err(|e| warn!(error = %e, "scan dropped"))?;
        Ok(self.window.upsert(scan))
    }

    /// [`Self::ingest`] for one JSON line
    pub fn ingest_json(&self, line: &str, now_ms: i64) -> Result<bool, MessageError> {
        let scan = self
            .validator
            .parse_scan(line, &self.anchors, now_ms)
            .inspect_err(|e| warn!(error = %e, "scan dropped"))?;
        Ok(self.window.upsert(scan))
    }

    /// Estimate and write a fix for every uid with active observations
    pub fn tick(&self, now_ms: i64) -> TickReport {
        let mut report = TickReport::default();
        let throttle_ms = self.config.write_throttle_ms();

        for uid in self.window.uids() {
            let observations = self.window.active_observations(&uid, now_ms);
            if observations.is_empty() {
                continue;
            }
            report.uids_seen += 1;

            let fix = match self.estimator.estimate(&uid, &observations, &self.anchors, now_ms) {
                Ok(Some(fix)) => fix,
                Ok(None) => continue,
                Err(e) => {
                    warn!(uid = %uid, error = %e, "estimation failed");
                    report.failed += 1;
                    continue;
                }
            };

            if throttle_ms > 0 && self.written_within(&uid, now_ms, throttle_ms) {
                debug!(uid = %uid, "fix throttled");
                report.throttled += 1;
                continue;
            }

            match self.sink.write_fix(&fix) {
                Ok(()) => {
                    self.last_written
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(uid, now_ms);
                    report.fixes_emitted += 1;
                }
                Err(e) => {
                    warn!(uid = %uid, error = %e, "failed to write fix");
                    report.failed += 1;
                }
            }
        }

        let pruned = self.window.prune(now_ms);
        self.forget_pruned_uids();

        info!(
            uids = report.uids_seen,
            fixes = report.fixes_emitted,
            throttled = report.throttled,
            failed = report.failed,
            pruned,
            "tick complete"
        );
        report
    }

    fn written_within(&self, uid: &str, now_ms: i64, throttle_ms: i64) -> bool {
        self.last_written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uid)
            .is_some_and(|last| now_ms - last < throttle_ms)
    }

    fn forget_pruned_uids(&self) {
        let live = self.window.uids();
        self.last_written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|uid, _| live.binary_search(uid).is_ok());
    }
}
