//! RSSI-based position estimation
//!
//! Pipeline per tag and tick:
//! 1. drop observations outside the plausible RSSI band or from unknown anchors
//! 2. convert RSSI to distance with the log-distance path-loss model
//!    `d = 10^((P1m - rssi) / (10 n))`
//! 3. keep the `top_k` nearest anchors
//! 4. one anchor: fix on that anchor; two or more: inverse-square distance
//!    weighted centroid
//! 5. score the fix from anchor count and RSSI spread

use crate::core::{Anchor, FixMethod, PositionFix, Scan};
use crate::utils::{AnchorRegistry, LocatorConfig};
use crate::validation::EstimateError;
use nalgebra::Vector3;
use std::collections::BTreeMap;
use tracing::debug;

/// RSSI variance (dB²) at which the consistency term halves
pub const RSSI_VARIANCE_SCALE_DB2: f64 = 25.0;

/// Weight of the anchor-count term in the quality score
const ANCHOR_TERM_WEIGHT: f64 = 0.6;

/// Distance (m) for an RSSI reading under the log-distance model
pub fn rssi_to_distance(rssi: f64, tx_power_dbm_at_1m: f64, path_loss_exponent: f64) -> f64 {
    10f64.powf((tx_power_dbm_at_1m - rssi) / (10.0 * path_loss_exponent))
}

/// Log-distance path-loss calibration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathLossModel {
    pub tx_power_dbm_at_1m: f64,
    pub path_loss_exponent: f64,
}

impl PathLossModel {
    pub fn new(tx_power_dbm_at_1m: f64, path_loss_exponent: f64) -> Self {
        Self {
            tx_power_dbm_at_1m,
            path_loss_exponent,
        }
    }

    /// This model with the anchor's calibration overrides applied
    pub fn for_anchor(&self, anchor: &Anchor) -> Self {
        Self {
            tx_power_dbm_at_1m: anchor.tx_power_dbm_at_1m.unwrap_or(self.tx_power_dbm_at_1m),
            path_loss_exponent: anchor.path_loss_exponent.unwrap_or(self.path_loss_exponent),
        }
    }

    pub fn distance_m(&self, rssi: f64) -> f64 {
        rssi_to_distance(rssi, self.tx_power_dbm_at_1m, self.path_loss_exponent)
    }
}

/// Population variance of the RSSI readings (0 for fewer than two)
pub fn rssi_variance(rssi: &[f64]) -> f64 {
    if rssi.len() < 2 {
        return 0.0;
    }
    let n = rssi.len() as f64;
    let mean = rssi.iter().sum::<f64>() / n;
    rssi.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n
}

/// Fix quality in [0, 1].
///
/// `0.6 * anchor_term + 0.4 * consistency`, where `anchor_term` grows
/// linearly from 0 (one anchor) to 1 (`top_k` anchors) and
/// `consistency = 1 / (1 + variance / 25)`.
pub fn quality_score(num_anchors: usize, rssi_variance: f64, top_k: usize) -> f64 {
    let anchor_term = if num_anchors > 1 {
        ((num_anchors - 1) as f64 / top_k.saturating_sub(1).max(1) as f64).min(1.0)
    } else {
        0.0
    };
    let consistency = 1.0 / (1.0 + rssi_variance.max(0.0) / RSSI_VARIANCE_SCALE_DB2);

    let score = ANCHOR_TERM_WEIGHT * anchor_term + (1.0 - ANCHOR_TERM_WEIGHT) * consistency;
    score.clamp(0.0, 1.0)
}

/// One observation after filtering and ranging
#[derive(Debug, Clone)]
struct Ranged<'a> {
    anchor: &'a Anchor,
    rssi: f64,
    distance_m: f64,
}

/// Converts a tag's windowed observations into a [`PositionFix`]
#[derive(Debug, Clone)]
pub struct PositionEstimator {
    model: PathLossModel,
    top_k: usize,
    min_anchors: usize,
    rssi_floor_dbm: f64,
    rssi_ceiling_dbm: f64,
    weight_dist_clamp_m: f64,
}

impl Default for PositionEstimator {
    fn default() -> Self {
        Self::from_config(&LocatorConfig::default())
    }
}

impl PositionEstimator {
    pub fn from_config(config: &LocatorConfig) -> Self {
        Self {
            model: PathLossModel::new(config.tx_power_dbm_at_1m, config.path_loss_exponent),
            top_k: config.top_k.max(1),
            min_anchors: config.min_anchors.max(1),
            rssi_floor_dbm: config.rssi_floor_dbm,
            rssi_ceiling_dbm: config.rssi_ceiling_dbm,
            weight_dist_clamp_m: config.weight_dist_clamp_m,
        }
    }

    pub fn model(&self) -> &PathLossModel {
        &self.model
    }

    fn is_plausible(&self, rssi: f64) -> bool {
        rssi >= self.rssi_floor_dbm && rssi <= self.rssi_ceiling_dbm
    }

    fn range<'a>(
        &self,
        observations: &[Scan],
        anchors: &'a AnchorRegistry,
    ) -> Result<Vec<Ranged<'a>>, EstimateError> {
        let mut ranged = Vec::with_capacity(observations.len());

        for scan in observations {
            if !self.is_plausible(scan.rssi) {
                debug!(uid = %scan.uid, anchor = %scan.anchor_id, rssi = scan.rssi, "rssi outlier dropped");
                continue;
            }
            let Some(anchor) = anchors.get(&scan.anchor_id) else {
                debug!(uid = %scan.uid, anchor = %scan.anchor_id, "observation from unknown anchor dropped");
                continue;
            };

            let distance_m = self.model.for_anchor(anchor).distance_m(scan.rssi);
            if !distance_m.is_finite() {
                return Err(EstimateError::NonFiniteDistance {
                    anchor_id: anchor.id.clone(),
                    rssi: scan.rssi,
                });
            }
            ranged.push(Ranged {
                anchor,
                rssi: scan.rssi,
                distance_m,
            });
        }

        ranged.sort_by(|a, b| {
            a.distance_m
                .total_cmp(&b.distance_m)
                .then_with(|| a.anchor.id.cmp(&b.anchor.id))
        });
        Ok(ranged)
    }

    /// Estimate the position of `uid` at `now_ms`.
    ///
    /// Returns `Ok(None)` when fewer than `min_anchors` usable observations
    /// remain. `per_anchor_distances` covers every anchor that survived
    /// filtering, not only the `top_k` used for the centroid.
    pub fn estimate(
        &self,
        uid: &str,
        observations: &[Scan],
        anchors: &AnchorRegistry,
        now_ms: i64,
    ) -> Result<Option<PositionFix>, EstimateError> {
        let ranged = self.range(observations, anchors)?;
        if ranged.is_empty() || ranged.len() < self.min_anchors {
            debug!(uid, usable = ranged.len(), min = self.min_anchors, "no fix");
            return Ok(None);
        }

        let per_anchor_distances: BTreeMap<String, f64> = ranged
            .iter()
            .map(|r| (r.anchor.id.clone(), r.distance_m))
            .collect();

        let used = &ranged[..ranged.len().min(self.top_k)];
        let nearest = &used[0];

        let (position, method) = if used.len() == 1 {
            (nearest.anchor.position(), FixMethod::SingleAnchor)
        } else {
            self.weighted_centroid(used)
                .map(|p| (p, FixMethod::Proximity))
                .unwrap_or_else(|| (nearest.anchor.position(), FixMethod::FallbackNearest))
        };

        if !(position.x.is_finite() && position.y.is_finite() && position.z.is_finite()) {
            return Err(EstimateError::NonFinitePosition { uid: uid.to_string() });
        }

        let rssi_used: Vec<f64> = used.iter().map(|r| r.rssi).collect();
        let q_score = quality_score(used.len(), rssi_variance(&rssi_used), self.top_k);

        debug!(
            uid,
            ?method,
            num_anchors = used.len(),
            q_score,
            nearest = %nearest.anchor.id,
            dist_m = nearest.distance_m,
            "position estimated"
        );

        Ok(Some(PositionFix {
            ts: now_ms,
            uid: uid.to_string(),
            x: position.x,
            y: position.y,
            z: position.z,
            method,
            q_score,
            nearest_anchor_id: nearest.anchor.id.clone(),
            dist_m: nearest.distance_m,
            num_anchors: used.len(),
            per_anchor_distances,
        }))
    }

    /// Inverse-square distance weighted centroid; `None` if weights degenerate
    fn weighted_centroid(&self, used: &[Ranged<'_>]) -> Option<Vector3<f64>> {
        let mut weighted_sum = Vector3::zeros();
        let mut total_weight = 0.0;

        for r in used {
            let d = r.distance_m.max(self.weight_dist_clamp_m);
            let w = 1.0 / (d * d);
            weighted_sum += r.anchor.position() * w;
            total_weight += w;
        }

        if total_weight.is_finite() && total_weight > 0.0 {
            Some(weighted_sum / total_weight)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const NOW: i64 = 1_700_000_000_000;

    fn registry() -> AnchorRegistry {
        AnchorRegistry::new(vec![
            Anchor::new("A", 0.0, 0.0, 0.0),
            Anchor::new("B", 10.0, 0.0, 0.0),
            Anchor::new("C", 0.0, 10.0, 0.0),
            Anchor::new("D", 10.0, 10.0, 0.0),
        ])
        .unwrap()
    }

    fn obs(anchor: &str, rssi: f64) -> Scan {
        Scan::presence(NOW - 500, anchor, "W-01", rssi)
    }

    fn estimator() -> PositionEstimator {
        PositionEstimator::from_config(&LocatorConfig {
            tx_power_dbm_at_1m: -59.0,
            path_loss_exponent: 2.2,
            ..LocatorConfig::default()
        })
    }

    #[test]
    fn test_distance_model_reference_value() {
        let d = rssi_to_distance(-65.0, -59.0, 2.2);
        assert_relative_eq!(d, 10f64.powf(6.0 / 22.0));
        assert_relative_eq!(d, 1.874, epsilon = 1e-3);
        assert_relative_eq!(rssi_to_distance(-59.0, -59.0, 2.2), 1.0);
    }

    #[test]
    fn test_distance_strictly_increases_as_rssi_drops() {
        let mut previous = 0.0;
        for step in 0..=80 {
            let rssi = -20.0 - step as f64;
            let d = rssi_to_distance(rssi, -59.0, 2.2);
            assert!(d > previous, "rssi {} gave {} <= {}", rssi, d, previous);
            previous = d;
        }
    }

    #[test]
    fn test_two_equal_anchors_give_midpoint() {
        let fix = estimator()
            .estimate("W-01", &[obs("A", -65.0), obs("B", -65.0)], &registry(), NOW)
            .unwrap()
            .unwrap();

        assert_eq!(fix.method, FixMethod::Proximity);
        assert_eq!(fix.num_anchors, 2);
        assert_relative_eq!(fix.x, 5.0, epsilon = 1e-9);
        assert_relative_eq!(fix.y, 0.0, epsilon = 1e-9);
        assert_relative_eq!(fix.dist_m, 1.874, epsilon = 1e-3);
        assert_relative_eq!(fix.per_anchor_distances["A"], fix.per_anchor_distances["B"]);
        assert_eq!(fix.ts, NOW);
    }

    #[test]
    fn test_single_anchor_fallback() {
        let fix = estimator()
            .estimate("W-01", &[obs("A", -65.0)], &registry(), NOW)
            .unwrap()
            .unwrap();

        assert_eq!(fix.method, FixMethod::SingleAnchor);
        assert_eq!(fix.nearest_anchor_id, "A");
        assert_eq!(fix.num_anchors, 1);
        assert_relative_eq!(fix.dist_m, 1.874, epsilon = 1e-3);
        assert_eq!((fix.x, fix.y, fix.z), (0.0, 0.0, 0.0));
    }

    #[test]
    fn test_no_observations_no_fix() {
        assert!(estimator().estimate("W-01", &[], &registry(), NOW).unwrap().is_none());
    }

    #[test]
    fn test_outliers_and_unknown_anchors_are_excluded() {
        let observations = [obs("A", -10.0), obs("B", -120.0), obs("Z", -60.0)];
        assert!(estimator()
            .estimate("W-01", &observations, &registry(), NOW)
            .unwrap()
            .is_none());

        let observations = [obs("A", -10.0), obs("B", -70.0)];
        let fix = estimator().estimate("W-01", &observations, &registry(), NOW).unwrap().unwrap();
        assert_eq!(fix.method, FixMethod::SingleAnchor);
        assert_eq!(fix.nearest_anchor_id, "B");
        assert!(!fix.per_anchor_distances.contains_key("A"));
    }

    #[test]
    fn test_min_anchors_gating() {
        let estimator = PositionEstimator::from_config(&LocatorConfig {
            min_anchors: 2,
            ..LocatorConfig::default()
        });
        assert!(estimator.estimate("W-01", &[obs("A", -65.0)], &registry(), NOW).unwrap().is_none());
        assert!(estimator
            .estimate("W-01", &[obs("A", -65.0), obs("B", -66.0)], &registry(), NOW)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_top_k_keeps_nearest_and_reports_all_distances() {
        let observations = [obs("A", -55.0), obs("B", -60.0), obs("C", -62.0), obs("D", -90.0)];
        let fix = estimator().estimate("W-01", &observations, &registry(), NOW).unwrap().unwrap();

        assert_eq!(fix.num_anchors, 3);
        assert_eq!(fix.nearest_anchor_id, "A");
        assert_eq!(fix.per_anchor_distances.len(), 4);
        // Strongest anchor pulls the centroid towards the origin
        assert!(fix.x < 5.0 && fix.y < 5.0);
    }

    #[test]
    fn test_weights_favour_nearer_anchor() {
        let fix = estimator()
            .estimate("W-01", &[obs("A", -50.0), obs("B", -60.0)], &registry(), NOW)
            .unwrap()
            .unwrap();
        assert!(fix.x > 0.0 && fix.x < 5.0);
        assert_eq!(fix.y, 0.0);
    }

    #[test]
    fn test_per_anchor_calibration_override() {
        let anchors = AnchorRegistry::new(vec![
            Anchor::new("A", 0.0, 0.0, 0.0).with_calibration(-65.0, 2.0),
        ])
        .unwrap();
        let fix = estimator().estimate("W-01", &[obs("A", -65.0)], &anchors, NOW).unwrap().unwrap();
        assert_relative_eq!(fix.dist_m, 1.0);
    }

    #[test]
    fn test_quality_decreases_with_variance() {
        let low = quality_score(3, rssi_variance(&[-60.0, -61.0, -62.0]), 3);
        let high = quality_score(3, rssi_variance(&[-55.0, -65.0, -75.0]), 3);
        assert!(high < low);

        let mut previous = f64::INFINITY;
        for variance in [0.0, 1.0, 10.0, 100.0, 1_000.0] {
            let q = quality_score(2, variance, 3);
            assert!(q < previous);
            assert!((0.0..=1.0).contains(&q));
            previous = q;
        }
    }

    #[test]
    fn test_quality_does_not_drop_with_more_anchors() {
        for variance in [0.0, 4.0, 50.0] {
            assert!(quality_score(3, variance, 3) >= quality_score(2, variance, 3));
            assert!(quality_score(2, variance, 3) >= quality_score(1, variance, 3));
        }
        assert_relative_eq!(quality_score(3, 0.0, 3), 1.0);
    }

    #[test]
    fn test_rssi_variance() {
        assert_eq!(rssi_variance(&[-60.0]), 0.0);
        assert_relative_eq!(rssi_variance(&[-58.0, -62.0]), 4.0);
    }
}
