//! Core data types for the positioning system

use crate::core::constants::{EMERGENCY_EVENT_TYPE, EMERGENCY_SEVERITY};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Fixed receiver with a known position in the site frame (metres)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub id: String,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
    /// Calibrated RSSI at 1 m for this anchor, overrides the global constant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_power_dbm_at_1m: Option<f64>,
    /// Path-loss exponent for this anchor, overrides the global constant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_loss_exponent: Option<f64>,
}

impl Anchor {
    pub fn new(id: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            id: id.into(),
            x,
            y,
            z,
            tx_power_dbm_at_1m: None,
            path_loss_exponent: None,
        }
    }

    pub fn with_calibration(mut self, tx_power_dbm_at_1m: f64, path_loss_exponent: f64) -> Self {
        self.tx_power_dbm_at_1m = Some(tx_power_dbm_at_1m);
        self.path_loss_exponent = Some(path_loss_exponent);
        self
    }

    pub fn position(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }
}

/// One received advertisement as seen by one anchor
#[derive(Debug, Clone, PartialEq)]
pub struct Scan {
    /// Receive time, milliseconds since the Unix epoch
    pub ts: i64,
    pub anchor_id: String,
    pub uid: String,
    /// Received signal strength (dBm)
    pub rssi: f64,
    pub battery_v: Option<f32>,
    pub temp_c: Option<f32>,
    pub tx_power_dbm: Option<i8>,
    pub adv_seq: Option<u16>,
    pub emergency: bool,
}

impl Scan {
    /// Presence-only observation, used when no structured telemetry is available
    pub fn presence(ts: i64, anchor_id: impl Into<String>, uid: impl Into<String>, rssi: f64) -> Self {
        Self {
            ts,
            anchor_id: anchor_id.into(),
            uid: uid.into(),
            rssi,
            battery_v: None,
            temp_c: None,
            tx_power_dbm: None,
            adv_seq: None,
            emergency: false,
        }
    }

    pub fn with_seq(mut self, adv_seq: u16) -> Self {
        self.adv_seq = Some(adv_seq);
        self
    }

    pub fn with_emergency(mut self, emergency: bool) -> Self {
        self.emergency = emergency;
        self
    }
}

/// How a position fix was derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixMethod {
    /// Only one anchor heard the tag; the fix sits on that anchor
    SingleAnchor,
    /// Inverse-square distance weighted centroid of the nearest anchors
    Proximity,
    /// Weights degenerated; the fix sits on the nearest anchor
    FallbackNearest,
    /// No usable observation
    None,
}

/// Position estimate for one tag at one estimation tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub ts: i64,
    pub uid: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub method: FixMethod,
    pub q_score: f64,
    pub nearest_anchor_id: String,
    pub dist_m: f64,
    pub num_anchors: usize,
    #[serde(rename = "dists")]
    pub per_anchor_distances: BTreeMap<String, f64>,
}

impl PositionFix {
    pub fn position(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }
}

/// High-priority event raised for every forwarded emergency scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyEvent {
    pub ts: i64,
    pub uid: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub severity: u8,
    pub details: String,
    pub anchor_id: String,
}

impl EmergencyEvent {
    pub fn button_pressed(scan: &Scan) -> Self {
        Self {
            ts: scan.ts,
            uid: scan.uid.clone(),
            event_type: EMERGENCY_EVENT_TYPE.to_string(),
            severity: EMERGENCY_SEVERITY,
            details: "pressed=true".to_string(),
            anchor_id: scan.anchor_id.clone(),
        }
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
