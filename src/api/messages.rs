//! Transport message shapes exchanged between anchors and the locator

use crate::core::Scan;
use serde::{Deserialize, Serialize};

/// Scan as carried over the message bus, one JSON object per message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanMessage {
    /// Receive time (ms since epoch); the locator substitutes its own clock if absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
    pub anchor_id: String,
    pub uid: String,
    pub rssi: f64,
    /// Battery voltage (V)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_c: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adv_seq: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_power_dbm: Option<i8>,
    #[serde(default)]
    pub emergency: bool,
}

impl From<&Scan> for ScanMessage {
    fn from(scan: &Scan) -> Self {
        Self {
            ts: Some(scan.ts),
            anchor_id: scan.anchor_id.clone(),
            uid: scan.uid.clone(),
            rssi: scan.rssi,
            battery: scan.battery_v,
            temp_c: scan.temp_c,
            adv_seq: scan.adv_seq,
            tx_power_dbm: scan.tx_power_dbm,
            emergency: scan.emergency,
        }
    }
}
