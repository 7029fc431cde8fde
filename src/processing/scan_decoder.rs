//! Anchor-side advertisement decoding
//!
//! Turns raw advertisements into [`Scan`] records. Only names carrying the tag
//! prefix are accepted. A missing or truncated payload still yields a
//! presence-only scan so the tag remains locatable by signal strength.

use crate::core::{Scan, TAG_UID_PREFIX, TRANSPORT_ID};
use crate::hardware::RawAdvertisement;
use crate::processing::codec::{self, CodecError};
use tracing::trace;

/// Decoder bound to the anchor that receives the advertisements
#[derive(Debug, Clone)]
pub struct ScanDecoder {
    anchor_id: String,
}

impl ScanDecoder {
    pub fn new(anchor_id: impl Into<String>) -> Self {
        Self {
            anchor_id: anchor_id.into(),
        }
    }

    pub fn anchor_id(&self) -> &str {
        &self.anchor_id
    }

    /// Decode an advertisement; `None` when it does not belong to a tag
    pub fn decode(&self, adv: &RawAdvertisement) -> Option<Scan> {
        let uid = adv.name.as_deref().filter(|n| n.starts_with(TAG_UID_PREFIX))?;

        let mut scan = Scan::presence(adv.received_at_ms, self.anchor_id.as_str(), uid, adv.rssi);

        let data = adv.manufacturer_data.as_deref().unwrap_or(&[]);
        match codec::decode(data) {
            Ok(payload) => {
                if payload.transport_id != TRANSPORT_ID {
                    trace!(uid, transport_id = payload.transport_id, "unexpected transport id");
                }
                scan.battery_v = payload.battery_v();
                scan.temp_c = payload.temp_c();
                scan.tx_power_dbm = Some(payload.tx_power_dbm);
                scan.adv_seq = Some(payload.adv_seq);
                scan.emergency = payload.emergency();
            }
            Err(CodecError::MalformedPayload { available, .. }) => {
                trace!(uid, available, "no structured telemetry, presence only");
            }
        }

        Some(scan)
    }
}
