//! Validation of inbound scan messages before they reach the window

use crate::api::messages::ScanMessage;
use crate::core::Scan;
use crate::utils::{AnchorRegistry, LocatorConfig};
use thiserror::Error;

/// Inbound messages whose timestamp is this far in the future are re-stamped
const MAX_FUTURE_SKEW_MS: i64 = 365 * 24 * 3600 * 1000;

/// Configuration for inbound message validation
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Earliest plausible timestamp (ms since epoch)
    pub ts_min_epoch_ms: i64,
    /// How far ahead of the local clock a timestamp may be (ms)
    pub max_future_skew_ms: i64,
    /// Maximum length of uid and anchor id strings
    pub max_id_len: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self::from_locator(&LocatorConfig::default())
    }
}

impl ValidationConfig {
    pub fn from_locator(config: &LocatorConfig) -> Self {
        Self {
            ts_min_epoch_ms: config.ts_min_epoch_ms,
            max_future_skew_ms: MAX_FUTURE_SKEW_MS,
            max_id_len: 64,
        }
    }
}

/// Reasons an inbound message is dropped
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MessageError {
    #[error("Malformed message: {details}")]
    Malformed { details: String },
    #[error("Invalid {field}: {reason}")]
    InvalidField { field: String, reason: String },
    #[error("Unknown anchor: {anchor_id}")]
    UnknownAnchor { anchor_id: String },
}

/// Validator turning transport messages into scans
#[derive(Debug, Clone, Default)]
pub struct DataValidator {
    config: ValidationConfig,
}

impl DataValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Parse and validate one JSON scan message
    pub fn parse_scan(
        &self,
        json: &str,
        anchors: &AnchorRegistry,
        now_ms: i64,
    ) -> Result<Scan, MessageError> {
        let message: ScanMessage = serde_json::from_str(json).map_err(|e| MessageError::Malformed {
            details: e.to_string(),
        })?;
        self.validate_scan(message, anchors, now_ms)
    }

    /// Validate a scan message against field limits and the anchor registry
    pub fn validate_scan(
        &self,
        message: ScanMessage,
        anchors: &AnchorRegistry,
        now_ms: i64,
    ) -> Result<Scan, MessageError> {
        self.check_id("anchor_id", &message.anchor_id)?;
        self.check_id("uid", &message.uid)?;

        if !message.rssi.is_finite() {
            return Err(MessageError::InvalidField {
                field: "rssi".to_string(),
                reason: "must be a finite number".to_string(),
            });
        }
        if !anchors.contains(&message.anchor_id) {
            return Err(MessageError::UnknownAnchor {
                anchor_id: message.anchor_id,
            });
        }

        let ts = self.coerce_ts(message.ts, now_ms);
        Ok(Scan {
            ts,
            anchor_id: message.anchor_id,
            uid: message.uid,
            rssi: message.rssi,
            battery_v: message.battery,
            temp_c: message.temp_c,
            tx_power_dbm: message.tx_power_dbm,
            adv_seq: message.adv_seq,
            emergency: message.emergency,
        })
    }

    /// Missing or implausible timestamps are replaced by `now_ms`
    pub fn coerce_ts(&self, ts: Option<i64>, now_ms: i64) -> i64 {
        match ts {
            Some(ts) if ts >= self.config.ts_min_epoch_ms && ts <= now_ms + self.config.max_future_skew_ms => ts,
            _ => now_ms,
        }
    }

    fn check_id(&self, field: &str, value: &str) -> Result<(), MessageError> {
        if value.is_empty() || value.chars().count() > self.config.max_id_len {
            return Err(MessageError::InvalidField {
                field: field.to_string(),
                reason: format!("length must be 1-{}", self.config.max_id_len),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Anchor;

    const NOW: i64 = 1_700_000_000_000;

    fn anchors() -> AnchorRegistry {
        AnchorRegistry::new(vec![Anchor::new("A1", 0.0, 0.0, 0.0)]).unwrap()
    }

    #[test]
    fn test_parse_full_scan_message() {
        let json = r#"{"ts": 1699999999000, "anchor_id": "A1", "uid": "W-01", "rssi": -67.5,
                       "battery": 3.7, "temp_c": 21.5, "adv_seq": 412, "tx_power_dbm": -4,
                       "emergency": true}"#;
        let scan = DataValidator::new().parse_scan(json, &anchors(), NOW).unwrap();

        assert_eq!(scan.ts, 1_699_999_999_000);
        assert_eq!(scan.rssi, -67.5);
        assert_eq!(scan.battery_v, Some(3.7));
        assert_eq!(scan.adv_seq, Some(412));
        assert_eq!(scan.tx_power_dbm, Some(-4));
        assert!(scan.emergency);
    }

    #[test]
    fn test_optional_fields_may_be_absent() {
        let json = r#"{"ts": 1699999999000, "anchor_id": "A1", "uid": "W-01", "rssi": -70}"#;
        let scan = DataValidator::new().parse_scan(json, &anchors(), NOW).unwrap();
        assert_eq!(scan.adv_seq, None);
        assert_eq!(scan.battery_v, None);
        assert!(!scan.emergency);
    }

    #[test]
    fn test_timestamp_coercion() {
        let validator = DataValidator::new();
        assert_eq!(validator.coerce_ts(None, NOW), NOW);
        assert_eq!(validator.coerce_ts(Some(1_000), NOW), NOW);
        assert_eq!(validator.coerce_ts(Some(NOW + MAX_FUTURE_SKEW_MS + 1), NOW), NOW);
        assert_eq!(validator.coerce_ts(Some(NOW - 5), NOW), NOW - 5);
    }

    #[test]
    fn test_rejections() {
        let validator = DataValidator::new();

        let unknown = r#"{"anchor_id": "A9", "uid": "W-01", "rssi": -70}"#;
        assert_eq!(
            validator.parse_scan(unknown, &anchors(), NOW),
            Err(MessageError::UnknownAnchor { anchor_id: "A9".to_string() })
        );

        let empty_uid = r#"{"anchor_id": "A1", "uid": "", "rssi": -70}"#;
        assert!(matches!(
            validator.parse_scan(empty_uid, &anchors(), NOW),
            Err(MessageError::InvalidField { .. })
        ));

        let long_uid = format!(r#"{{"anchor_id": "A1", "uid": "{}", "rssi": -70}}"#, "W".repeat(65));
        assert!(validator.parse_scan(&long_uid, &anchors(), NOW).is_err());

        assert!(matches!(
            validator.parse_scan("{not json", &anchors(), NOW),
            Err(MessageError::Malformed { .. })
        ));
        assert!(matches!(
            validator.parse_scan(r#"{"anchor_id": "A1", "uid": "W-01"}"#, &anchors(), NOW),
            Err(MessageError::Malformed { .. })
        ));
    }
}
