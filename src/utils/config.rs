//! Locator configuration and anchor registry
//!
//! Calibration and windowing parameters are read from the environment at
//! process start. Unset variables take their defaults; a variable that is set
//! but cannot be parsed, or is out of range, is a fatal [`ConfigError`].
//! Anchor positions come from a JSON file:
//!
//! ```json
//! { "anchors": [ { "id": "A1", "x": 0.0, "y": 0.0, "z": 2.5 } ] }
//! ```

use crate::core::Anchor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Configuration errors; all of them are fatal at startup
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Invalid parameter value
    #[error("Invalid parameter {parameter} = {value}: {reason}")]
    InvalidParameter {
        parameter: String,
        value: String,
        reason: String,
    },
    /// Configuration file I/O error
    #[error("I/O error: {message}")]
    IoError { message: String },
    /// JSON serialization/deserialization error
    #[error("Serialization error: {message}")]
    SerializationError { message: String },
    /// Anchor configuration conflict
    #[error("Anchor {anchor_id}: {reason}")]
    AnchorConflict { anchor_id: String, reason: String },
}

/// Estimation and windowing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocatorConfig {
    /// Expected RSSI at 1 m (dBm), `TX_POWER_DBM_AT_1M`
    pub tx_power_dbm_at_1m: f64,
    /// Log-distance path-loss exponent, `PATH_LOSS_EXPONENT`
    pub path_loss_exponent: f64,
    /// Anchors used per fix, `TOP_K`
    pub top_k: usize,
    /// Window horizon in seconds, `LOCATOR_WINDOW_S`
    pub window_s: f64,
    /// Observations required to emit a fix, `MIN_ANCHORS`
    pub min_anchors: usize,
    /// Weakest plausible RSSI (dBm), `RSSI_FLOOR_DBM`
    pub rssi_floor_dbm: f64,
    /// Strongest plausible RSSI (dBm), `RSSI_CEILING_DBM`
    pub rssi_ceiling_dbm: f64,
    /// Lower bound on distances used for weighting (m), `WEIGHT_DIST_CLAMP_M`
    pub weight_dist_clamp_m: f64,
    /// Estimation tick period (ms), `LOCATOR_TICK_MS`
    pub tick_interval_ms: u64,
    /// Minimum time between two fixes for the same uid (s), `WRITE_THROTTLE_S`
    pub write_throttle_s: f64,
    /// Inbound timestamps earlier than this are replaced by now, `TS_MIN_EPOCH_MS`
    pub ts_min_epoch_ms: i64,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            tx_power_dbm_at_1m: -59.0,
            path_loss_exponent: 2.2,
            top_k: 3,
            window_s: 3.0,
            min_anchors: 1,
            rssi_floor_dbm: -105.0,
            rssi_ceiling_dbm: -20.0,
            weight_dist_clamp_m: 0.5,
            tick_interval_ms: 1_000,
            write_throttle_s: 0.0,
            ts_min_epoch_ms: 1_514_764_800_000, // 2018-01-01
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidParameter {
            parameter: key.to_string(),
            value: raw.clone(),
            reason: "not a valid number".to_string(),
        }),
    }
}

fn invalid(parameter: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidParameter {
        parameter: parameter.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

impl LocatorConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let config = Self {
            tx_power_dbm_at_1m: parse_var(&lookup, "TX_POWER_DBM_AT_1M", d.tx_power_dbm_at_1m)?,
            path_loss_exponent: parse_var(&lookup, "PATH_LOSS_EXPONENT", d.path_loss_exponent)?,
            top_k: parse_var(&lookup, "TOP_K", d.top_k)?,
            window_s: parse_var(&lookup, "LOCATOR_WINDOW_S", d.window_s)?,
            min_anchors: parse_var(&lookup, "MIN_ANCHORS", d.min_anchors)?,
            rssi_floor_dbm: parse_var(&lookup, "RSSI_FLOOR_DBM", d.rssi_floor_dbm)?,
            rssi_ceiling_dbm: parse_var(&lookup, "RSSI_CEILING_DBM", d.rssi_ceiling_dbm)?,
            weight_dist_clamp_m: parse_var(&lookup, "WEIGHT_DIST_CLAMP_M", d.weight_dist_clamp_m)?,
            tick_interval_ms: parse_var(&lookup, "LOCATOR_TICK_MS", d.tick_interval_ms)?,
            write_throttle_s: parse_var(&lookup, "WRITE_THROTTLE_S", d.write_throttle_s)?,
            ts_min_epoch_ms: parse_var(&lookup, "TS_MIN_EPOCH_MS", d.ts_min_epoch_ms)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.tx_power_dbm_at_1m.is_finite() {
            return Err(invalid("TX_POWER_DBM_AT_1M", self.tx_power_dbm_at_1m, "must be finite"));
        }
        if !(self.path_loss_exponent.is_finite() && self.path_loss_exponent > 0.0) {
            return Err(invalid("PATH_LOSS_EXPONENT", self.path_loss_exponent, "must be positive"));
        }
        if self.top_k == 0 {
            return Err(invalid("TOP_K", self.top_k, "must be at least 1"));
        }
        if !(self.window_s.is_finite() && self.window_s > 0.0) {
            return Err(invalid("LOCATOR_WINDOW_S", self.window_s, "must be positive"));
        }
        if self.min_anchors == 0 {
            return Err(invalid("MIN_ANCHORS", self.min_anchors, "must be at least 1"));
        }
        if !(self.rssi_floor_dbm < self.rssi_ceiling_dbm) {
            return Err(invalid(
                "RSSI_FLOOR_DBM",
                self.rssi_floor_dbm,
                "must be below RSSI_CEILING_DBM",
            ));
        }
        if !(self.weight_dist_clamp_m.is_finite() && self.weight_dist_clamp_m >= 0.0) {
            return Err(invalid("WEIGHT_DIST_CLAMP_M", self.weight_dist_clamp_m, "must be non-negative"));
        }
        if self.tick_interval_ms == 0 {
            return Err(invalid("LOCATOR_TICK_MS", self.tick_interval_ms, "must be positive"));
        }
        if !(self.write_throttle_s.is_finite() && self.write_throttle_s >= 0.0) {
            return Err(invalid("WRITE_THROTTLE_S", self.write_throttle_s, "must be non-negative"));
        }
        Ok(())
    }

    pub fn window_ms(&self) -> i64 {
        (self.window_s * 1000.0).round() as i64
    }

    pub fn write_throttle_ms(&self) -> i64 {
        (self.write_throttle_s * 1000.0).round() as i64
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AnchorsFile {
    anchors: Vec<Anchor>,
}

/// Immutable set of known anchors, keyed by id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnchorRegistry {
    anchors: BTreeMap<String, Anchor>,
}

impl AnchorRegistry {
    /// Build a registry, rejecting invalid or duplicate anchors
    pub fn new(anchors: impl IntoIterator<Item = Anchor>) -> Result<Self, ConfigError> {
        let mut registry = BTreeMap::new();
        for anchor in anchors {
            Self::validate_anchor(&anchor)?;
            if registry.contains_key(&anchor.id) {
                return Err(ConfigError::AnchorConflict {
                    anchor_id: anchor.id.clone(),
                    reason: "duplicate anchor id".to_string(),
                });
            }
            registry.insert(anchor.id.clone(), anchor);
        }
        Ok(Self { anchors: registry })
    }

    /// Parse a registry from the anchors JSON document
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let file: AnchorsFile = serde_json::from_str(content).map_err(|e| {
            ConfigError::SerializationError {
                message: format!("Failed to parse anchors: {}", e),
            }
        })?;
        Self::new(file.anchors)
    }

    /// Load a registry from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let content = fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
            message: format!("Failed to read anchors file '{}': {}", path_str, e),
        })?;
        Self::from_json(&content)
    }

    /// Save the registry to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let file = AnchorsFile {
            anchors: self.anchors.values().cloned().collect(),
        };
        let content = serde_json::to_string_pretty(&file).map_err(|e| {
            ConfigError::SerializationError {
                message: format!("Failed to serialize anchors: {}", e),
            }
        })?;
        fs::write(&path, content).map_err(|e| ConfigError::IoError {
            message: format!("Failed to write anchors file '{}': {}", path_str, e),
        })
    }

    fn validate_anchor(anchor: &Anchor) -> Result<(), ConfigError> {
        let conflict = |reason: &str| ConfigError::AnchorConflict {
            anchor_id: anchor.id.clone(),
            reason: reason.to_string(),
        };

        if anchor.id.is_empty() || anchor.id.len() > 64 {
            return Err(conflict("id must be 1-64 characters"));
        }
        if !(anchor.x.is_finite() && anchor.y.is_finite() && anchor.z.is_finite()) {
            return Err(conflict("position must be finite"));
        }
        if let Some(tx) = anchor.tx_power_dbm_at_1m {
            if !tx.is_finite() {
                return Err(conflict("tx_power_dbm_at_1m must be finite"));
            }
        }
        if let Some(n) = anchor.path_loss_exponent {
            if !(n.is_finite() && n > 0.0) {
                return Err(conflict("path_loss_exponent must be positive"));
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Anchor> {
        self.anchors.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.anchors.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Anchor> {
        self.anchors.values()
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }
}
