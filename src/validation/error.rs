//! Error types for estimation and the crate-level error wrapper

use crate::hardware::CommError;
use crate::processing::CodecError;
use crate::utils::ConfigError;
use crate::validation::data::MessageError;
use thiserror::Error;

/// Failure computing one tag's fix. Affects only that tag for that tick.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EstimateError {
    /// The RSSI-to-distance model produced an unusable distance
    #[error("Non-finite distance for anchor {anchor_id} (rssi {rssi} dBm)")]
    NonFiniteDistance { anchor_id: String, rssi: f64 },
    /// The combined position is not a finite point
    #[error("Non-finite position estimate for {uid}")]
    NonFinitePosition { uid: String },
}

/// Top-level error for the crate
#[derive(Error, Debug)]
pub enum RtlsError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Comm(#[from] CommError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Estimate(#[from] EstimateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for crate operations
pub type Result<T> = std::result::Result<T, RtlsError>;
