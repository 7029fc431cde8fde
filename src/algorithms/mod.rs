//! Position estimation algorithms

pub mod estimator;

pub use estimator::{quality_score, rssi_to_distance, rssi_variance, PathLossModel, PositionEstimator};
