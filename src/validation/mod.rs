//! Inbound message validation and error types

pub mod data;
pub mod error;

pub use data::{DataValidator, MessageError, ValidationConfig};
pub use error::{EstimateError, Result, RtlsError};
