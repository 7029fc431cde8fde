//! Payload and scan processing: codec, anchor-side decoding and dedup,
//! server-side window aggregation

pub mod codec;
pub mod scan_decoder;
pub mod dedup;
pub mod window;

pub use codec::{CodecError, TelemetryPayload};
pub use scan_decoder::ScanDecoder;
pub use dedup::{DedupDecision, DedupState, Deduplicator};
pub use window::WindowAggregator;
