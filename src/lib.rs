//! Wearable real-time location system
//!
//! Tags broadcast a compact telemetry payload over BLE; fixed anchors decode,
//! deduplicate and forward what they hear; a central locator turns windowed
//! signal strength observations into coarse position fixes.

pub mod core;
pub mod algorithms;
pub mod processing;
pub mod validation;
pub mod utils;
pub mod hardware;
pub mod api;

// Re-export commonly used types
pub use core::{now_ms, Anchor, EmergencyEvent, FixMethod, PositionFix, Scan};
pub use algorithms::{PathLossModel, PositionEstimator};
pub use processing::{
    CodecError, DedupDecision, Deduplicator, ScanDecoder, TelemetryPayload, WindowAggregator,
};
pub use validation::{DataValidator, EstimateError, MessageError, Result, RtlsError};
pub use utils::{AnchorRegistry, ConfigError, LocatorConfig};
pub use hardware::{
    AdvertiserConfig, AdvertiserMode, CommError, CommResult, LinkSupervisor, RawAdvertisement,
    ReconnectPolicy, ScanObserver, TagAdvertiser,
};
pub use api::{
    AnchorPipeline, EmergencyEscalator, EventSink, FixSink, LocatorService, ScanMessage,
    ScanOutcome, ScanPublisher, TickReport,
};
