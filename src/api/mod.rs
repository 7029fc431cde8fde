//! Service layer: anchor receive pipeline, emergency escalation and the
//! server-side locator, plus the message shapes and sinks they exchange.

pub mod messages;
pub mod sink;
pub mod escalator;
pub mod anchor;
pub mod locator;

pub use messages::ScanMessage;
pub use sink::{EventSink, FixSink, JsonLinesSink, MemorySink, ScanPublisher};
pub use escalator::EmergencyEscalator;
pub use anchor::{AnchorPipeline, ScanOutcome};
pub use locator::{LocatorService, TickReport};
