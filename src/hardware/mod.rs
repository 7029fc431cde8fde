//! Radio and transport abstraction layer
//!
//! The BLE stack, the sensor front-end and the message-bus connection are
//! external collaborators. This module defines the traits the core talks to,
//! the tag-side advertiser state machine, the transport link supervisor and
//! mock implementations for tests and simulation.

pub mod transceiver;
pub mod advertiser;
pub mod link;
pub mod mock;
pub mod error;

pub use transceiver::{BroadcastParams, BroadcastRadio, ScanObserver, TagSensors};
pub use advertiser::{AdvertiserConfig, AdvertiserMode, TagAdvertiser};
pub use link::{LinkSupervisor, ReconnectPolicy, TransportLink};
pub use mock::{MockLink, MockRadio, MockSensors};
pub use error::{CommError, CommResult, RecoveryStrategy};

/// Advertisement as delivered by the radio stack's scan callback
#[derive(Debug, Clone, PartialEq)]
pub struct RawAdvertisement {
    /// Advertised local name, if the packet carried one
    pub name: Option<String>,
    /// Manufacturer-specific data, if present
    pub manufacturer_data: Option<Vec<u8>>,
    /// Measured signal strength (dBm)
    pub rssi: f64,
    /// Receive time, milliseconds since the Unix epoch
    pub received_at_ms: i64,
}

impl RawAdvertisement {
    pub fn new(name: impl Into<String>, rssi: f64) -> Self {
        Self {
            name: Some(name.into()),
            manufacturer_data: None,
            rssi,
            received_at_ms: 0,
        }
    }

    pub fn with_timestamp(mut self, received_at_ms: i64) -> Self {
        self.received_at_ms = received_at_ms;
        self
    }

    pub fn with_manufacturer_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.manufacturer_data = Some(data.into());
        self
    }
}
