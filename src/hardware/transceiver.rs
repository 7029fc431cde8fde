//! Radio interface traits
//!
//! `ScanObserver` is the anchor-side receive capability; `BroadcastRadio` and
//! `TagSensors` are what the tag-side advertiser drives.

use crate::hardware::{CommResult, RawAdvertisement};

/// Receiver of advertisements delivered by the radio stack.
///
/// The radio stack may invoke this from its own execution context,
/// concurrently with the application tick loop, so implementations take
/// `&self` and synchronize internally.
pub trait ScanObserver: Send + Sync {
    fn on_advertisement(&self, advertisement: RawAdvertisement);
}

/// Broadcast parameters issued to the radio on every (re)start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastParams {
    pub min_interval_ms: u32,
    pub max_interval_ms: u32,
    pub tx_power_dbm: i8,
}

/// Tag-side advertising capability
pub trait BroadcastRadio {
    /// Stop any running broadcast and start advertising `name` with the given
    /// manufacturer data and cadence.
    fn start_broadcast(
        &mut self,
        name: &str,
        manufacturer_data: &[u8],
        params: BroadcastParams,
    ) -> CommResult<()>;

    /// Stop advertising
    fn stop_broadcast(&mut self) -> CommResult<()>;
}

/// Tag-side sensor front-end
pub trait TagSensors {
    /// Battery voltage, `None` when not measured
    fn battery_v(&mut self) -> Option<f32>;

    /// Temperature in degrees Celsius, `None` when not measured
    fn temperature_c(&mut self) -> Option<f32>;

    /// Current level of the emergency button (true = held)
    fn emergency_pressed(&mut self) -> bool;
}
