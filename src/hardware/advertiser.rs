//! Tag-side advertiser state machine
//!
//! The advertiser owns the sequence counter and the cadence mode. It is driven
//! by `poll(now_ms)` from the tag's main loop:
//!
//! - an emergency button edge switches mode and refreshes immediately, so the
//!   new broadcast cadence is visible within one poll of the button event;
//! - otherwise the payload is refreshed when the mode's refresh period elapses.
//!
//! Every refresh bumps `adv_seq`, re-reads the sensors and restarts the
//! broadcast with the new payload.

use crate::core::{
    EMERGENCY_INTERVAL_MS, EMERGENCY_REFRESH_MS, IDLE_INTERVAL_MS, IDLE_REFRESH_MS, TAG_UID_PREFIX,
};
use crate::hardware::{BroadcastParams, BroadcastRadio, CommError, CommResult, TagSensors};
use crate::processing::codec::{encode, TelemetryPayload};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Refresh cadence mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdvertiserMode {
    Idle,
    Emergency,
}

impl AdvertiserMode {
    pub fn refresh_period_ms(&self) -> u64 {
        match self {
            AdvertiserMode::Idle => IDLE_REFRESH_MS,
            AdvertiserMode::Emergency => EMERGENCY_REFRESH_MS,
        }
    }

    pub fn interval_ms(&self) -> (u32, u32) {
        match self {
            AdvertiserMode::Idle => IDLE_INTERVAL_MS,
            AdvertiserMode::Emergency => EMERGENCY_INTERVAL_MS,
        }
    }
}

/// Tag advertiser configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvertiserConfig {
    /// Advertised name, must carry the tag prefix
    pub uid: String,
    /// Nominal transmit power reported in the payload
    pub tx_power_dbm: i8,
}

impl AdvertiserConfig {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            tx_power_dbm: 0,
        }
    }

    pub fn validate(&self) -> CommResult<()> {
        if !self.uid.starts_with(TAG_UID_PREFIX) || self.uid.len() <= TAG_UID_PREFIX.len() {
            return Err(CommError::ConfigurationError {
                parameter: "uid".to_string(),
                value: self.uid.clone(),
            });
        }
        Ok(())
    }
}

/// Tag-side broadcast state machine
pub struct TagAdvertiser<R: BroadcastRadio, S: TagSensors> {
    config: AdvertiserConfig,
    radio: R,
    sensors: S,
    seq: u16,
    mode: AdvertiserMode,
    /// Button level seen at the previous poll, for edge detection
    button_level: bool,
    next_refresh_ms: Option<u64>,
}

impl<R: BroadcastRadio, S: TagSensors> TagAdvertiser<R, S> {
    pub fn new(config: AdvertiserConfig, radio: R, sensors: S) -> CommResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            radio,
            sensors,
            seq: 0,
            mode: AdvertiserMode::Idle,
            button_level: false,
            next_refresh_ms: None,
        })
    }

    /// Advance the state machine. Returns the payload if a refresh happened.
    pub fn poll(&mut self, now_ms: u64) -> CommResult<Option<TelemetryPayload>> {
        let pressed = self.sensors.emergency_pressed();
        if pressed != self.button_level {
            self.button_level = pressed;
            let mode = if pressed { AdvertiserMode::Emergency } else { AdvertiserMode::Idle };
            info!(uid = %self.config.uid, ?mode, "emergency button edge");
            self.mode = mode;
            return self.refresh(now_ms).map(Some);
        }

        match self.next_refresh_ms {
            Some(due) if now_ms < due => Ok(None),
            _ => self.refresh(now_ms).map(Some),
        }
    }

    fn refresh(&mut self, now_ms: u64) -> CommResult<TelemetryPayload> {
        self.seq = self.seq.wrapping_add(1);

        let payload = TelemetryPayload::from_readings(
            &self.config.uid,
            self.seq,
            self.sensors.battery_v(),
            self.sensors.temperature_c(),
            self.mode == AdvertiserMode::Emergency,
            self.config.tx_power_dbm,
        );

        let (min_interval_ms, max_interval_ms) = self.mode.interval_ms();
        let params = BroadcastParams {
            min_interval_ms,
            max_interval_ms,
            tx_power_dbm: self.config.tx_power_dbm,
        };

        let started = self
            .radio
            .stop_broadcast()
            .and_then(|_| self.radio.start_broadcast(&self.config.uid, &encode(&payload), params));
        if let Err(e) = started {
            // Due again on the next poll
            self.next_refresh_ms = None;
            warn!(uid = %self.config.uid, seq = self.seq, error = %e, "broadcast restart failed");
            return Err(e);
        }
        self.next_refresh_ms = Some(now_ms + self.mode.refresh_period_ms());

        debug!(uid = %self.config.uid, seq = self.seq, mode = ?self.mode, "payload refreshed");
        Ok(payload)
    }

    pub fn seq(&self) -> u16 {
        self.seq
    }

    pub fn mode(&self) -> AdvertiserMode {
        self.mode
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn sensors_mut(&mut self) -> &mut S {
        &mut self.sensors
    }
}
