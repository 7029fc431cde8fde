//! Mock radio, sensor and link implementations for testing and simulation

use crate::hardware::{
    BroadcastParams, BroadcastRadio, CommError, CommResult, TagSensors, TransportLink,
};

/// One broadcast as issued to the mock radio
#[derive(Debug, Clone, PartialEq)]
pub struct MockBroadcast {
    pub name: String,
    pub data: Vec<u8>,
    pub params: BroadcastParams,
}

/// Mock radio recording every broadcast it was asked to start
#[derive(Debug, Default)]
pub struct MockRadio {
    history: Vec<MockBroadcast>,
    active: bool,
    fail_next: bool,
}

impl MockRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broadcast currently on air
    pub fn current(&self) -> Option<&MockBroadcast> {
        if self.active {
            self.history.last()
        } else {
            None
        }
    }

    /// Every broadcast started so far, oldest first
    pub fn history(&self) -> &[MockBroadcast] {
        &self.history
    }

    /// Make the next `start_broadcast` fail
    pub fn fail_next_start(&mut self) {
        self.fail_next = true;
    }
}

impl BroadcastRadio for MockRadio {
    fn start_broadcast(
        &mut self,
        name: &str,
        manufacturer_data: &[u8],
        params: BroadcastParams,
    ) -> CommResult<()> {
        if self.fail_next {
            self.fail_next = false;
            return Err(CommError::RadioError {
                details: "Simulated advertising start failure".to_string(),
            });
        }

        self.history.push(MockBroadcast {
            name: name.to_string(),
            data: manufacturer_data.to_vec(),
            params,
        });
        self.active = true;
        Ok(())
    }

    fn stop_broadcast(&mut self) -> CommResult<()> {
        self.active = false;
        Ok(())
    }
}

/// Mock sensor front-end with settable readings
#[derive(Debug, Clone)]
pub struct MockSensors {
    battery_v: Option<f32>,
    temperature_c: Option<f32>,
    emergency: bool,
}

impl MockSensors {
    pub fn new(battery_v: Option<f32>, temperature_c: Option<f32>) -> Self {
        Self {
            battery_v,
            temperature_c,
            emergency: false,
        }
    }

    pub fn set_emergency(&mut self, pressed: bool) {
        self.emergency = pressed;
    }

    pub fn set_battery(&mut self, battery_v: Option<f32>) {
        self.battery_v = battery_v;
    }
}

impl TagSensors for MockSensors {
    fn battery_v(&mut self) -> Option<f32> {
        self.battery_v
    }

    fn temperature_c(&mut self) -> Option<f32> {
        self.temperature_c
    }

    fn emergency_pressed(&mut self) -> bool {
        self.emergency
    }
}

/// Mock transport link failing a configurable number of connects
#[derive(Debug)]
pub struct MockLink {
    connected: bool,
    failures_left: u32,
    attempts: u32,
}

impl MockLink {
    pub fn connected() -> Self {
        Self {
            connected: true,
            failures_left: 0,
            attempts: 0,
        }
    }

    /// Disconnected link whose next `failures` connect attempts fail
    pub fn failing_for(failures: u32) -> Self {
        Self {
            connected: false,
            failures_left: failures,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl TransportLink for MockLink {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn connect(&mut self) -> CommResult<()> {
        self.attempts += 1;
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(CommError::ConnectionLost {
                endpoint: self.endpoint(),
            });
        }
        self.connected = true;
        Ok(())
    }

    fn mark_lost(&mut self) {
        self.connected = false;
    }

    fn endpoint(&self) -> String {
        "mock://broker".to_string()
    }
}
