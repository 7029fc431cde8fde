//! Protocol constants and cadence parameters

/// Advertised-name prefix identifying the wearable tag population
pub const TAG_UID_PREFIX: &str = "W-";

/// Length of the telemetry payload carried in manufacturer data (bytes)
pub const TELEMETRY_PAYLOAD_LEN: usize = 14;

/// Schema identifier written little-endian at offset 0 of every payload
pub const TRANSPORT_ID: u16 = 0xFFFF;

/// Temperature sentinel meaning "no reading"
pub const TEMP_NO_READING: i16 = 0x7FFF;

/// Flag bit signalling that the emergency button is held
pub const FLAG_EMERGENCY: u8 = 0x01;

/// Event type string published by the emergency escalator
pub const EMERGENCY_EVENT_TYPE: &str = "emergency_button";

/// Severity attached to emergency events
pub const EMERGENCY_SEVERITY: u8 = 2;

/// Payload refresh period while idle (ms)
pub const IDLE_REFRESH_MS: u64 = 5_000;
/// Broadcast interval bounds while idle (ms)
pub const IDLE_INTERVAL_MS: (u32, u32) = (1_000, 1_250);

/// Payload refresh period while the emergency button is held (ms)
pub const EMERGENCY_REFRESH_MS: u64 = 1_000;
/// Broadcast interval bounds while the emergency button is held (ms)
pub const EMERGENCY_INTERVAL_MS: (u32, u32) = (100, 125);
