//! Telemetry payload codec
//!
//! Every tag broadcast carries a fixed 14-byte payload in its manufacturer
//! data. Byte offsets are a compatibility contract with deployed firmware:
//!
//! ```text
//! [transport_id(2, LE)] [uid_hint(3)] [adv_seq(2, BE)] [battery_mV(2, BE)]
//! [temp_c_x100(2, BE)] [flags(1)] [tx_power_dbm(1)] [reserved(1)]
//! ```

use crate::core::{FLAG_EMERGENCY, TELEMETRY_PAYLOAD_LEN, TEMP_NO_READING, TRANSPORT_ID};
use thiserror::Error;

/// Errors that can occur while decoding a telemetry payload
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    /// Payload shorter than the fixed layout
    #[error("Malformed payload: need {required} bytes, got {available}")]
    MalformedPayload { required: usize, available: usize },
}

/// Decoded telemetry payload, in wire units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryPayload {
    pub transport_id: u16,
    /// First three bytes of the tag uid; informational only
    pub uid_hint: [u8; 3],
    pub adv_seq: u16,
    /// Battery voltage in millivolts, 0 when unmeasured
    pub battery_mv: u16,
    /// Temperature in hundredths of a degree, `None` when there is no reading
    pub temp_c_x100: Option<i16>,
    pub flags: u8,
    pub tx_power_dbm: i8,
}

impl TelemetryPayload {
    /// Build a payload from physical sensor readings.
    ///
    /// Out-of-range battery and temperature readings saturate to the nearest
    /// representable value instead of wrapping.
    pub fn from_readings(
        uid: &str,
        adv_seq: u16,
        battery_v: Option<f32>,
        temp_c: Option<f32>,
        emergency: bool,
        tx_power_dbm: i8,
    ) -> Self {
        Self {
            transport_id: TRANSPORT_ID,
            uid_hint: uid_hint(uid),
            adv_seq,
            battery_mv: battery_v.map(volts_to_millivolts).unwrap_or(0),
            temp_c_x100: temp_c.and_then(celsius_to_centi),
            flags: if emergency { FLAG_EMERGENCY } else { 0 },
            tx_power_dbm,
        }
    }

    pub fn emergency(&self) -> bool {
        self.flags & FLAG_EMERGENCY != 0
    }

    pub fn battery_v(&self) -> Option<f32> {
        (self.battery_mv != 0).then(|| self.battery_mv as f32 / 1000.0)
    }

    pub fn temp_c(&self) -> Option<f32> {
        self.temp_c_x100.map(|t| t as f32 / 100.0)
    }
}

/// Zero-padded first three bytes of a uid
pub fn uid_hint(uid: &str) -> [u8; 3] {
    let mut hint = [0u8; 3];
    for (slot, byte) in hint.iter_mut().zip(uid.bytes()) {
        *slot = byte;
    }
    hint
}

fn volts_to_millivolts(volts: f32) -> u16 {
    if volts.is_nan() || volts <= 0.0 {
        return 0;
    }
    // `as` saturates float-to-int conversions
    (volts * 1000.0).round() as u16
}

fn celsius_to_centi(celsius: f32) -> Option<i16> {
    if celsius.is_nan() {
        return None;
    }
    let centi = (celsius * 100.0).round().clamp(i16::MIN as f32, (TEMP_NO_READING - 1) as f32);
    Some(centi as i16)
}

/// Encode a payload into its 14-byte wire form
pub fn encode(payload: &TelemetryPayload) -> [u8; TELEMETRY_PAYLOAD_LEN] {
    let mut out = [0u8; TELEMETRY_PAYLOAD_LEN];
    out[0..2].copy_from_slice(&payload.transport_id.to_le_bytes());
    out[2..5].copy_from_slice(&payload.uid_hint);
    out[5..7].copy_from_slice(&payload.adv_seq.to_be_bytes());
    out[7..9].copy_from_slice(&payload.battery_mv.to_be_bytes());

    let temp = match payload.temp_c_x100 {
        // A reading equal to the sentinel would be read back as "no reading"
        Some(t) if t == TEMP_NO_READING => TEMP_NO_READING - 1,
        Some(t) => t,
        None => TEMP_NO_READING,
    };
    out[9..11].copy_from_slice(&temp.to_be_bytes());
    out[11] = payload.flags;
    out[12] = payload.tx_power_dbm as u8;
    out[13] = 0;
    out
}

/// Decode the first 14 bytes of `data`. Trailing bytes are ignored.
pub fn decode(data: &[u8]) -> Result<TelemetryPayload, CodecError> {
    if data.len() < TELEMETRY_PAYLOAD_LEN {
        return Err(CodecError::MalformedPayload {
            required: TELEMETRY_PAYLOAD_LEN,
            available: data.len(),
        });
    }

    let temp = i16::from_be_bytes([data[9], data[10]]);

    Ok(TelemetryPayload {
        transport_id: u16::from_le_bytes([data[0], data[1]]),
        uid_hint: [data[2], data[3], data[4]],
        adv_seq: u16::from_be_bytes([data[5], data[6]]),
        battery_mv: u16::from_be_bytes([data[7], data[8]]),
        temp_c_x100: (temp != TEMP_NO_READING).then_some(temp),
        flags: data[11],
        tx_power_dbm: data[12] as i8,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TelemetryPayload {
        TelemetryPayload {
            transport_id: TRANSPORT_ID,
            uid_hint: *b"W-0",
            adv_seq: 0x1234,
            battery_mv: 3712,
            temp_c_x100: Some(-1250),
            flags: FLAG_EMERGENCY | 0b1010_0000,
            tx_power_dbm: -4,
        }
    }

    #[test]
    fn test_wire_layout_offsets() {
        let bytes = encode(&sample());

        assert_eq!(&bytes[0..2], &[0xFF, 0xFF]);
        assert_eq!(&bytes[2..5], b"W-0");
        assert_eq!(&bytes[5..7], &[0x12, 0x34]);
        assert_eq!(&bytes[7..9], &3712u16.to_be_bytes());
        assert_eq!(&bytes[9..11], &(-1250i16).to_be_bytes());
        assert_eq!(bytes[11], 0b1010_0001);
        assert_eq!(bytes[12] as i8, -4);
        assert_eq!(bytes[13], 0);
    }

    #[test]
    fn test_round_trip_preserves_all_fields() {
        let payload = sample();
        assert_eq!(decode(&encode(&payload)).unwrap(), payload);

        let no_temp = TelemetryPayload { temp_c_x100: None, battery_mv: 0, ..payload };
        let decoded = decode(&encode(&no_temp)).unwrap();
        assert_eq!(decoded, no_temp);
        assert_eq!(decoded.temp_c(), None);
        assert_eq!(decoded.battery_v(), None);
    }

    #[test]
    fn test_temperature_sentinel_decodes_as_no_reading() {
        let mut bytes = encode(&sample());
        bytes[9..11].copy_from_slice(&TEMP_NO_READING.to_be_bytes());
        assert_eq!(decode(&bytes).unwrap().temp_c_x100, None);
    }

    #[test]
    fn test_short_payload_is_malformed() {
        let result = decode(&[0u8; 13]);
        assert_eq!(
            result,
            Err(CodecError::MalformedPayload { required: 14, available: 13 })
        );
    }

    #[test]
    fn test_reserved_byte_ignored_and_trailing_bytes_allowed() {
        let mut bytes = encode(&sample()).to_vec();
        bytes[13] = 0xAB;
        bytes.extend_from_slice(&[1, 2, 3]);
        assert_eq!(decode(&bytes).unwrap(), sample());
    }

    #[test]
    fn test_readings_saturate_instead_of_wrapping() {
        let hot = TelemetryPayload::from_readings("W-01", 1, Some(80.0), Some(500.0), false, 0);
        assert_eq!(hot.battery_mv, u16::MAX);
        assert_eq!(hot.temp_c_x100, Some(TEMP_NO_READING - 1));

        let cold = TelemetryPayload::from_readings("W-01", 1, Some(-1.0), Some(-400.0), false, 0);
        assert_eq!(cold.battery_mv, 0);
        assert_eq!(cold.temp_c_x100, Some(i16::MIN));

        let nan = TelemetryPayload::from_readings("W-01", 1, Some(f32::NAN), Some(f32::NAN), false, 0);
        assert_eq!(nan.battery_mv, 0);
        assert_eq!(nan.temp_c_x100, None);
    }

    #[test]
    fn test_readings_convert_to_wire_units() {
        let payload = TelemetryPayload::from_readings("W-42", 7, Some(3.7), Some(21.37), true, 3);
        assert_eq!(payload.uid_hint, *b"W-4");
        assert_eq!(payload.battery_mv, 3700);
        assert_eq!(payload.temp_c_x100, Some(2137));
        assert!(payload.emergency());
        assert_eq!(payload.battery_v(), Some(3.7));
    }

    #[test]
    fn test_uid_hint_pads_short_uids() {
        assert_eq!(uid_hint("W"), [b'W', 0, 0]);
    }
}
