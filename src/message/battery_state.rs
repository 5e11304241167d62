use super::FieldReader;
use crate::error::DecodeError;
use crate::frame::RawFrame;
use serde::Serialize;

/// Command byte of a battery state frame
pub(crate) const COMMAND: u8 = 0x03;

/// The overall reported state of the battery
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatteryState {
    /// The battery voltage in V
    pub voltage: f32,
    /// The current through the battery in A, negative while discharging
    pub current: f32,
    /// First temperature probe in °C
    pub temp1: f32,
    /// Second temperature probe in °C
    pub temp2: f32,
    /// The remaining charge, in the coulometer's raw units
    pub charge: i16,
    /// The charge reading when full, in the same units
    pub full: i16,
    /// Whether the charge MOSFET is closed
    pub charge_on: bool,
    /// Whether the discharge MOSFET is closed
    pub discharge_on: bool,
}

impl BatteryState {
    /// Voltages and currents are centi-units, temperatures are deci-Kelvin.
    pub(crate) fn decode(frame: &RawFrame) -> Result<Self, DecodeError> {
        let reader = FieldReader::new(frame);
        let status = reader.byte(24)?;
        Ok(Self {
            voltage: f32::from(reader.i16_be(4)?) / 100.0,
            current: f32::from(reader.i16_be(6)?) / 100.0,
            temp1: f32::from(reader.i16_be(27)?) / 10.0 - 273.15,
            temp2: f32::from(reader.i16_be(29)?) / 10.0 - 273.15,
            charge: reader.i16_be(8)?,
            full: reader.i16_be(10)?,
            charge_on: status & 1 != 0,
            discharge_on: status & 2 != 0,
        })
    }
}

#[cfg(test)]
fn battery_frame() -> Vec<u8> {
    // 34 byte frame: fields at their fixed offsets, zero padding elsewhere
    let mut bytes = vec![0u8; 34];
    bytes[0] = 0xdd;
    bytes[1] = COMMAND;
    bytes[4..6].copy_from_slice(&5320i16.to_be_bytes()); // 53.20 V
    bytes[6..8].copy_from_slice(&(-200i16).to_be_bytes()); // -2.00 A
    bytes[8..10].copy_from_slice(&80i16.to_be_bytes());
    bytes[10..12].copy_from_slice(&100i16.to_be_bytes());
    bytes[24] = 0b0000_0001; // charging, not discharging
    bytes[27..29].copy_from_slice(&2942i16.to_be_bytes()); // 21.05 °C
    bytes[29..31].copy_from_slice(&2731i16.to_be_bytes()); // -0.05 °C
    bytes[33] = 0x77;
    bytes
}

#[test]
fn test_decode_battery_state() {
    let frame = super::test_frame(&battery_frame());
    let state = BatteryState::decode(&frame).unwrap();
    assert_eq!(state.voltage, 53.20);
    assert_eq!(state.current, -2.00);
    assert_eq!(state.charge, 80);
    assert_eq!(state.full, 100);
    assert!((state.temp1 - 21.05).abs() < 0.01);
    assert!((state.temp2 - (-0.05)).abs() < 0.01);
}

#[test]
fn test_decode_status_bits() {
    let mut bytes = battery_frame();
    bytes[24] = 0b0000_0011;
    let state = BatteryState::decode(&super::test_frame(&bytes)).unwrap();
    assert!(state.charge_on);
    assert!(state.discharge_on);

    bytes[24] = 0b0000_0010;
    let state = BatteryState::decode(&super::test_frame(&bytes)).unwrap();
    assert!(!state.charge_on);
    assert!(state.discharge_on);
}

#[test]
fn test_decode_truncated_battery_frame() {
    // Long enough to frame, too short for the temperature fields
    let frame = super::test_frame(&[0xdd, COMMAND, 0x00, 0x00, 0x14, 0xc8, 0x00, 0x77]);
    let err = BatteryState::decode(&frame).unwrap_err();
    assert!(matches!(err, DecodeError::Truncated { command: 0x03, .. }));
}
