//! The command set understood by the BMS.
//!
//! Each command is a verbatim byte sequence captured from the vendor app's
//! traffic; the device accepts them as-is, so they are reproduced as-is.

/// A verbatim message to send which closes the discharge MOSFET
const DISCHARGE_ON: [u8; 9] = [0xdd, 0x5a, 0xe1, 0x02, 0x00, 0x00, 0xff, 0x1d, 0x77];
/// A verbatim message to send which opens the discharge MOSFET
const DISCHARGE_OFF: [u8; 9] = [0xdd, 0x5a, 0xe1, 0x02, 0x00, 0x02, 0xff, 0x1b, 0x77];
/// A verbatim message to send which closes the charge MOSFET.
///
/// The captured table carries the same bytes for charge-on and discharge-on.
/// Kept verbatim until confirmed against vendor documentation.
const CHARGE_ON: [u8; 9] = DISCHARGE_ON;
/// A verbatim message to send which opens the charge MOSFET
const CHARGE_OFF: [u8; 9] = [0xdd, 0x5a, 0xe1, 0x02, 0x00, 0x01, 0xff, 0x1c, 0x77];
/// A verbatim message to send which requests the battery state
const REQUEST_READ: [u8; 7] = [0xdd, 0xa5, 0x03, 0x00, 0xff, 0xfd, 0x77];
/// A verbatim message to send which requests the per-cell voltages
const REQUEST_CELL_VOLTAGE: [u8; 7] = [0xdd, 0xa5, 0x04, 0x00, 0xff, 0xfc, 0x77];
/// A verbatim message to send which requests the device name
const REQUEST_INFO: [u8; 7] = [0xdd, 0xa5, 0x05, 0x00, 0xff, 0xfb, 0x77];

/// Commands that can be written to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    DischargeOn,
    DischargeOff,
    ChargeOn,
    ChargeOff,
    RequestRead,
    RequestCellVoltage,
    RequestInfo,
}

impl Command {
    /// The wire bytes for this command. Pure table lookup, same bytes on
    /// every call.
    pub const fn bytes(self) -> &'static [u8] {
        match self {
            Command::DischargeOn => &DISCHARGE_ON,
            Command::DischargeOff => &DISCHARGE_OFF,
            Command::ChargeOn => &CHARGE_ON,
            Command::ChargeOff => &CHARGE_OFF,
            Command::RequestRead => &REQUEST_READ,
            Command::RequestCellVoltage => &REQUEST_CELL_VOLTAGE,
            Command::RequestInfo => &REQUEST_INFO,
        }
    }
}

#[test]
fn test_request_info_bytes_are_stable() {
    let expected = [0xdd, 0xa5, 0x05, 0x00, 0xff, 0xfb, 0x77];
    assert_eq!(Command::RequestInfo.bytes(), &expected);
    assert_eq!(Command::RequestInfo.bytes(), Command::RequestInfo.bytes());
}

#[test]
fn test_charge_on_matches_discharge_on() {
    // Pins the captured-table quirk so an accidental "fix" shows up.
    assert_eq!(Command::ChargeOn.bytes(), Command::DischargeOn.bytes());
}

#[test]
fn test_all_commands_are_delimited() {
    use crate::frame::{FRAME_END, FRAME_START};

    let all = [
        Command::DischargeOn,
        Command::DischargeOff,
        Command::ChargeOn,
        Command::ChargeOff,
        Command::RequestRead,
        Command::RequestCellVoltage,
        Command::RequestInfo,
    ];
    for command in all {
        let bytes = command.bytes();
        assert_eq!(bytes[0], FRAME_START);
        assert_eq!(bytes[bytes.len() - 1], FRAME_END);
    }
}
