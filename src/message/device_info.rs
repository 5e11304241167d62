use super::FieldReader;
use crate::error::DecodeError;
use crate::frame::RawFrame;
use serde::Serialize;

/// Command byte of a device info frame
pub(crate) const COMMAND: u8 = 0x05;

/// Identity record reported by the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Device name, with the four framing/footer bytes on either side
    /// trimmed off
    pub name: String,
}

impl DeviceInfo {
    pub(crate) fn decode(frame: &RawFrame) -> Result<Self, DecodeError> {
        let reader = FieldReader::new(frame);
        let end = reader.len().saturating_sub(4);
        let name_bytes: &[u8] = if end > 4 { reader.slice(4, end)? } else { &[] };
        Ok(Self {
            name: String::from_utf8_lossy(name_bytes).into_owned(),
        })
    }
}

#[test]
fn test_decode_device_info() {
    let mut bytes = vec![0xdd, COMMAND, 0x00, 0x08];
    bytes.extend_from_slice(b"ULT-1234");
    bytes.extend_from_slice(&[0x00, 0x00, 0x00, 0x77]);

    let info = DeviceInfo::decode(&super::test_frame(&bytes)).unwrap();
    assert_eq!(info.name, "ULT-1234");
}

#[test]
fn test_decode_device_info_short_payload() {
    // No room for a name between the header and footer regions
    let frame = super::test_frame(&[0xdd, COMMAND, 0x00, 0x00, 0x00, 0x00, 0x77]);
    let info = DeviceInfo::decode(&frame).unwrap();
    assert_eq!(info.name, "");
}
