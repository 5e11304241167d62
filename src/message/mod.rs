//! Typed messages decoded from complete frames.
//!
//! The command byte (second byte of every frame) selects the decoder. Three
//! messages are understood: the overall battery state, the per-cell voltages
//! and the device info record. Everything else is reported as unsupported
//! and discarded by the caller.
//!
//! None of the decoders validate a checksum; the protocol carries nothing
//! beyond its delimiter bytes, so integrity rests on the transport.

mod battery_state;
mod cell_state;
mod device_info;

pub use battery_state::BatteryState;
pub use cell_state::CellState;
pub use device_info::DeviceInfo;

use crate::error::DecodeError;
use crate::frame::RawFrame;

/// Any message the device can send.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    BatteryState(BatteryState),
    CellState(CellState),
    DeviceInfo(DeviceInfo),
}

impl Message {
    /// Decode a complete frame into a typed message.
    ///
    /// A frame shorter than its command's fixed field offsets require yields
    /// [`DecodeError::Truncated`] rather than an out-of-bounds fault; a
    /// command byte with no decoder yields
    /// [`DecodeError::UnsupportedCommand`]. Neither failure disturbs any
    /// state: the offending frame is simply not a message.
    pub fn decode(frame: &RawFrame) -> Result<Self, DecodeError> {
        match frame.command() {
            battery_state::COMMAND => BatteryState::decode(frame).map(Message::BatteryState),
            cell_state::COMMAND => CellState::decode(frame).map(Message::CellState),
            device_info::COMMAND => DeviceInfo::decode(frame).map(Message::DeviceInfo),
            other => Err(DecodeError::UnsupportedCommand(other)),
        }
    }
}

/// Bounds-checked cursor over a frame's bytes.
///
/// All multi-byte fields on this wire are big-endian signed 16-bit. Reads
/// past the end of the frame yield [`DecodeError::Truncated`] carrying the
/// command byte and the offending lengths, so a short frame can never fault.
pub(crate) struct FieldReader<'a> {
    bytes: &'a [u8],
    command: u8,
}

impl<'a> FieldReader<'a> {
    pub fn new(frame: &'a RawFrame) -> Self {
        Self {
            bytes: frame.as_bytes(),
            command: frame.command(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn i16_be(&self, offset: usize) -> Result<i16, DecodeError> {
        match self.bytes.get(offset..offset + 2) {
            Some(bytes) => Ok(i16::from_be_bytes([bytes[0], bytes[1]])),
            None => Err(self.truncated(offset + 2)),
        }
    }

    pub fn byte(&self, offset: usize) -> Result<u8, DecodeError> {
        match self.bytes.get(offset) {
            Some(byte) => Ok(*byte),
            None => Err(self.truncated(offset + 1)),
        }
    }

    pub fn slice(&self, start: usize, end: usize) -> Result<&'a [u8], DecodeError> {
        match self.bytes.get(start..end) {
            Some(bytes) => Ok(bytes),
            None => Err(self.truncated(end)),
        }
    }

    pub fn truncated(&self, needed: usize) -> DecodeError {
        DecodeError::Truncated {
            command: self.command,
            needed,
            len: self.bytes.len(),
        }
    }
}

/// Build a frame from literal bytes by running them through the decoder.
#[cfg(test)]
pub(crate) fn test_frame(bytes: &[u8]) -> RawFrame {
    crate::frame::FrameDecoder::new()
        .feed(bytes)
        .expect("test bytes do not form a complete frame")
}

#[test]
fn test_decode_unsupported_command() {
    let frame = test_frame(&[0xdd, 0x09, 0x00, 0x00, 0x00, 0x77]);
    assert_eq!(
        Message::decode(&frame),
        Err(DecodeError::UnsupportedCommand(0x09))
    );
}

#[test]
fn test_decode_dispatches_on_command_byte() {
    let frame = test_frame(&[
        0xdd, 0x05, 0x00, 0x08, b'U', b'L', b'T', 0x00, 0x00, 0x00, 0x77,
    ]);
    let message = Message::decode(&frame).unwrap();
    assert!(matches!(message, Message::DeviceInfo(_)));
}
