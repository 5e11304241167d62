//! Error types for the BMS wire protocol and session setup.

use thiserror::Error;

/// A frame reached a decoder but could not be interpreted.
///
/// These are local failures: the caller logs the offending frame, discards
/// it and carries on. They never terminate a session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The frame is shorter than the fixed field offsets of its command
    /// require.
    #[error("frame for command {command:#04x} too short: need {needed} bytes, have {len}")]
    Truncated {
        /// Command byte of the offending frame
        command: u8,
        /// Minimum frame length the failed read required
        needed: usize,
        /// Actual frame length
        len: usize,
    },

    /// No decoder is registered for this command byte.
    #[error("no decoder for command {0:#04x}")]
    UnsupportedCommand(u8),
}

/// The transport connected but did not expose the channels the session
/// needs. Fatal: without both a read and a write characteristic the device
/// cannot be operated, so the session must not continue half-initialized.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SetupError {
    #[error("read characteristic not found on BLE device {0}")]
    MissingReadChannel(String),

    #[error("write characteristic not found on BLE device {0}")]
    MissingWriteChannel(String),
}
