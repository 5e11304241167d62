//! The radio link boundary.
//!
//! The session drives the device purely through these traits: discovery and
//! connection mechanics belong to the transport, byte semantics to the
//! session. [`BleTransport`](crate::BleTransport) is the real implementation;
//! tests substitute their own.

use anyhow::Result;
use futures_util::Stream;

/// A short-range radio link to one device.
///
/// Calls are made in lifecycle order: [`scan_for`], then [`connect`], then
/// [`open_channels`]. Inbound chunk boundaries are arbitrary — reassembling
/// frames from them is the caller's job.
///
/// [`scan_for`]: Transport::scan_for
/// [`connect`]: Transport::connect
/// [`open_channels`]: Transport::open_channels
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Inbound data chunks, live once [`open_channels`](Transport::open_channels)
    /// succeeds. The stream ending means the device link is gone.
    type Data: Stream<Item = Result<Vec<u8>>> + Send + Unpin;

    /// The write half, live once [`open_channels`](Transport::open_channels)
    /// succeeds.
    type Writer: WriteChannel + Send;

    /// Scan until the device advertising `device_name` is discovered.
    /// Scanning stops when this returns.
    async fn scan_for(&mut self, device_name: &str) -> Result<()>;

    /// Connect to the device found by [`scan_for`](Transport::scan_for).
    async fn connect(&mut self) -> Result<()>;

    /// Discover the device's read and write channels and subscribe to
    /// inbound data. Fails with [`SetupError`](crate::SetupError) when either
    /// required channel is missing.
    async fn open_channels(&mut self) -> Result<(Self::Data, Self::Writer)>;
}

/// The write half of a transport.
#[allow(async_fn_in_trait)]
pub trait WriteChannel {
    async fn write(&mut self, bytes: &[u8]) -> Result<()>;
}
