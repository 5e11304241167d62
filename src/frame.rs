//! Delimiter-based framing of the BMS byte stream.
//!
//! The device batches its responses into notifications of arbitrary size, so
//! a single message may arrive split across several chunks. Chunks are
//! accumulated until the buffer looks like one complete frame: starts with
//! [`FRAME_START`], ends with [`FRAME_END`] and is longer than four bytes.

use tracing::{trace, warn};

/// Every frame begins with this byte.
pub const FRAME_START: u8 = 0xdd;
/// Every frame ends with this byte.
pub const FRAME_END: u8 = 0x77;

/// Shortest possible frame: start marker, command byte, length bytes and
/// footer region.
const MIN_FRAME_LEN: usize = 5;

/// One complete, delimiter-bounded message as read off the wire.
///
/// Guaranteed to start with [`FRAME_START`], end with [`FRAME_END`] and be at
/// least five bytes long. Frames are produced by
/// [`FrameDecoder::feed`] and consumed immediately by
/// [`Message::decode`](crate::Message::decode).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame(Vec<u8>);

impl RawFrame {
    /// The command byte, selecting which message this frame carries.
    pub fn command(&self) -> u8 {
        self.0[1]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Accumulates transport chunks and extracts complete frames.
///
/// The boundary test is deliberately the one the device was reverse
/// engineered against: the buffer is flushed as a single frame the moment its
/// first byte is the start marker and its *current last byte* is the end
/// marker. There is no interior scan, so trailing bytes delivered in the same
/// chunk as a frame end up inside that frame, and a stream whose chunks never
/// end on the end marker accumulates indefinitely. [`with_max_buffered`]
/// bounds the latter without changing which byte sequences form a frame.
///
/// [`with_max_buffered`]: FrameDecoder::with_max_buffered
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_buffered: Option<usize>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the accumulator at `limit` bytes. When an append leaves the
    /// buffer over the limit without closing a frame, the buffered bytes are
    /// dropped and accumulation restarts from empty.
    pub fn with_max_buffered(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_buffered: Some(limit),
        }
    }

    /// Append a chunk and extract a frame if one is now complete.
    ///
    /// At most one frame is emitted per call: extraction takes the entire
    /// buffer, so the accumulator is always empty immediately afterwards.
    /// Data that does not close a frame is kept for the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Option<RawFrame> {
        self.buffer.extend_from_slice(chunk);

        if self.buffer.len() >= MIN_FRAME_LEN
            && self.buffer[0] == FRAME_START
            && self.buffer[self.buffer.len() - 1] == FRAME_END
        {
            let frame = RawFrame(std::mem::take(&mut self.buffer));
            trace!("extracted frame {}", hex::encode(frame.as_bytes()));
            return Some(frame);
        }

        if let Some(limit) = self.max_buffered {
            if self.buffer.len() > limit {
                warn!(
                    "dropping {} buffered bytes: no frame within {} byte limit",
                    self.buffer.len(),
                    limit
                );
                self.buffer.clear();
            }
        }

        None
    }

    /// Number of bytes waiting for a frame to close.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[test]
fn test_feed_whole_frame() {
    let mut decoder = FrameDecoder::new();
    let bytes = [0xdd, 0xa5, 0x05, 0x00, 0xff, 0xfb, 0x77];
    let frame = decoder.feed(&bytes).expect("complete frame");
    assert_eq!(frame.as_bytes(), &bytes);
    assert_eq!(frame.command(), 0x05);
    assert_eq!(decoder.buffered(), 0);
}

#[test]
fn test_feed_chunked_frame() {
    let mut decoder = FrameDecoder::new();
    let bytes = [0xdd, 0xa5, 0x05, 0x00, 0xff, 0xfb, 0x77];
    assert!(decoder.feed(&bytes[..4]).is_none());
    assert_eq!(decoder.buffered(), 4);
    let frame = decoder.feed(&bytes[4..]).expect("complete frame");
    assert_eq!(frame.as_bytes(), &bytes);
    assert_eq!(decoder.buffered(), 0);
}

#[test]
fn test_feed_one_byte_at_a_time() {
    let mut decoder = FrameDecoder::new();
    let bytes = [0xdd, 0xa5, 0x05, 0x00, 0xff, 0xfb, 0x77];
    for byte in &bytes[..bytes.len() - 1] {
        assert!(decoder.feed(std::slice::from_ref(byte)).is_none());
    }
    let frame = decoder.feed(&bytes[bytes.len() - 1..]).expect("complete frame");
    assert_eq!(frame.as_bytes(), &bytes);
}

#[test]
fn test_short_frame_not_extracted() {
    // 0xdd .. 0x77 but only four bytes long
    let mut decoder = FrameDecoder::new();
    assert!(decoder.feed(&[0xdd, 0xa5, 0x05, 0x77]).is_none());
    assert_eq!(decoder.buffered(), 4);
}

#[test]
fn test_unframed_garbage_accumulates() {
    let mut decoder = FrameDecoder::new();
    assert!(decoder.feed(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]).is_none());
    assert_eq!(decoder.buffered(), 6);
}

#[test]
fn test_trailing_bytes_flush_with_the_frame() {
    // The last-byte test means a frame plus trailing bytes ending in 0x77
    // comes out as one oversized frame, not a frame plus a remainder.
    let mut decoder = FrameDecoder::new();
    let frame = decoder
        .feed(&[0xdd, 0xa5, 0x05, 0x00, 0xff, 0xfb, 0x77, 0xdd, 0xa5, 0x03, 0x00, 0xff, 0xfd, 0x77])
        .expect("complete frame");
    assert_eq!(frame.as_bytes().len(), 14);
    assert_eq!(decoder.buffered(), 0);
}

#[test]
fn test_max_buffered_drops_runaway_buffer() {
    let mut decoder = FrameDecoder::with_max_buffered(8);
    assert!(decoder.feed(&[0x00; 9]).is_none());
    assert_eq!(decoder.buffered(), 0);

    // still decodes a well formed frame afterwards
    let bytes = [0xdd, 0xa5, 0x05, 0x00, 0xff, 0xfb, 0x77];
    assert!(decoder.feed(&bytes).is_some());
}
