use bytes::{Buf, BytesMut};

use dockwatch_types::{Channel, Frame};

/// Size of the frame header: selector, 3 reserved bytes, big-endian length
pub const HEADER_LEN: usize = 8;

/// Default upper bound for a single frame payload (1 MiB)
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1_048_576;

/// Stream-level framing failure. The stream cannot be resynchronized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    #[error("frame declares {declared} payload bytes, limit is {max}")]
    FrameTooLarge { declared: usize, max: usize },
}

/// Incremental decoder for the runtime's multiplexed log stream.
///
/// Bytes are pushed as they arrive, in any chunking; complete frames are
/// pulled with [`FrameDemuxer::next_frame`]. A frame is only consumed once its
/// header and full payload are buffered, so the buffer never holds more than
/// one partial frame of at most `HEADER_LEN + max_frame_bytes` bytes past the
/// last pushed chunk.
pub struct FrameDemuxer {
    buffer: BytesMut,
    max_frame_bytes: usize,
}

impl FrameDemuxer {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            max_frame_bytes,
        }
    }

    /// Append a chunk of raw bytes
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Decode the next complete frame, if one is buffered
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FramingError> {
        if self.buffer.len() < HEADER_LEN {
            return Ok(None);
        }

        let declared = u32::from_be_bytes([
            self.buffer[4],
            self.buffer[5],
            self.buffer[6],
            self.buffer[7],
        ]) as usize;

        if declared > self.max_frame_bytes {
            return Err(FramingError::FrameTooLarge {
                declared,
                max: self.max_frame_bytes,
            });
        }

        if self.buffer.len() < HEADER_LEN + declared {
            return Ok(None);
        }

        let channel = Channel::from_selector(self.buffer[0]);
        self.buffer.advance(HEADER_LEN);
        let payload = self.buffer.split_to(declared).freeze();

        Ok(Some(Frame { channel, payload }))
    }

    /// Push a chunk and drain every frame it completes
    pub fn decode(&mut self, chunk: &[u8]) -> Result<Vec<Frame>, FramingError> {
        self.push(chunk);
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Bytes buffered but not yet decoded
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for FrameDemuxer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

/// Encode a frame in the multiplexed format
pub fn encode_frame(selector: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.push(selector);
    out.extend_from_slice(&[0, 0, 0]);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}
