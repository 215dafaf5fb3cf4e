//! Wire protocol between producer clients and the mixer
//!
//! Each period the client sends a fixed 8-byte header followed by one
//! period of interleaved s16le samples; the server answers with a single
//! acknowledgment byte.
//!
//! ```text
//!  0               4               8
//! ┌───────────────┬───────────────┬──────────────────────────────┐
//! │ count: i32 LE │ gain: f32 LE  │ period × channels × i16 LE   │
//! └───────────────┴───────────────┴──────────────────────────────┘
//! ```
//!
//! A count of zero or below ends the stream and carries no payload.

use bytes::{Buf, BufMut};

use crate::error::ProtocolError;

/// Size of [`ChunkHeader`] on the wire
pub const HEADER_SIZE: usize = 8;

/// Acknowledgment: chunk received, send the next one
pub const ACK_CONTINUE: u8 = 0;

/// Acknowledgment: stream finished, connection is about to close
pub const ACK_END: u8 = 1;

/// Per-chunk header
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkHeader {
    /// Stream sequence counter; `<= 0` marks end of stream
    pub count: i32,
    /// Linear amplitude multiplier for this chunk
    pub gain: f32,
}

impl ChunkHeader {
    pub fn new(count: i32, gain: f32) -> Self {
        Self { count, gain }
    }

    /// Header that terminates a stream
    pub fn end_of_stream() -> Self {
        Self { count: -1, gain: 0.0 }
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.count <= 0
    }

    /// Position of the chunk in its stream, for a header that is not EOS
    pub fn position(&self) -> StreamPosition {
        match self.count {
            c if c <= 0 => StreamPosition::End,
            1 => StreamPosition::Start,
            _ => StreamPosition::Middle,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        let mut buf = &mut out[..];
        buf.put_i32_le(self.count);
        buf.put_f32_le(self.gain);
        out
    }

    pub fn decode(mut data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < HEADER_SIZE {
            return Err(ProtocolError::ShortHeader(data.len()));
        }
        let count = data.get_i32_le();
        let gain = data.get_f32_le();
        Ok(Self { count, gain })
    }
}

/// Where a buffer sits in its stream, which selects its edge window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamPosition {
    /// Slot inactive this cycle
    #[default]
    None,
    /// First buffer: fade in
    Start,
    /// Interior buffer: unity window
    Middle,
    /// Last buffer, or the one whose producer disappeared: fade out
    End,
}

impl StreamPosition {
    pub fn is_active(&self) -> bool {
        !matches!(self, StreamPosition::None)
    }
}

/// Decode little-endian samples into `out`, returning the sample count
pub fn decode_samples(mut data: &[u8], out: &mut [i16]) -> Result<usize, ProtocolError> {
    if data.len() % 2 != 0 {
        return Err(ProtocolError::OddPayload(data.len()));
    }
    let n = (data.len() / 2).min(out.len());
    for sample in &mut out[..n] {
        *sample = data.get_i16_le();
    }
    Ok(n)
}

/// Append little-endian samples to `out`
pub fn encode_samples(samples: &[i16], out: &mut Vec<u8>) {
    out.reserve(samples.len() * 2);
    for &sample in samples {
        out.put_i16_le(sample);
    }
}
