//! Producer side of the mixer protocol

use std::f32::consts::TAU;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};

use crate::error::{NetworkError, ProtocolError};
use crate::protocol::{encode_samples, ChunkHeader, ACK_CONTINUE, ACK_END};

/// A client streaming one sound to the mixer
pub struct MixerClient<S: Read + Write = TcpStream> {
    stream: S,
    /// Chunks sent so far; the next header carries `sent + 1`
    sent: i32,
    wire: Vec<u8>,
}

impl MixerClient<TcpStream> {
    pub fn connect(addr: SocketAddr) -> Result<Self, NetworkError> {
        let stream = TcpStream::connect(addr)
            .map_err(|e| NetworkError::ConnectionFailed(format!("{}: {}", addr, e)))?;
        let _ = stream.set_nodelay(true);
        Ok(Self::new(stream))
    }

    /// Send end-of-stream and close the socket
    pub fn finish(mut self) -> Result<(), NetworkError> {
        let result = self.end_stream();
        let _ = self.stream.shutdown(Shutdown::Both);
        result
    }
}

impl<S: Read + Write> MixerClient<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            sent: 0,
            wire: Vec::new(),
        }
    }

    pub fn chunks_sent(&self) -> i32 {
        self.sent
    }

    /// Send one period and wait for the server's acknowledgment.
    /// `samples` must be exactly one server period.
    pub fn send_chunk(&mut self, gain: f32, samples: &[i16]) -> Result<(), NetworkError> {
        let header = ChunkHeader::new(self.sent.saturating_add(1), gain);

        self.wire.clear();
        self.wire.extend_from_slice(&header.encode());
        encode_samples(samples, &mut self.wire);
        self.stream
            .write_all(&self.wire)
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
        self.sent = header.count;

        match self.read_ack()? {
            Some(ACK_CONTINUE) => Ok(()),
            Some(_) => Err(NetworkError::ReceiveFailed(
                ProtocolError::EndOfStream.to_string(),
            )),
            None => Err(NetworkError::Closed),
        }
    }

    /// Tell the server the stream is over and wait for it to let go
    pub fn end_stream(&mut self) -> Result<(), NetworkError> {
        self.stream
            .write_all(&ChunkHeader::end_of_stream().encode())
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;

        // The server acks with ACK_END before closing, but it may also just close
        match self.read_ack() {
            Ok(Some(ACK_END)) | Ok(None) => Ok(()),
            Ok(Some(other)) => Err(NetworkError::ReceiveFailed(format!(
                "unexpected ack {:#04x}",
                other
            ))),
            Err(NetworkError::ReceiveFailed(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn read_ack(&mut self) -> Result<Option<u8>, NetworkError> {
        let mut ack = [0u8; 1];
        loop {
            match self.stream.read(&mut ack) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(ack[0])),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(NetworkError::ReceiveFailed(e.to_string())),
            }
        }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

/// Split interleaved samples into periods, zero-padding the last one
pub fn chunk_samples(samples: &[i16], period_samples: usize) -> Vec<Vec<i16>> {
    samples
        .chunks(period_samples.max(1))
        .map(|chunk| {
            let mut period = chunk.to_vec();
            period.resize(period_samples.max(1), 0);
            period
        })
        .collect()
}

/// Mono sine tone at `amplitude` (0.0..=1.0) lasting `frames` frames
pub fn sine_tone(frequency: f32, sample_rate: u32, frames: usize, amplitude: f32) -> Vec<i16> {
    let amplitude = amplitude.clamp(0.0, 1.0) * i16::MAX as f32;
    (0..frames)
        .map(|n| {
            let phase = TAU * frequency * n as f32 / sample_rate as f32;
            (phase.sin() * amplitude) as i16
        })
        .collect()
}
