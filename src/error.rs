//! Error types for the mixer

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Audio sink errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Sink used before configure()")]
    NotConfigured,

    #[error("Period of {period} frames exceeds the {max} frame limit")]
    PeriodTooLarge { period: usize, max: usize },

    #[error("Buffer length {0} is not a whole number of frames")]
    PartialFrame(usize),

    #[error("Write stalled for {0} ms")]
    WriteStalled(u64),

    #[error("Audio device failed after recovery attempt: {0}")]
    Fatal(String),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Listen failed: {0}")]
    ListenFailed(String),

    #[error("Accept failed: {0}")]
    AcceptFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Connection closed by peer")]
    Closed,
}

/// Wire protocol errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Short header: {0} bytes")]
    ShortHeader(usize),

    #[error("Payload of {0} bytes is not a whole number of samples")]
    OddPayload(usize),

    #[error("Server ended the stream")]
    EndOfStream,
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
