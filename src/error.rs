//! Error types for the voice appliance runtime

use thiserror::Error;

/// Audio device errors.
///
/// Capture and playback failures are transient: the send task skips the
/// tick and the inbound path drops the frame.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to open stream: {0}")]
    Stream(String),

    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("Playback failed: {0}")]
    Playback(String),

    #[error("Frame size mismatch: expected {expected} samples, got {actual}")]
    FrameSize { expected: usize, actual: usize },

    #[error("Device closed")]
    Closed,
}

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Encoder initialization failed: {0}")]
    EncoderInit(String),

    #[error("Decoder initialization failed: {0}")]
    DecoderInit(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Invalid frame size: {0}")]
    InvalidFrameSize(usize),
}

/// Signaling exchange errors. Always fatal for the connection attempt.
#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Response too large: more than {0} bytes")]
    TooLarge(usize),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Signaling worker exited without a result")]
    WorkerLost,
}

/// Peer-connection errors raised by the protocol engine boundary
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to create session: {0}")]
    Create(String),

    #[error("Failed to create offer: {0}")]
    Offer(String),

    #[error("Failed to apply remote description: {0}")]
    RemoteDescription(String),

    #[error("Data channel error: {0}")]
    DataChannel(String),

    #[error("Media error: {0}")]
    Media(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Session is closed")]
    Closed,
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
