//! Opus codec bridge
//!
//! Fixed-size PCM frames in, compressed packets out, and back. Exactly
//! one encoder and one decoder exist per process.

pub mod decoder;
pub mod encoder;

pub use decoder::OpusDecoder;
pub use encoder::OpusEncoder;

/// One compressed packet, bounded by
/// [`MAX_ENCODED_FRAME_BYTES`](crate::constants::MAX_ENCODED_FRAME_BYTES)
pub type CompressedFrame = bytes::Bytes;
