//! Opus encoder wrapper
//!
//! One instance per process. Settings are applied once at construction;
//! Opus keeps its own adaptive state across calls.

use bytes::Bytes;
use opus::{Application, Channels, Encoder};

use crate::audio::AudioFrame;
use crate::codec::CompressedFrame;
use crate::config::{CodecSettings, OpusSignal};
use crate::constants::MAX_ENCODED_FRAME_BYTES;
use crate::error::CodecError;

/// Mono Opus encoder for fixed-size frames
pub struct OpusEncoder {
    encoder: Encoder,
    settings: CodecSettings,
    sample_rate: u32,
    frame_size: usize,
    /// Encoding buffer (reused to avoid allocations)
    encode_buffer: Vec<u8>,
    /// Frame counter for statistics
    frames_encoded: u64,
    /// Total bytes produced
    bytes_produced: u64,
}

impl OpusEncoder {
    /// Create a new Opus encoder with the specified configuration
    pub fn new(
        settings: &CodecSettings,
        sample_rate: u32,
        frame_size: usize,
    ) -> Result<Self, CodecError> {
        let mut encoder = Encoder::new(sample_rate, Channels::Mono, Application::Voip)
            .map_err(|e| CodecError::EncoderInit(e.to_string()))?;

        Self::configure_encoder(&mut encoder, settings)?;

        tracing::debug!(
            sample_rate,
            frame_size,
            bitrate = settings.bitrate,
            complexity = settings.complexity,
            "Opus encoder initialized"
        );

        Ok(Self {
            encoder,
            settings: settings.clone(),
            sample_rate,
            frame_size,
            encode_buffer: vec![0u8; MAX_ENCODED_FRAME_BYTES],
            frames_encoded: 0,
            bytes_produced: 0,
        })
    }

    /// Configure the encoder with all settings
    fn configure_encoder(encoder: &mut Encoder, settings: &CodecSettings) -> Result<(), CodecError> {
        encoder
            .set_bitrate(opus::Bitrate::Bits(settings.bitrate as i32))
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set bitrate: {}", e)))?;

        // Complexity (0-10)
        encoder
            .set_complexity(settings.complexity as i32)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set complexity: {}", e)))?;

        let signal = match settings.signal {
            OpusSignal::Auto => opus::Signal::Auto,
            OpusSignal::Voice => opus::Signal::Voice,
            OpusSignal::Music => opus::Signal::Music,
        };
        encoder
            .set_signal(signal)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set signal type: {}", e)))?;

        Ok(())
    }

    /// Encode exactly one frame
    pub fn encode(&mut self, frame: &AudioFrame) -> Result<CompressedFrame, CodecError> {
        if frame.samples.len() != self.frame_size {
            return Err(CodecError::InvalidFrameSize(frame.samples.len()));
        }

        let size = self
            .encoder
            .encode(&frame.samples, &mut self.encode_buffer)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;

        self.frames_encoded += 1;
        self.bytes_produced += size as u64;

        Ok(Bytes::copy_from_slice(&self.encode_buffer[..size]))
    }

    pub fn settings(&self) -> &CodecSettings {
        &self.settings
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Get expected frame size in samples
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Get statistics
    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
            average_frame_size: if self.frames_encoded > 0 {
                self.bytes_produced as f32 / self.frames_encoded as f32
            } else {
                0.0
            },
        }
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
    pub average_frame_size: f32,
}
