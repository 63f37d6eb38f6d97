//! Opus decoder wrapper

use opus::{Channels, Decoder};

use crate::audio::AudioFrame;
use crate::error::CodecError;

/// Mono Opus decoder
pub struct OpusDecoder {
    decoder: Decoder,
    sample_rate: u32,
    frame_size: usize,
    /// Decoding buffer (reused to avoid allocations)
    decode_buffer: Vec<i16>,
    /// Frames decoded
    frames_decoded: u64,
    /// Packets that produced no audio
    frames_empty: u64,
    /// Packets whose duration differs from the configured frame
    frames_rejected: u64,
    sequence: u32,
}

impl OpusDecoder {
    /// Create a new Opus decoder
    pub fn new(sample_rate: u32, frame_size: usize) -> Result<Self, CodecError> {
        if frame_size == 0 {
            return Err(CodecError::DecoderInit("frame size must be positive".to_string()));
        }
        let decoder = Decoder::new(sample_rate, Channels::Mono)
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;

        Ok(Self {
            decoder,
            sample_rate,
            frame_size,
            // Exactly one frame; longer packets fail to decode
            decode_buffer: vec![0i16; frame_size],
            frames_decoded: 0,
            frames_empty: 0,
            frames_rejected: 0,
            sequence: 0,
        })
    }

    /// Decode one packet.
    ///
    /// Returns `Ok(None)` when the packet yields no samples (an empty
    /// packet included); the caller must skip playback. Any other result
    /// is exactly `frame_size` samples: a packet of a different duration
    /// is an error.
    pub fn decode(&mut self, data: &[u8]) -> Result<Option<AudioFrame>, CodecError> {
        // An empty packet would make Opus synthesize concealment audio
        if data.is_empty() {
            self.frames_empty += 1;
            return Ok(None);
        }

        let samples = match self.decoder.decode(data, &mut self.decode_buffer, false) {
            Ok(samples) => samples,
            Err(e) => {
                self.frames_rejected += 1;
                return Err(CodecError::DecodingFailed(e.to_string()));
            }
        };

        if samples == 0 {
            self.frames_empty += 1;
            return Ok(None);
        }
        if samples != self.frame_size {
            self.frames_rejected += 1;
            return Err(CodecError::InvalidFrameSize(samples));
        }

        let frame = AudioFrame::new(self.decode_buffer.clone(), 0, self.sequence);
        self.sequence = self.sequence.wrapping_add(1);
        self.frames_decoded += 1;
        Ok(Some(frame))
    }

    /// Get sample rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Configured frame size in samples
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Get statistics
    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            frames_decoded: self.frames_decoded,
            frames_empty: self.frames_empty,
            frames_rejected: self.frames_rejected,
        }
    }
}

/// Decoder statistics
#[derive(Debug, Clone)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub frames_empty: u64,
    pub frames_rejected: u64,
}
