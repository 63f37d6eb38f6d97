//! Audio frames and the capture sample queue
//!
//! The cpal input callback pushes variable-sized chunks into a bounded
//! queue; the capturing thread blocks on it and slices fixed-size frames
//! out of the chunks.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// One fixed-duration block of mono PCM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Mono 16-bit samples
    pub samples: Vec<i16>,
    /// Capture timestamp in microseconds since the stream started
    pub timestamp: u64,
    /// Frame sequence number
    pub sequence: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, timestamp: u64, sequence: u32) -> Self {
        Self {
            samples,
            timestamp,
            sequence,
        }
    }

    /// A frame of digital silence
    pub fn silence(frame_size: usize) -> Self {
        Self::new(vec![0; frame_size], 0, 0)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Get frame duration in microseconds
    pub fn duration_us(&self, sample_rate: u32) -> u64 {
        (self.samples.len() as u64 * 1_000_000) / sample_rate as u64
    }

    /// Little-endian byte view of the samples
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }
}

/// Why a blocking pop returned without samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopTimeout {
    /// Nothing arrived within the poll window
    Empty,
    /// All producers are gone
    Disconnected,
}

/// Bounded queue of PCM chunks between a realtime callback and a reader
pub struct SampleQueue {
    tx: Sender<Vec<i16>>,
    rx: Receiver<Vec<i16>>,
    overflow_count: AtomicUsize,
}

impl SampleQueue {
    /// Create a queue holding at most `capacity` chunks
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            overflow_count: AtomicUsize::new(0),
        }
    }

    /// Push a chunk without blocking.
    /// Returns false and drops the chunk if the queue is full.
    pub fn push(&self, chunk: Vec<i16>) -> bool {
        match self.tx.try_send(chunk) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Wait up to `timeout` for the next chunk
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Vec<i16>, PopTimeout> {
        match self.rx.recv_timeout(timeout) {
            Ok(chunk) => Ok(chunk),
            Err(RecvTimeoutError::Timeout) => Err(PopTimeout::Empty),
            Err(RecvTimeoutError::Disconnected) => Err(PopTimeout::Disconnected),
        }
    }

    /// Drop everything queued. Returns the number of chunks discarded.
    pub fn clear(&self) -> usize {
        self.rx.try_iter().count()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Get overflow count
    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }
}

/// Slices a stream of chunks into fixed-size frames
pub struct FrameAssembler {
    frame_size: usize,
    pending: Vec<i16>,
    sequence: u32,
    samples_emitted: u64,
    sample_rate: u32,
}

impl FrameAssembler {
    pub fn new(sample_rate: u32, frame_size: usize) -> Self {
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size * 2),
            sequence: 0,
            samples_emitted: 0,
            sample_rate,
        }
    }

    /// Append captured samples
    pub fn extend(&mut self, chunk: &[i16]) {
        self.pending.extend_from_slice(chunk);
    }

    /// Take one complete frame if enough samples are buffered
    pub fn next_frame(&mut self) -> Option<AudioFrame> {
        if self.pending.len() < self.frame_size {
            return None;
        }
        let samples: Vec<i16> = self.pending.drain(..self.frame_size).collect();
        let timestamp = self.samples_emitted * 1_000_000 / self.sample_rate as u64;
        let frame = AudioFrame::new(samples, timestamp, self.sequence);
        self.sequence = self.sequence.wrapping_add(1);
        self.samples_emitted += self.frame_size as u64;
        Some(frame)
    }

    /// Discard buffered samples without resetting the sequence
    pub fn discard(&mut self) {
        self.pending.clear();
    }

    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}
