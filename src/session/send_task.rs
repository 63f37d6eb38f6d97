//! Outbound audio: capture → encode → engine, on its own thread

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::audio::AudioDevice;
use crate::codec::OpusEncoder;
use crate::error::SessionError;
use crate::peer::AudioSink;

/// Counters shared by every send task of a process
#[derive(Debug, Default)]
pub struct SendTaskStats {
    frames_sent: AtomicU64,
    frames_muted: AtomicU64,
    capture_errors: AtomicU64,
    encode_errors: AtomicU64,
    sink_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SendTaskSnapshot {
    pub frames_sent: u64,
    pub frames_muted: u64,
    pub capture_errors: u64,
    pub encode_errors: u64,
    pub sink_errors: u64,
}

impl SendTaskStats {
    pub fn snapshot(&self) -> SendTaskSnapshot {
        SendTaskSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_muted: self.frames_muted.load(Ordering::Relaxed),
            capture_errors: self.capture_errors.load(Ordering::Relaxed),
            encode_errors: self.encode_errors.load(Ordering::Relaxed),
            sink_errors: self.sink_errors.load(Ordering::Relaxed),
        }
    }
}

/// Handle to the running send loop.
///
/// The encoder moves into the thread and comes back on [`stop`](Self::stop).
pub struct AudioSendTask {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<OpusEncoder>>,
}

impl AudioSendTask {
    pub fn spawn(
        device: Arc<dyn AudioDevice>,
        encoder: OpusEncoder,
        sink: Box<dyn AudioSink>,
        interval: Duration,
        muted: Arc<AtomicBool>,
        stats: Arc<SendTaskStats>,
    ) -> Result<Self, SessionError> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let handle = thread::Builder::new()
            .name("audio-publisher".to_string())
            .spawn(move || send_loop(device, encoder, sink, interval, flag, muted, stats))
            .map_err(|e| SessionError::Media(format!("failed to spawn send task: {}", e)))?;

        tracing::info!(interval_ms = interval.as_millis() as u64, "Audio send task started");

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    /// Stop and join. Returns the encoder unless the thread panicked.
    pub fn stop(&mut self) -> Option<OpusEncoder> {
        let handle = self.handle.take()?;
        self.running.store(false, Ordering::Release);

        match handle.join() {
            Ok(encoder) => {
                tracing::info!("Audio send task stopped");
                Some(encoder)
            }
            Err(_) => {
                tracing::error!("Audio send task panicked; encoder lost");
                None
            }
        }
    }

    /// Clear the running flag without joining.
    ///
    /// Used when the process restarts: a capture blocked in hardware must
    /// not hold the restart up. The thread exits after its current tick
    /// and the encoder goes with it.
    pub fn detach(&mut self) {
        if self.handle.take().is_some() {
            self.running.store(false, Ordering::Release);
            tracing::info!("Audio send task detached");
        }
    }
}

impl Drop for AudioSendTask {
    fn drop(&mut self) {
        self.stop();
    }
}

fn send_loop(
    device: Arc<dyn AudioDevice>,
    mut encoder: OpusEncoder,
    sink: Box<dyn AudioSink>,
    interval: Duration,
    running: Arc<AtomicBool>,
    muted: Arc<AtomicBool>,
    stats: Arc<SendTaskStats>,
) -> OpusEncoder {
    let mut deadline = Instant::now();

    while running.load(Ordering::Acquire) {
        match device.capture() {
            // Muted frames are still captured so the device stays drained
            Ok(_) if muted.load(Ordering::Relaxed) => {
                stats.frames_muted.fetch_add(1, Ordering::Relaxed);
            }
            Ok(frame) => match encoder.encode(&frame) {
                Ok(packet) => match sink.send_audio(packet) {
                    Ok(()) => {
                        stats.frames_sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        stats.sink_errors.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!("Failed to send audio frame: {}", e);
                    }
                },
                Err(e) => {
                    stats.encode_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Encoding failed: {}", e);
                }
            },
            Err(e) => {
                stats.capture_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Capture failed, skipping tick: {}", e);
            }
        }

        deadline += interval;
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        } else {
            // Capture took longer than a tick; don't try to catch up
            deadline = now;
        }
    }

    encoder
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioFormat, AudioFrame};
    use crate::codec::CompressedFrame;
    use crate::config::CodecSettings;
    use crate::error::DeviceError;
    use parking_lot::Mutex;

    struct FlakyDevice {
        calls: AtomicU64,
    }

    impl AudioDevice for FlakyDevice {
        fn format(&self) -> AudioFormat {
            AudioFormat {
                sample_rate: 16_000,
                frame_size: 320,
            }
        }

        fn capture(&self) -> Result<AudioFrame, DeviceError> {
            // Every third capture fails
            if self.calls.fetch_add(1, Ordering::Relaxed) % 3 == 2 {
                return Err(DeviceError::Capture("glitch".into()));
            }
            Ok(AudioFrame::silence(320))
        }

        fn playback(&self, _frame: &AudioFrame) -> Result<(), DeviceError> {
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct VecSink(Arc<Mutex<Vec<CompressedFrame>>>);

    impl AudioSink for VecSink {
        fn send_audio(&self, frame: CompressedFrame) -> Result<(), SessionError> {
            self.0.lock().push(frame);
            Ok(())
        }
    }

    fn encoder() -> OpusEncoder {
        OpusEncoder::new(&CodecSettings::voice(), 16_000, 320).unwrap()
    }

    #[test]
    fn test_capture_errors_skip_tick() {
        let device = Arc::new(FlakyDevice {
            calls: AtomicU64::new(0),
        });
        let sink = VecSink::default();
        let stats = Arc::new(SendTaskStats::default());

        let mut task = AudioSendTask::spawn(
            device,
            encoder(),
            Box::new(sink.clone()),
            Duration::from_millis(2),
            Arc::new(AtomicBool::new(false)),
            stats.clone(),
        )
        .unwrap();
        thread::sleep(Duration::from_millis(100));
        let encoder = task.stop();

        assert!(encoder.is_some());
        assert!(!task.is_active());
        let snapshot = stats.snapshot();
        assert!(snapshot.capture_errors > 0);
        assert!(snapshot.frames_sent > 0);
        assert_eq!(snapshot.frames_sent as usize, sink.0.lock().len());
    }

    struct StuckDevice;

    impl AudioDevice for StuckDevice {
        fn format(&self) -> AudioFormat {
            AudioFormat {
                sample_rate: 16_000,
                frame_size: 320,
            }
        }

        fn capture(&self) -> Result<AudioFrame, DeviceError> {
            thread::sleep(Duration::from_secs(2));
            Ok(AudioFrame::silence(320))
        }

        fn playback(&self, _frame: &AudioFrame) -> Result<(), DeviceError> {
            Ok(())
        }
    }

    #[test]
    fn test_detach_does_not_wait_for_capture() {
        let mut task = AudioSendTask::spawn(
            Arc::new(StuckDevice),
            encoder(),
            Box::new(VecSink::default()),
            Duration::from_millis(2),
            Arc::new(AtomicBool::new(false)),
            Arc::new(SendTaskStats::default()),
        )
        .unwrap();
        thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        task.detach();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(!task.is_active());
        // Nothing left to join
        assert!(task.stop().is_none());
    }

    #[test]
    fn test_muted_sends_nothing() {
        let device = Arc::new(FlakyDevice {
            calls: AtomicU64::new(0),
        });
        let sink = VecSink::default();
        let stats = Arc::new(SendTaskStats::default());

        let mut task = AudioSendTask::spawn(
            device,
            encoder(),
            Box::new(sink.clone()),
            Duration::from_millis(2),
            Arc::new(AtomicBool::new(true)),
            stats.clone(),
        )
        .unwrap();
        thread::sleep(Duration::from_millis(50));
        task.stop();

        assert!(sink.0.lock().is_empty());
        assert!(stats.snapshot().frames_muted > 0);
        // A second stop is a no-op
        assert!(task.stop().is_none());
    }
}
