//! Microphone capture through cpal
//!
//! The input stream lives on its own thread (cpal streams are not `Send`
//! on every host). Its callback downmixes to mono i16 and pushes chunks
//! into a [`SampleQueue`]; [`CpalCapture::read_frame`] blocks until one
//! full frame has been assembled.

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::{AudioFrame, FrameAssembler, PopTimeout, SampleQueue};
use crate::audio::device::{f32_to_i16, select_stream_config, Direction};
use crate::constants::CAPTURE_QUEUE_CAPACITY;
use crate::error::DeviceError;

/// How often a blocked reader re-checks for stream errors
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Audio capture from one input device
pub struct CpalCapture {
    /// Whether the stream thread should keep running
    running: Arc<AtomicBool>,

    /// When false the callback discards samples (half-duplex playback)
    enabled: Arc<AtomicBool>,

    queue: Arc<SampleQueue>,

    assembler: Mutex<FrameAssembler>,

    /// Stream thread handle
    thread_handle: Option<JoinHandle<()>>,

    /// Channel for stream errors
    error_rx: Receiver<DeviceError>,
}

impl CpalCapture {
    /// Open `device` and start capturing mono frames of `frame_size`
    /// samples at `sample_rate`
    pub fn open(
        device: cpal::Device,
        sample_rate: u32,
        frame_size: usize,
    ) -> Result<Self, DeviceError> {
        let config = select_stream_config(&device, Direction::Input, sample_rate)?;
        let channels = config.channels as usize;

        let running = Arc::new(AtomicBool::new(true));
        let enabled = Arc::new(AtomicBool::new(true));
        let queue = Arc::new(SampleQueue::new(CAPTURE_QUEUE_CAPACITY));
        let (error_tx, error_rx) = bounded::<DeviceError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), DeviceError>>(1);

        let thread_running = running.clone();
        let callback_enabled = enabled.clone();
        let callback_queue = queue.clone();
        let stream_config = config.clone();

        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let stream = device.build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !callback_enabled.load(Ordering::Relaxed) {
                            return;
                        }
                        let mono: Vec<i16> = data
                            .chunks(channels)
                            .map(|frame| f32_to_i16(frame.iter().sum::<f32>() / channels as f32))
                            .collect();
                        // Overflow is counted by the queue
                        let _ = callback_queue.push(mono);
                    },
                    move |err| {
                        let _ = error_tx.try_send(DeviceError::Capture(err.to_string()));
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(DeviceError::Stream(e.to_string())));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(DeviceError::Stream(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep thread alive while running
                while thread_running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                // Stream is dropped here, stopping capture
            })
            .map_err(|e| DeviceError::Stream(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|_| DeviceError::Stream("capture thread exited during startup".to_string()))??;

        tracing::debug!(
            sample_rate,
            frame_size,
            device_channels = config.channels,
            "Audio capture started"
        );

        Ok(Self {
            running,
            enabled,
            queue,
            assembler: Mutex::new(FrameAssembler::new(sample_rate, frame_size)),
            thread_handle: Some(handle),
            error_rx,
        })
    }

    /// Block until one full frame is available
    pub fn read_frame(&self) -> Result<AudioFrame, DeviceError> {
        let mut assembler = self.assembler.lock();
        loop {
            if let Some(frame) = assembler.next_frame() {
                return Ok(frame);
            }
            if let Ok(err) = self.error_rx.try_recv() {
                return Err(err);
            }
            if !self.running.load(Ordering::Relaxed) {
                return Err(DeviceError::Closed);
            }
            match self.queue.pop_timeout(POLL_INTERVAL) {
                Ok(chunk) => assembler.extend(&chunk),
                Err(PopTimeout::Empty) => continue,
                Err(PopTimeout::Disconnected) => return Err(DeviceError::Closed),
            }
        }
    }

    /// Stop delivering samples until [`resume`](Self::resume)
    pub fn suspend(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    /// Resume delivery, dropping anything captured before the suspension
    pub fn resume(&self) {
        if self.enabled.swap(true, Ordering::SeqCst) {
            return;
        }
        let dropped = self.queue.clear();
        self.assembler.lock().discard();
        if dropped > 0 {
            tracing::trace!(dropped, "Discarded stale capture chunks");
        }
    }

    /// Stop capturing audio
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            // Chunks dropped because the reader fell behind
            tracing::debug!(overflows = self.queue.overflow_count(), "Audio capture stopped");
        }
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
