//! Speaker playback through cpal
//!
//! [`CpalPlayback::play`] queues one frame for the output callback and
//! blocks until the callback has drained it, so a returned call means
//! the frame has been handed to the hardware.

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::device::{i16_to_f32, select_stream_config, Direction};
use crate::error::DeviceError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Samples waiting for the output callback
#[derive(Default)]
struct PlaybackQueue {
    samples: Mutex<VecDeque<i16>>,
    drained: Condvar,
}

/// Audio playback to one output device
pub struct CpalPlayback {
    running: Arc<AtomicBool>,
    queue: Arc<PlaybackQueue>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Receiver<DeviceError>,
}

impl CpalPlayback {
    /// Open `device` for mono playback at `sample_rate`
    pub fn open(device: cpal::Device, sample_rate: u32) -> Result<Self, DeviceError> {
        let config = select_stream_config(&device, Direction::Output, sample_rate)?;
        let channels = config.channels as usize;

        let running = Arc::new(AtomicBool::new(true));
        let queue = Arc::new(PlaybackQueue::default());
        let (error_tx, error_rx) = bounded::<DeviceError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), DeviceError>>(1);

        let thread_running = running.clone();
        let callback_queue = queue.clone();
        let stream_config = config.clone();

        let handle = thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || {
                let stream = device.build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut samples = callback_queue.samples.lock();
                        for frame in data.chunks_mut(channels) {
                            let value = samples.pop_front().map(i16_to_f32).unwrap_or(0.0);
                            frame.fill(value);
                        }
                        if samples.is_empty() {
                            callback_queue.drained.notify_all();
                        }
                    },
                    move |err| {
                        let _ = error_tx.try_send(DeviceError::Playback(err.to_string()));
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

                while thread_running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| DeviceError::Stream(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|_| DeviceError::Stream("playback thread exited during startup".to_string()))??;

        tracing::debug!(sample_rate, device_channels = config.channels, "Audio playback started");

        Ok(Self {
            running,
            queue,
            thread_handle: Some(handle),
            error_rx,
        })
    }

    /// Queue `samples` and block until the output callback consumed them
    pub fn play(&self, samples: &[i16]) -> Result<(), DeviceError> {
        let mut queue = self.queue.samples.lock();
        queue.extend(samples.iter().copied());

        while !queue.is_empty() {
            if let Ok(err) = self.error_rx.try_recv() {
                queue.clear();
                return Err(err);
            }
            if !self.running.load(Ordering::Relaxed) {
                return Err(DeviceError::Closed);
            }
            self.queue.drained.wait_for(&mut queue, POLL_INTERVAL);
        }
        Ok(())
    }

    /// Stop playback
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.queue.drained.notify_all();

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}
