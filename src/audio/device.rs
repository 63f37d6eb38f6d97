//! Audio device adapter
//!
//! [`AudioDevice`] is the single interface the session code sees. Each
//! board variant is one implementation, chosen once by [`open_board`]:
//! a dual-codec board uses [`CpalDevice`] directly, a half-duplex board
//! wraps it in [`HalfDuplex`] so capture and playback never overlap.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::audio::buffer::AudioFrame;
use crate::audio::capture::CpalCapture;
use crate::audio::playback::CpalPlayback;
use crate::audio::tap::TappedDevice;
use crate::config::{AudioConfig, Board, DebugTapConfig};
use crate::error::DeviceError;

/// Sample rate and frame size an adapter was opened with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    /// Samples per frame (mono)
    pub frame_size: usize,
}

/// Blocking capture/playback of fixed-size mono frames.
///
/// Called from two threads at once: the send task captures while the
/// main loop plays inbound audio.
pub trait AudioDevice: Send + Sync {
    fn format(&self) -> AudioFormat;

    /// Block until one full frame has been captured
    fn capture(&self) -> Result<AudioFrame, DeviceError>;

    /// Block until `frame` has been emitted
    fn playback(&self, frame: &AudioFrame) -> Result<(), DeviceError>;

    /// Stop delivering captured audio. Idempotent.
    fn suspend_capture(&self) {}

    /// Resume capture after [`suspend_capture`](Self::suspend_capture). Idempotent.
    fn resume_capture(&self) {}
}

impl<D: AudioDevice + ?Sized> AudioDevice for Box<D> {
    fn format(&self) -> AudioFormat {
        (**self).format()
    }

    fn capture(&self) -> Result<AudioFrame, DeviceError> {
        (**self).capture()
    }

    fn playback(&self, frame: &AudioFrame) -> Result<(), DeviceError> {
        (**self).playback(frame)
    }

    fn suspend_capture(&self) {
        (**self).suspend_capture()
    }

    fn resume_capture(&self) {
        (**self).resume_capture()
    }
}

impl<D: AudioDevice + ?Sized> AudioDevice for Arc<D> {
    fn format(&self) -> AudioFormat {
        (**self).format()
    }

    fn capture(&self) -> Result<AudioFrame, DeviceError> {
        (**self).capture()
    }

    fn playback(&self, frame: &AudioFrame) -> Result<(), DeviceError> {
        (**self).playback(frame)
    }

    fn suspend_capture(&self) {
        (**self).suspend_capture()
    }

    fn resume_capture(&self) {
        (**self).resume_capture()
    }
}

/// Serializes capture and playback on a shared physical codec.
///
/// The lock covers one capture or one playback, never more, so the other
/// direction waits at most one frame. Playback runs as
/// suspend capture → play → resume capture.
pub struct HalfDuplex<D> {
    inner: D,
    lock: Mutex<()>,
    switches: AtomicU64,
}

impl<D: AudioDevice> HalfDuplex<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            lock: Mutex::new(()),
            switches: AtomicU64::new(0),
        }
    }

    /// Number of capture → playback switches so far
    pub fn switches(&self) -> u64 {
        self.switches.load(Ordering::Relaxed)
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }
}

impl<D: AudioDevice> AudioDevice for HalfDuplex<D> {
    fn format(&self) -> AudioFormat {
        self.inner.format()
    }

    fn capture(&self) -> Result<AudioFrame, DeviceError> {
        let _guard = self.lock.lock();
        self.inner.capture()
    }

    fn playback(&self, frame: &AudioFrame) -> Result<(), DeviceError> {
        let _guard = self.lock.lock();
        self.switches.fetch_add(1, Ordering::Relaxed);
        self.inner.suspend_capture();
        let result = self.inner.playback(frame);
        self.inner.resume_capture();
        result
    }

    fn suspend_capture(&self) {
        self.inner.suspend_capture()
    }

    fn resume_capture(&self) {
        self.inner.resume_capture()
    }
}

/// Host audio through cpal: one input stream and one output stream
pub struct CpalDevice {
    capture: CpalCapture,
    playback: CpalPlayback,
    format: AudioFormat,
}

impl CpalDevice {
    /// Open the configured input and output devices
    pub fn open(config: &AudioConfig) -> Result<Self, DeviceError> {
        let format = AudioFormat {
            sample_rate: config.sample_rate(),
            frame_size: config.frame_size(),
        };
        let input = find_device(Direction::Input, config.input_device.as_deref())?;
        let output = find_device(Direction::Output, config.output_device.as_deref())?;

        tracing::info!(
            input = input.name().unwrap_or_default(),
            output = output.name().unwrap_or_default(),
            sample_rate = format.sample_rate,
            frame_size = format.frame_size,
            "Opening audio devices"
        );

        let capture = CpalCapture::open(input, format.sample_rate, format.frame_size)?;
        let playback = CpalPlayback::open(output, format.sample_rate)?;

        Ok(Self {
            capture,
            playback,
            format,
        })
    }
}

impl AudioDevice for CpalDevice {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn capture(&self) -> Result<AudioFrame, DeviceError> {
        self.capture.read_frame()
    }

    fn playback(&self, frame: &AudioFrame) -> Result<(), DeviceError> {
        self.playback.play(&frame.samples)
    }

    fn suspend_capture(&self) {
        self.capture.suspend();
    }

    fn resume_capture(&self) {
        self.capture.resume();
    }
}

/// Open the audio adapter for the configured board
pub fn open_board(
    config: &AudioConfig,
    tap: &DebugTapConfig,
) -> Result<Arc<dyn AudioDevice>, DeviceError> {
    let mut device: Box<dyn AudioDevice> = Box::new(CpalDevice::open(config)?);
    if tap.enabled {
        device = Box::new(TappedDevice::new(device, tap)?);
    }

    let device: Arc<dyn AudioDevice> = match config.board {
        Board::DualCodec => Arc::from(device),
        Board::HalfDuplex => Arc::new(HalfDuplex::new(device)),
    };
    Ok(device)
}

/// Stream direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Description of an available device
#[derive(Debug, Clone, Serialize)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
}

/// List all available audio devices
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices: Vec<AudioDeviceInfo> = Vec::new();

    let default_input = host.default_input_device().and_then(|d| d.name().ok());
    let default_output = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(inputs) = host.input_devices() {
        for name in inputs.filter_map(|d| d.name().ok()) {
            devices.push(AudioDeviceInfo {
                is_default: default_input.as_ref() == Some(&name),
                name,
                is_input: true,
                is_output: false,
            });
        }
    }

    if let Ok(outputs) = host.output_devices() {
        for name in outputs.filter_map(|d| d.name().ok()) {
            let is_default = default_output.as_ref() == Some(&name);
            // Check if we already have this device as input
            if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                existing.is_output = true;
                existing.is_default |= is_default;
            } else {
                devices.push(AudioDeviceInfo {
                    name,
                    is_input: false,
                    is_output: true,
                    is_default,
                });
            }
        }
    }

    devices
}

/// Find a device by name, or the host default when `name` is `None`
pub fn find_device(direction: Direction, name: Option<&str>) -> Result<cpal::Device, DeviceError> {
    let host = cpal::default_host();

    let Some(name) = name else {
        let device = match direction {
            Direction::Input => host.default_input_device(),
            Direction::Output => host.default_output_device(),
        };
        return device
            .ok_or_else(|| DeviceError::NotFound(format!("no default {direction:?} device")));
    };

    let devices = match direction {
        Direction::Input => host.input_devices(),
        Direction::Output => host.output_devices(),
    }
    .map_err(|e| DeviceError::NotFound(e.to_string()))?;

    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(device);
        }
    }

    Err(DeviceError::NotFound(name.to_string()))
}

/// Pick an f32 stream config at `sample_rate`, preferring mono
pub(crate) fn select_stream_config(
    device: &cpal::Device,
    direction: Direction,
    sample_rate: u32,
) -> Result<StreamConfig, DeviceError> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> = match direction {
        Direction::Input => device
            .supported_input_configs()
            .map(|iter| iter.collect())
            .map_err(|e| DeviceError::UnsupportedFormat(e.to_string()))?,
        Direction::Output => device
            .supported_output_configs()
            .map(|iter| iter.collect())
            .map_err(|e| DeviceError::UnsupportedFormat(e.to_string()))?,
    };

    let rate = SampleRate(sample_rate);
    let mut candidates: Vec<&cpal::SupportedStreamConfigRange> = ranges
        .iter()
        .filter(|c| {
            c.sample_format() == SampleFormat::F32
                && c.min_sample_rate() <= rate
                && c.max_sample_rate() >= rate
        })
        .collect();
    candidates.sort_by_key(|c| c.channels());

    let range = candidates.first().ok_or_else(|| {
        DeviceError::UnsupportedFormat(format!("no f32 {direction:?} config at {sample_rate} Hz"))
    })?;

    Ok(StreamConfig {
        channels: range.channels(),
        sample_rate: rate,
        buffer_size: cpal::BufferSize::Default,
    })
}

pub(crate) fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

pub(crate) fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / i16::MAX as f32
}
