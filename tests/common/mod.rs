//! Shared fakes for integration tests
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use voice_appliance::audio::{AudioDevice, AudioFormat, AudioFrame};
use voice_appliance::codec::{OpusDecoder, OpusEncoder};
use voice_appliance::config::CodecSettings;
use voice_appliance::error::{DeviceError, SessionError, SignalingError};
use voice_appliance::network::Signaling;
use voice_appliance::peer::{
    AudioCodec, AudioSink, ChannelHandle, ChannelSink, ConnectionState, DataChannelKind,
    PeerConfig, PeerConnection, PeerEngine, PeerEvent,
};
use voice_appliance::session::{
    Coordinator, CoordinatorSettings, RestartReason, Restarter, SessionContext,
};
use voice_appliance::ui::StatusBoard;

pub const SAMPLE_RATE: u32 = 16_000;
pub const FRAME_SIZE: usize = 320;
pub const ANSWER: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// What the scripted engine saw
#[derive(Default)]
pub struct EngineLog {
    pub sessions_created: usize,
    pub offers: usize,
    pub remote_descriptions: Vec<String>,
    pub data_channels: Vec<String>,
    pub sent_messages: Vec<String>,
}

/// Test-side handle for injecting events and inspecting the engine
#[derive(Clone)]
pub struct EngineHandle {
    pub events: Arc<Mutex<VecDeque<PeerEvent>>>,
    pub log: Arc<Mutex<EngineLog>>,
    pub audio: Receiver<Bytes>,
}

impl EngineHandle {
    pub fn push(&self, event: PeerEvent) {
        self.events.lock().push_back(event);
    }

    pub fn drain_audio(&self) -> Vec<Bytes> {
        self.audio.try_iter().collect()
    }
}

pub struct ScriptedEngine {
    pub fail_create: bool,
    /// Report Connected as soon as the answer is applied
    pub auto_connect: bool,
    events: Arc<Mutex<VecDeque<PeerEvent>>>,
    log: Arc<Mutex<EngineLog>>,
    sink: ChannelSink,
}

impl ScriptedEngine {
    pub fn new(auto_connect: bool) -> (Self, EngineHandle) {
        let (sink, audio) = ChannelSink::new(4096);
        let events = Arc::new(Mutex::new(VecDeque::new()));
        let log = Arc::new(Mutex::new(EngineLog::default()));
        (
            Self {
                fail_create: false,
                auto_connect,
                events: events.clone(),
                log: log.clone(),
                sink,
            },
            EngineHandle { events, log, audio },
        )
    }
}

impl PeerEngine for ScriptedEngine {
    fn create_session(
        &mut self,
        config: &PeerConfig,
    ) -> Result<Box<dyn PeerConnection>, SessionError> {
        if self.fail_create {
            return Err(SessionError::Create("scripted failure".into()));
        }
        assert_eq!(config.audio_codec, AudioCodec::Opus);
        self.log.lock().sessions_created += 1;
        Ok(Box::new(ScriptedSession {
            auto_connect: self.auto_connect,
            events: self.events.clone(),
            log: self.log.clone(),
            sink: self.sink.clone(),
        }))
    }
}

struct ScriptedSession {
    auto_connect: bool,
    events: Arc<Mutex<VecDeque<PeerEvent>>>,
    log: Arc<Mutex<EngineLog>>,
    sink: ChannelSink,
}

impl PeerConnection for ScriptedSession {
    fn create_offer(&mut self) -> Result<(), SessionError> {
        self.log.lock().offers += 1;
        self.events
            .lock()
            .push_front(PeerEvent::LocalDescription("v=0\r\noffer".into()));
        Ok(())
    }

    fn poll(&mut self, events: &mut Vec<PeerEvent>) -> Result<(), SessionError> {
        events.extend(self.events.lock().drain(..));
        Ok(())
    }

    fn set_remote_description(&mut self, sdp: &str) -> Result<(), SessionError> {
        self.log.lock().remote_descriptions.push(sdp.to_string());
        if self.auto_connect {
            self.events
                .lock()
                .push_back(PeerEvent::StateChanged(ConnectionState::Connected));
        }
        Ok(())
    }

    fn audio_sink(&self) -> Box<dyn AudioSink> {
        Box::new(self.sink.clone())
    }

    fn audio_frames_dropped(&self) -> u64 {
        self.sink.dropped()
    }

    fn create_data_channel(
        &mut self,
        kind: DataChannelKind,
        label: &str,
    ) -> Result<ChannelHandle, SessionError> {
        assert_eq!(kind, DataChannelKind::Reliable);
        self.log.lock().data_channels.push(label.to_string());
        Ok(ChannelHandle(0))
    }

    fn send_data_channel_message(
        &mut self,
        _channel: ChannelHandle,
        payload: &[u8],
    ) -> Result<(), SessionError> {
        self.log
            .lock()
            .sent_messages
            .push(String::from_utf8_lossy(payload).into_owned());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Audio device
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Capture,
    Playback,
}

/// Device that records when each operation started and finished
pub struct InstrumentedDevice {
    pub capture_time: Duration,
    pub playback_time: Duration,
    intervals: Mutex<Vec<(Op, Instant, Instant)>>,
    suspends: AtomicUsize,
    resumes: AtomicUsize,
    playbacks: AtomicUsize,
}

impl InstrumentedDevice {
    pub fn new(capture_time: Duration, playback_time: Duration) -> Self {
        Self {
            capture_time,
            playback_time,
            intervals: Mutex::new(Vec::new()),
            suspends: AtomicUsize::new(0),
            resumes: AtomicUsize::new(0),
            playbacks: AtomicUsize::new(0),
        }
    }

    pub fn intervals(&self) -> Vec<(Op, Instant, Instant)> {
        self.intervals.lock().clone()
    }

    pub fn playbacks(&self) -> usize {
        self.playbacks.load(Ordering::SeqCst)
    }

    pub fn suspends(&self) -> usize {
        self.suspends.load(Ordering::SeqCst)
    }

    pub fn resumes(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }
}

impl AudioDevice for InstrumentedDevice {
    fn format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: SAMPLE_RATE,
            frame_size: FRAME_SIZE,
        }
    }

    fn capture(&self) -> Result<AudioFrame, DeviceError> {
        let start = Instant::now();
        thread::sleep(self.capture_time);
        self.intervals.lock().push((Op::Capture, start, Instant::now()));
        Ok(sine_frame())
    }

    fn playback(&self, frame: &AudioFrame) -> Result<(), DeviceError> {
        if frame.len() != FRAME_SIZE {
            return Err(DeviceError::FrameSize {
                expected: FRAME_SIZE,
                actual: frame.len(),
            });
        }
        let start = Instant::now();
        thread::sleep(self.playback_time);
        self.intervals.lock().push((Op::Playback, start, Instant::now()));
        self.playbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn suspend_capture(&self) {
        self.suspends.fetch_add(1, Ordering::SeqCst);
    }

    fn resume_capture(&self) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn sine_frame() -> AudioFrame {
    let samples = (0..FRAME_SIZE)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            ((2.0 * std::f32::consts::PI * 440.0 * t).sin() * 8000.0) as i16
        })
        .collect();
    AudioFrame::new(samples, 0, 0)
}

/// One compressed frame a decoder will accept
pub fn encoded_packet() -> Bytes {
    let mut encoder = OpusEncoder::new(&CodecSettings::voice(), SAMPLE_RATE, FRAME_SIZE).unwrap();
    encoder.encode(&sine_frame()).unwrap()
}

// ---------------------------------------------------------------------------
// Signaling and restart
// ---------------------------------------------------------------------------

pub enum SignalingScript {
    Answer,
    Fail(fn() -> SignalingError),
}

pub struct ScriptedSignaling {
    script: SignalingScript,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl ScriptedSignaling {
    pub fn answering() -> Self {
        Self::new(SignalingScript::Answer, Duration::ZERO)
    }

    pub fn failing(error: fn() -> SignalingError) -> Self {
        Self::new(SignalingScript::Fail(error), Duration::ZERO)
    }

    pub fn new(script: SignalingScript, delay: Duration) -> Self {
        Self {
            script,
            delay,
            calls: AtomicUsize::new(0),
        }
    }
}

impl Signaling for ScriptedSignaling {
    fn exchange(&self, local_description: &str) -> Result<String, SignalingError> {
        assert!(local_description.starts_with("v=0"));
        self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        match &self.script {
            SignalingScript::Answer => Ok(ANSWER.to_string()),
            SignalingScript::Fail(error) => Err(error()),
        }
    }
}

/// Records restarts instead of performing them
#[derive(Default)]
pub struct CountingRestarter {
    reasons: Mutex<Vec<RestartReason>>,
}

impl CountingRestarter {
    pub fn count(&self) -> usize {
        self.reasons.lock().len()
    }

    pub fn reasons(&self) -> Vec<RestartReason> {
        self.reasons.lock().clone()
    }
}

impl Restarter for CountingRestarter {
    fn restart(&self, reason: &RestartReason) {
        self.reasons.lock().push(reason.clone());
    }
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

pub struct Harness {
    pub engine: EngineHandle,
    pub device: Arc<InstrumentedDevice>,
    pub signaling: Arc<ScriptedSignaling>,
    pub restarter: Arc<CountingRestarter>,
    pub status: Arc<StatusBoard>,
}

pub fn settings(send_interval: Duration) -> CoordinatorSettings {
    CoordinatorSettings {
        peer: PeerConfig {
            audio_codec: AudioCodec::Opus,
            sample_rate: SAMPLE_RATE,
            frame_size: FRAME_SIZE,
            data_channel_label: "oai-events".to_string(),
            bind_address: None,
        },
        send_interval,
        greeting_instructions: "Say 'How can I help?.'".to_string(),
        log_datachannel_messages: true,
    }
}

/// Timing of the fake device and the send task
#[derive(Debug, Clone, Copy)]
pub struct HarnessOptions {
    pub send_interval: Duration,
    pub capture_time: Duration,
    pub playback_time: Duration,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            send_interval: Duration::from_millis(5),
            capture_time: Duration::from_millis(2),
            playback_time: Duration::from_millis(1),
        }
    }
}

/// Coordinator over fakes, with both codec directions available
pub fn coordinator(
    engine: ScriptedEngine,
    handle: EngineHandle,
    signaling: ScriptedSignaling,
) -> (Coordinator, Harness) {
    coordinator_with(engine, handle, signaling, HarnessOptions::default())
}

pub fn coordinator_with(
    engine: ScriptedEngine,
    handle: EngineHandle,
    signaling: ScriptedSignaling,
    options: HarnessOptions,
) -> (Coordinator, Harness) {
    let device = Arc::new(InstrumentedDevice::new(
        options.capture_time,
        options.playback_time,
    ));
    let signaling = Arc::new(signaling);
    let restarter = Arc::new(CountingRestarter::default());
    let status = Arc::new(StatusBoard::new());

    let context = SessionContext {
        engine: Box::new(engine),
        device: device.clone(),
        signaling: signaling.clone(),
        restarter: restarter.clone(),
        status: status.clone(),
    };
    let encoder = OpusEncoder::new(&CodecSettings::voice(), SAMPLE_RATE, FRAME_SIZE).unwrap();
    let decoder = OpusDecoder::new(SAMPLE_RATE, FRAME_SIZE).unwrap();
    let coordinator = Coordinator::new(
        settings(options.send_interval),
        context,
        Some(encoder),
        Some(decoder),
    );

    (
        coordinator,
        Harness {
            engine: handle,
            device,
            signaling,
            restarter,
            status,
        },
    )
}

/// Tick until `done` holds or `timeout` passes
pub fn tick_until(
    coordinator: &mut Coordinator,
    timeout: Duration,
    mut done: impl FnMut(&Coordinator) -> bool,
) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        coordinator.tick();
        if done(coordinator) {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}
