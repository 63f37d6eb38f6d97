//! Session state machine
//!
//! Owns the peer connection, the decoder, the send task and (while the
//! task is stopped) the encoder. Everything here runs on the main-loop
//! thread; the signaling exchange is the only work pushed elsewhere.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, TryRecvError};
use serde::Serialize;
use uuid::Uuid;

use super::restart::{RestartLatch, RestartReason, Restarter};
use super::send_task::{AudioSendTask, SendTaskSnapshot, SendTaskStats};
use crate::audio::AudioDevice;
use crate::codec::{OpusDecoder, OpusEncoder};
use crate::constants::MAX_INBOUND_FRAMES_PER_TICK;
use crate::error::SignalingError;
use crate::network::{Signaling, SignalingExchange};
use crate::peer::{
    ChannelHandle, ConnectionState, DataChannelKind, PeerConfig, PeerConnection, PeerEngine,
    PeerEvent,
};
use crate::protocol::{extract_transcript, ClientEvent};
use crate::ui::{StatusBoard, UiInput};

/// Per-process session settings
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub peer: PeerConfig,
    pub send_interval: Duration,
    pub greeting_instructions: String,
    pub log_datachannel_messages: bool,
}

/// Long-lived collaborators handed to the coordinator
pub struct SessionContext {
    pub engine: Box<dyn PeerEngine>,
    pub device: Arc<dyn AudioDevice>,
    pub signaling: Arc<dyn Signaling>,
    pub restarter: Arc<dyn Restarter>,
    pub status: Arc<StatusBoard>,
}

/// Pipeline counters for the statistics monitor
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    pub send: SendTaskSnapshot,
    pub frames_played: u64,
    pub frames_empty: u64,
    pub frames_dropped_inbound: u64,
    /// Encoded frames the engine had no room for
    pub frames_dropped_outbound: u64,
    pub decode_errors: u64,
    pub playback_errors: u64,
    pub transcripts: u64,
    pub signaling_round_trip: Option<Duration>,
}

type ExchangeResult = Result<SignalingExchange, SignalingError>;

pub struct Coordinator {
    settings: CoordinatorSettings,
    engine: Box<dyn PeerEngine>,
    device: Arc<dyn AudioDevice>,
    signaling: Arc<dyn Signaling>,
    restarter: Arc<dyn Restarter>,
    status: Arc<StatusBoard>,
    latch: RestartLatch,

    session: Option<Box<dyn PeerConnection>>,
    session_id: Option<Uuid>,
    state: ConnectionState,
    pending_exchange: Option<Receiver<ExchangeResult>>,
    offer_sent: bool,
    data_channel: Option<ChannelHandle>,

    encoder: Option<OpusEncoder>,
    decoder: Option<OpusDecoder>,
    send_task: Option<AudioSendTask>,
    send_stats: Arc<SendTaskStats>,
    muted: Arc<AtomicBool>,

    events: Vec<PeerEvent>,
    stats: SessionStats,
}

impl Coordinator {
    /// A missing encoder or decoder disables that direction for good
    pub fn new(
        settings: CoordinatorSettings,
        context: SessionContext,
        encoder: Option<OpusEncoder>,
        decoder: Option<OpusDecoder>,
    ) -> Self {
        Self {
            settings,
            engine: context.engine,
            device: context.device,
            signaling: context.signaling,
            restarter: context.restarter,
            status: context.status,
            latch: RestartLatch::new(),
            session: None,
            session_id: None,
            state: ConnectionState::New,
            pending_exchange: None,
            offer_sent: false,
            data_channel: None,
            encoder,
            decoder,
            send_task: None,
            send_stats: Arc::new(SendTaskStats::default()),
            muted: Arc::new(AtomicBool::new(false)),
            events: Vec::new(),
            stats: SessionStats::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    /// Whether the audio send task is running
    pub fn is_streaming(&self) -> bool {
        self.send_task.as_ref().is_some_and(AudioSendTask::is_active)
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    /// Set once the session has failed; the coordinator is inert afterwards
    pub fn restart_reason(&self) -> Option<RestartReason> {
        self.latch.reason()
    }

    pub fn stats(&self) -> SessionStats {
        let mut stats = self.stats.clone();
        stats.send = self.send_stats.snapshot();
        stats.frames_dropped_outbound = self
            .session
            .as_ref()
            .map_or(0, |session| session.audio_frames_dropped());
        stats
    }

    /// One main-loop step: create the session on first use, advance the
    /// engine, dispatch its events, then apply a finished exchange.
    ///
    /// At most [`MAX_INBOUND_FRAMES_PER_TICK`] inbound frames are played
    /// per tick; older ones are dropped so playback never lags behind.
    pub fn tick(&mut self) {
        if self.latch.is_triggered() {
            return;
        }
        if self.session.is_none() {
            self.start();
            return;
        }

        let mut events = std::mem::take(&mut self.events);
        let polled = match self.session.as_mut() {
            Some(session) => session.poll(&mut events),
            None => Ok(()),
        };
        let mut stale_audio = events
            .iter()
            .filter(|event| matches!(event, PeerEvent::AudioTrack(_)))
            .count()
            .saturating_sub(MAX_INBOUND_FRAMES_PER_TICK);
        if stale_audio > 0 {
            tracing::debug!(dropped = stale_audio, "Inbound audio fell behind");
        }

        for event in events.drain(..) {
            if self.latch.is_triggered() {
                break;
            }
            if stale_audio > 0 && matches!(event, PeerEvent::AudioTrack(_)) {
                stale_audio -= 1;
                self.stats.frames_dropped_inbound += 1;
                continue;
            }
            self.handle_event(event);
        }
        self.events = events;

        if let Err(e) = polled {
            tracing::error!("Peer connection failed: {}", e);
            self.set_state(ConnectionState::Closed);
            self.restart(RestartReason::Transport(e.to_string()));
            return;
        }

        self.poll_exchange();
    }

    pub fn handle_input(&mut self, input: UiInput) {
        match input {
            UiInput::Button => {
                let muted = !self.muted.load(Ordering::Relaxed);
                self.muted.store(muted, Ordering::Relaxed);
                self.status.set_muted(muted);
                tracing::info!(muted, "Microphone {}", if muted { "muted" } else { "live" });
            }
        }
    }

    fn start(&mut self) {
        let session_id = Uuid::new_v4();
        self.session_id = Some(session_id);
        self.status.begin_session(session_id);
        tracing::info!(%session_id, "Creating peer connection");

        let created = self
            .engine
            .create_session(&self.settings.peer)
            .and_then(|mut session| {
                session.create_offer()?;
                Ok(session)
            });

        match created {
            Ok(session) => self.session = Some(session),
            Err(e) => {
                tracing::error!("Failed to create peer connection: {}", e);
                self.restart(RestartReason::SessionCreate(e.to_string()));
            }
        }
    }

    fn handle_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::StateChanged(state) => self.on_state_changed(state),
            PeerEvent::LocalDescription(offer) => self.on_local_description(offer),
            PeerEvent::AudioTrack(packet) => self.on_audio(&packet),
            PeerEvent::DataChannelOpen => self.on_data_channel_open(),
            PeerEvent::DataChannelMessage(payload) => self.on_data_channel_message(&payload),
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            tracing::info!(from = %self.state, to = %state, "Session state changed");
            self.state = state;
            self.status.set_state(state);
        }
    }

    fn on_state_changed(&mut self, state: ConnectionState) {
        match state {
            ConnectionState::Connected => {
                if matches!(self.state, ConnectionState::New | ConnectionState::Negotiating) {
                    self.set_state(ConnectionState::Connected);
                    if let Some(session) = self.session.as_ref() {
                        tracing::info!(codec = ?session.audio_codec(), "Media connected");
                    }
                    self.start_send_task();
                }
            }
            ConnectionState::Disconnected | ConnectionState::Closed => {
                self.set_state(state);
                self.restart(RestartReason::ConnectionLost(state));
            }
            ConnectionState::Negotiating => {
                if self.state == ConnectionState::New {
                    self.set_state(ConnectionState::Negotiating);
                }
            }
            ConnectionState::New => {}
        }
    }

    fn on_local_description(&mut self, offer: String) {
        if self.offer_sent {
            tracing::debug!("Ignoring repeated local description");
            return;
        }
        self.offer_sent = true;
        if self.state == ConnectionState::New {
            self.set_state(ConnectionState::Negotiating);
        }

        let (tx, rx) = bounded(1);
        let signaling = self.signaling.clone();
        let spawned = thread::Builder::new()
            .name("signaling".to_string())
            .spawn(move || {
                let _ = tx.send(SignalingExchange::run(signaling.as_ref(), offer));
            });

        match spawned {
            Ok(_) => self.pending_exchange = Some(rx),
            Err(e) => self.restart(RestartReason::Signaling(e.to_string())),
        }
    }

    fn poll_exchange(&mut self) {
        let Some(rx) = self.pending_exchange.as_ref() else {
            return;
        };
        let result = match rx.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => return,
            Err(TryRecvError::Disconnected) => Err(SignalingError::WorkerLost),
        };
        self.pending_exchange = None;

        let exchange = match result {
            Ok(exchange) => exchange,
            Err(e) => {
                tracing::error!("Signaling failed: {}", e);
                self.restart(RestartReason::Signaling(e.to_string()));
                return;
            }
        };

        tracing::info!(
            round_trip_ms = exchange.round_trip.as_millis() as u64,
            "Received remote description"
        );
        self.stats.signaling_round_trip = Some(exchange.round_trip);

        let applied = match self.session.as_mut() {
            Some(session) => session.set_remote_description(&exchange.answer),
            None => return,
        };
        if let Err(e) = applied {
            tracing::error!("Failed to apply remote description: {}", e);
            self.restart(RestartReason::RemoteDescription(e.to_string()));
        }
    }

    fn on_audio(&mut self, packet: &[u8]) {
        let Some(decoder) = self.decoder.as_mut() else {
            self.stats.frames_dropped_inbound += 1;
            return;
        };

        match decoder.decode(packet) {
            Ok(Some(frame)) => match self.device.playback(&frame) {
                Ok(()) => self.stats.frames_played += 1,
                Err(e) => {
                    self.stats.playback_errors += 1;
                    tracing::warn!("Playback failed: {}", e);
                }
            },
            Ok(None) => self.stats.frames_empty += 1,
            Err(e) => {
                self.stats.decode_errors += 1;
                tracing::warn!("Decoding failed: {}", e);
            }
        }
    }

    fn on_data_channel_open(&mut self) {
        if self.data_channel.is_some() {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let label = &self.settings.peer.data_channel_label;

        let channel = match session.create_data_channel(DataChannelKind::Reliable, label) {
            Ok(channel) => channel,
            Err(e) => {
                tracing::warn!("Failed to open data channel '{}': {}", label, e);
                return;
            }
        };
        self.data_channel = Some(channel);
        tracing::info!("Data channel '{}' open", label);

        let greeting = match ClientEvent::greeting(&self.settings.greeting_instructions).to_json() {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("Failed to serialize greeting: {}", e);
                return;
            }
        };
        if let Err(e) = session.send_data_channel_message(channel, greeting.as_bytes()) {
            tracing::warn!("Failed to send greeting: {}", e);
        }
    }

    fn on_data_channel_message(&mut self, payload: &[u8]) {
        if self.settings.log_datachannel_messages {
            tracing::debug!("Data channel message: {}", String::from_utf8_lossy(payload));
        }
        if let Some(transcript) = extract_transcript(payload) {
            tracing::info!("Transcript: {}", transcript);
            self.stats.transcripts += 1;
            self.status.set_transcript(transcript);
        }
    }

    fn start_send_task(&mut self) {
        if self.send_task.is_some() {
            return;
        }
        let Some(encoder) = self.encoder.take() else {
            tracing::warn!("Encoder unavailable; not streaming microphone audio");
            return;
        };
        let Some(session) = self.session.as_ref() else {
            self.encoder = Some(encoder);
            return;
        };

        match AudioSendTask::spawn(
            self.device.clone(),
            encoder,
            session.audio_sink(),
            self.settings.send_interval,
            self.muted.clone(),
            self.send_stats.clone(),
        ) {
            Ok(task) => {
                self.send_task = Some(task);
                self.status.set_streaming(true);
            }
            Err(e) => tracing::error!("Failed to start audio send task: {}", e),
        }
    }

    fn stop_send_task(&mut self) {
        if let Some(mut task) = self.send_task.take() {
            if let Some(encoder) = task.stop() {
                self.encoder = Some(encoder);
            }
            self.status.set_streaming(false);
        }
    }

    fn restart(&mut self, reason: RestartReason) {
        self.pending_exchange = None;
        if !self.latch.trigger(reason.clone()) {
            return;
        }
        // The restart subsumes the send task; never wait on its capture
        if let Some(mut task) = self.send_task.take() {
            task.detach();
            self.status.set_streaming(false);
        }
        tracing::error!(%reason, "Session failed; restarting");
        self.restarter.restart(&reason);
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.stop_send_task();
    }
}
