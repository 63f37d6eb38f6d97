//! Status shared between the session and user-facing surfaces

use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

use crate::peer::ConnectionState;

/// Momentary user input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiInput {
    /// The single push button; toggles microphone mute
    Button,
}

/// What a display or the web surface shows
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub session_id: Option<Uuid>,
    pub state: ConnectionState,
    /// Send task running
    pub streaming: bool,
    pub muted: bool,
    /// Streaming and not muted
    pub indicator: bool,
    pub connected_since: Option<DateTime<Utc>>,
    pub last_transcript: Option<String>,
    pub transcript_at: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
}

/// Status written by the main loop, read by anyone
pub struct StatusBoard {
    snapshot: RwLock<StatusSnapshot>,
    input_tx: Sender<UiInput>,
    input_rx: Receiver<UiInput>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    pub fn new() -> Self {
        let (input_tx, input_rx) = unbounded();
        Self {
            snapshot: RwLock::new(StatusSnapshot {
                session_id: None,
                state: ConnectionState::New,
                streaming: false,
                muted: false,
                indicator: false,
                connected_since: None,
                last_transcript: None,
                transcript_at: None,
                started_at: Utc::now(),
            }),
            input_tx,
            input_rx,
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.snapshot.read().clone()
    }

    pub fn begin_session(&self, session_id: Uuid) {
        let mut s = self.snapshot.write();
        s.session_id = Some(session_id);
        s.state = ConnectionState::New;
        s.connected_since = None;
    }

    pub fn set_state(&self, state: ConnectionState) {
        let mut s = self.snapshot.write();
        if state == ConnectionState::Connected && s.state != ConnectionState::Connected {
            s.connected_since = Some(Utc::now());
        }
        if state != ConnectionState::Connected {
            s.connected_since = None;
        }
        s.state = state;
    }

    pub fn set_streaming(&self, streaming: bool) {
        let mut s = self.snapshot.write();
        s.streaming = streaming;
        s.indicator = s.streaming && !s.muted;
    }

    pub fn set_muted(&self, muted: bool) {
        let mut s = self.snapshot.write();
        s.muted = muted;
        s.indicator = s.streaming && !s.muted;
    }

    pub fn set_transcript(&self, transcript: impl Into<String>) {
        let mut s = self.snapshot.write();
        s.last_transcript = Some(transcript.into());
        s.transcript_at = Some(Utc::now());
    }

    /// Queue an input for the main loop
    pub fn press(&self, input: UiInput) {
        // Both ends live in self, so the channel never disconnects
        let _ = self.input_tx.send(input);
    }

    /// Next pending input, if any
    pub fn try_input(&self) -> Option<UiInput> {
        self.input_rx.try_recv().ok()
    }
}
