//! Protocol engine boundary
//!
//! The peer-connection engine (ICE, DTLS-SRTP, SCTP) is an external
//! collaborator. The coordinator drives it through [`PeerConnection`]:
//! one `poll` per main-loop tick, with everything the engine wants to
//! report returned as [`PeerEvent`]s and dispatched on the same thread.

pub mod rtc;

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::codec::CompressedFrame;
use crate::error::SessionError;

pub use rtc::RtcEngine;

/// Peer connection state as seen by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Negotiating,
    Connected,
    Disconnected,
    Closed,
}

impl ConnectionState {
    /// States the session can never leave
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Closed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::New => "new",
            ConnectionState::Negotiating => "negotiating",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something the engine reported during a poll
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// Connection state changed
    StateChanged(ConnectionState),
    /// Local description with gathered candidates, ready for signaling
    LocalDescription(String),
    /// One inbound compressed audio frame
    AudioTrack(Bytes),
    /// The data-channel transport is up
    DataChannelOpen,
    /// One inbound data-channel message
    DataChannelMessage(Bytes),
}

/// Negotiated audio codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AudioCodec {
    Opus,
}

/// Data-channel delivery mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataChannelKind {
    Reliable,
    Unreliable,
}

/// Opaque handle to an open data channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelHandle(pub usize);

/// Session parameters handed to the engine
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub audio_codec: AudioCodec,
    pub sample_rate: u32,
    pub frame_size: usize,
    pub data_channel_label: String,
    /// Local address for the media socket; detected when `None`
    pub bind_address: Option<IpAddr>,
}

/// Outbound audio hand-off, usable from the send task's thread
pub trait AudioSink: Send {
    fn send_audio(&self, frame: CompressedFrame) -> Result<(), SessionError>;
}

/// One peer connection
pub trait PeerConnection {
    /// Start negotiation; the offer arrives as [`PeerEvent::LocalDescription`]
    fn create_offer(&mut self) -> Result<(), SessionError>;

    /// Advance the engine: network I/O, timers, queued outbound media.
    /// Appends whatever happened to `events`.
    fn poll(&mut self, events: &mut Vec<PeerEvent>) -> Result<(), SessionError>;

    fn set_remote_description(&mut self, sdp: &str) -> Result<(), SessionError>;

    /// A sink feeding this connection's outbound audio track
    fn audio_sink(&self) -> Box<dyn AudioSink>;

    fn create_data_channel(
        &mut self,
        kind: DataChannelKind,
        label: &str,
    ) -> Result<ChannelHandle, SessionError>;

    fn send_data_channel_message(
        &mut self,
        channel: ChannelHandle,
        payload: &[u8],
    ) -> Result<(), SessionError>;

    /// Outbound frames dropped because the engine fell behind
    fn audio_frames_dropped(&self) -> u64;

    fn audio_codec(&self) -> AudioCodec {
        AudioCodec::Opus
    }
}

/// Creates peer connections
pub trait PeerEngine {
    fn create_session(&mut self, config: &PeerConfig)
        -> Result<Box<dyn PeerConnection>, SessionError>;
}

/// Bounded outbound frame queue.
///
/// A full queue drops the frame instead of blocking the send task, so a
/// stalled engine costs audio, never latency.
#[derive(Clone)]
pub struct ChannelSink {
    tx: Sender<CompressedFrame>,
    dropped: Arc<AtomicU64>,
}

impl ChannelSink {
    /// Create a sink and the receiver the engine drains
    pub fn new(capacity: usize) -> (Self, Receiver<CompressedFrame>) {
        let (tx, rx) = bounded(capacity);
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Frames dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl AudioSink for ChannelSink {
    fn send_audio(&self, frame: CompressedFrame) -> Result<(), SessionError> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(SessionError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_drops_when_full() {
        let (sink, rx) = ChannelSink::new(1);

        sink.send_audio(Bytes::from_static(b"a")).unwrap();
        sink.send_audio(Bytes::from_static(b"b")).unwrap();
        assert_eq!(sink.dropped(), 1);
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"a"));

        drop(rx);
        assert!(matches!(
            sink.send_audio(Bytes::from_static(b"c")),
            Err(SessionError::Closed)
        ));
    }

    #[test]
    fn test_terminal_states() {
        assert!(ConnectionState::Disconnected.is_terminal());
        assert!(ConnectionState::Closed.is_terminal());
        assert!(!ConnectionState::Connected.is_terminal());
        assert_eq!(ConnectionState::Negotiating.to_string(), "negotiating");
    }
}
