//! str0m-backed peer engine
//!
//! str0m is sans-IO: this adapter owns the UDP socket and feeds the
//! `Rtc` instance from `poll`, which the main loop calls every tick.
//! Nothing here blocks.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::Instant;

use bytes::Bytes;
use crossbeam_channel::Receiver;
use str0m::change::{SdpAnswer, SdpPendingOffer};
use str0m::channel::ChannelId;
use str0m::media::{Direction, MediaKind, MediaTime, Mid};
use str0m::net::{Protocol, Receive};
use str0m::{Candidate, Event, IceConnectionState, Input, Output, Rtc};

use super::{
    AudioCodec, AudioSink, ChannelHandle, ChannelSink, ConnectionState, DataChannelKind,
    PeerConfig, PeerConnection, PeerEngine, PeerEvent,
};
use crate::codec::CompressedFrame;
use crate::constants::{MAX_DATAGRAM_SIZE, OUTBOUND_AUDIO_QUEUE};
use crate::error::SessionError;
use crate::network::{create_socket, detect_local_ip};

/// Creates one [`RtcSession`] per connection attempt
#[derive(Debug, Default)]
pub struct RtcEngine;

impl RtcEngine {
    pub fn new() -> Self {
        Self
    }
}

impl PeerEngine for RtcEngine {
    fn create_session(
        &mut self,
        config: &PeerConfig,
    ) -> Result<Box<dyn PeerConnection>, SessionError> {
        if config.audio_codec != AudioCodec::Opus {
            return Err(SessionError::Create("only Opus audio is supported".to_string()));
        }
        Ok(Box::new(RtcSession::new(config)?))
    }
}

/// RTP clock ticks covered by one frame of `frame_size` samples
pub(crate) fn rtp_ticks_per_frame(frame_size: usize, sample_rate: u32, clock_hz: u64) -> u64 {
    frame_size as u64 * clock_hz / sample_rate as u64
}

pub struct RtcSession {
    rtc: Rtc,
    socket: UdpSocket,
    local_addr: SocketAddr,
    label: String,
    sample_rate: u32,
    frame_size: usize,

    audio_mid: Option<Mid>,
    pending_offer: Option<SdpPendingOffer>,
    channels: Vec<ChannelId>,
    open_channel: Option<ChannelId>,

    sink: ChannelSink,
    outbound: Receiver<CompressedFrame>,
    rtp_offset: u64,

    state: ConnectionState,
    queued: Vec<PeerEvent>,
    buf: Vec<u8>,
}

impl RtcSession {
    pub fn new(config: &PeerConfig) -> Result<Self, SessionError> {
        let ip = match config.bind_address {
            Some(ip) => ip,
            None => detect_local_ip().map_err(|e| SessionError::Create(e.to_string()))?,
        };
        let socket =
            create_socket(SocketAddr::new(ip, 0)).map_err(|e| SessionError::Create(e.to_string()))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| SessionError::Create(e.to_string()))?;

        let mut rtc = Rtc::new();
        let candidate =
            Candidate::host(local_addr, "udp").map_err(|e| SessionError::Create(e.to_string()))?;
        rtc.add_local_candidate(candidate);

        let (sink, outbound) = ChannelSink::new(OUTBOUND_AUDIO_QUEUE);

        tracing::debug!(%local_addr, "Peer session created");

        Ok(Self {
            rtc,
            socket,
            local_addr,
            label: config.data_channel_label.clone(),
            sample_rate: config.sample_rate,
            frame_size: config.frame_size,
            audio_mid: None,
            pending_offer: None,
            channels: Vec::new(),
            open_channel: None,
            sink,
            outbound,
            rtp_offset: 0,
            state: ConnectionState::New,
            queued: Vec::new(),
            buf: vec![0u8; MAX_DATAGRAM_SIZE],
        })
    }

    fn set_state(&mut self, state: ConnectionState, events: &mut Vec<PeerEvent>) {
        if self.state != state {
            self.state = state;
            events.push(PeerEvent::StateChanged(state));
        }
    }

    fn receive_datagrams(&mut self, now: Instant) -> Result<(), SessionError> {
        loop {
            let (n, source) = match self.socket.recv_from(&mut self.buf) {
                Ok(received) => received,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(SessionError::Transport(e.to_string())),
            };

            let contents = match (&self.buf[..n]).try_into() {
                Ok(contents) => contents,
                Err(e) => {
                    tracing::trace!("Ignoring datagram from {}: {:?}", source, e);
                    continue;
                }
            };
            let input = Input::Receive(
                now,
                Receive {
                    proto: Protocol::Udp,
                    source,
                    destination: self.local_addr,
                    contents,
                },
            );
            if self.rtc.accepts(&input) {
                self.rtc
                    .handle_input(input)
                    .map_err(|e| SessionError::Transport(e.to_string()))?;
            }
        }
    }

    /// Hand queued frames from the send task to the audio track
    fn write_outbound_audio(&mut self, now: Instant) {
        while let Ok(frame) = self.outbound.try_recv() {
            if self.state != ConnectionState::Connected {
                continue;
            }
            let Some(mid) = self.audio_mid else {
                continue;
            };
            let Some(writer) = self.rtc.writer(mid) else {
                continue;
            };
            let Some((pt, clock_rate)) = writer
                .payload_params()
                .next()
                .map(|params| (params.pt(), params.spec().clock_rate))
            else {
                continue;
            };

            let rtp_time = MediaTime::new(self.rtp_offset, clock_rate);
            self.rtp_offset +=
                rtp_ticks_per_frame(self.frame_size, self.sample_rate, clock_rate.get() as u64);

            if let Err(e) = writer.write(pt, now, rtp_time, frame.to_vec()) {
                tracing::warn!("Audio track write failed: {}", e);
            }
        }
    }

    fn handle_event(&mut self, event: Event, events: &mut Vec<PeerEvent>) {
        match event {
            Event::IceConnectionStateChange(IceConnectionState::Disconnected) => {
                self.set_state(ConnectionState::Disconnected, events);
            }
            Event::IceConnectionStateChange(state) => {
                tracing::debug!("ICE state: {:?}", state);
            }
            Event::Connected => self.set_state(ConnectionState::Connected, events),
            Event::MediaData(data) => events.push(PeerEvent::AudioTrack(Bytes::from(data.data))),
            Event::ChannelOpen(id, label) => {
                if label == self.label && self.open_channel.is_none() {
                    self.open_channel = Some(id);
                    events.push(PeerEvent::DataChannelOpen);
                } else {
                    tracing::debug!("Ignoring data channel '{}'", label);
                }
            }
            Event::ChannelData(data) => {
                if Some(data.id) == self.open_channel {
                    events.push(PeerEvent::DataChannelMessage(Bytes::from(data.data)));
                }
            }
            Event::ChannelClose(id) => {
                if Some(id) == self.open_channel {
                    self.open_channel = None;
                }
            }
            _ => {}
        }
    }
}

impl PeerConnection for RtcSession {
    fn create_offer(&mut self) -> Result<(), SessionError> {
        if self.pending_offer.is_some() || self.audio_mid.is_some() {
            return Err(SessionError::Offer("offer already created".to_string()));
        }

        let mut changes = self.rtc.sdp_api();
        let mid = changes.add_media(MediaKind::Audio, Direction::SendRecv, None, None, None);
        changes.add_channel(self.label.clone());
        let (offer, pending) = changes
            .apply()
            .ok_or_else(|| SessionError::Offer("nothing to negotiate".to_string()))?;

        self.audio_mid = Some(mid);
        self.pending_offer = Some(pending);
        // Host candidates are added up front, so the offer is already complete
        self.queued.push(PeerEvent::LocalDescription(offer.to_sdp_string()));
        Ok(())
    }

    fn poll(&mut self, events: &mut Vec<PeerEvent>) -> Result<(), SessionError> {
        events.append(&mut self.queued);
        if self.state == ConnectionState::Closed {
            return Ok(());
        }

        let now = Instant::now();
        self.write_outbound_audio(now);
        self.receive_datagrams(now)?;
        self.rtc
            .handle_input(Input::Timeout(now))
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        loop {
            let output = self
                .rtc
                .poll_output()
                .map_err(|e| SessionError::Transport(e.to_string()))?;
            match output {
                Output::Timeout(_) => break,
                Output::Transmit(transmit) => {
                    if let Err(e) = self.socket.send_to(&transmit.contents, transmit.destination) {
                        if e.kind() != ErrorKind::WouldBlock {
                            tracing::warn!("Send to {} failed: {}", transmit.destination, e);
                        }
                    }
                }
                Output::Event(event) => self.handle_event(event, events),
            }
        }

        if !self.rtc.is_alive() {
            self.set_state(ConnectionState::Closed, events);
        }
        Ok(())
    }

    fn set_remote_description(&mut self, sdp: &str) -> Result<(), SessionError> {
        let pending = self
            .pending_offer
            .take()
            .ok_or_else(|| SessionError::RemoteDescription("no offer pending".to_string()))?;
        let answer = SdpAnswer::from_sdp_string(sdp)
            .map_err(|e| SessionError::RemoteDescription(e.to_string()))?;
        self.rtc
            .sdp_api()
            .accept_answer(pending, answer)
            .map_err(|e| SessionError::RemoteDescription(e.to_string()))?;
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
        // The negotiated channel is the reliable, ordered default
        if kind != DataChannelKind::Reliable {
            return Err(SessionError::DataChannel(
                "only reliable channels are negotiated".to_string(),
            ));
        }
        if label != self.label {
            return Err(SessionError::DataChannel(format!(
                "channel '{}' was not negotiated",
                label
            )));
        }
        let id = self
            .open_channel
            .ok_or_else(|| SessionError::DataChannel("channel not open".to_string()))?;

        let index = match self.channels.iter().position(|c| *c == id) {
            Some(index) => index,
            None => {
                self.channels.push(id);
                self.channels.len() - 1
            }
        };
        Ok(ChannelHandle(index))
    }

    fn send_data_channel_message(
        &mut self,
        channel: ChannelHandle,
        payload: &[u8],
    ) -> Result<(), SessionError> {
        let id = *self
            .channels
            .get(channel.0)
            .ok_or_else(|| SessionError::DataChannel("unknown channel".to_string()))?;
        let mut channel = self
            .rtc
            .channel(id)
            .ok_or_else(|| SessionError::DataChannel("channel closed".to_string()))?;
        channel
            .write(false, payload)
            .map_err(|e| SessionError::DataChannel(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use str0m::change::SdpOffer;

    fn loopback() -> PeerConfig {
        PeerConfig {
            audio_codec: AudioCodec::Opus,
            sample_rate: 16_000,
            frame_size: 320,
            data_channel_label: "oai-events".to_string(),
            bind_address: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        }
    }

    fn session() -> RtcSession {
        RtcSession::new(&loopback()).unwrap()
    }

    /// Create the offer and pull it out of the event queue
    fn offer(session: &mut RtcSession) -> String {
        session.create_offer().unwrap();
        let mut events = Vec::new();
        session.poll(&mut events).unwrap();
        events
            .into_iter()
            .find_map(|event| match event {
                PeerEvent::LocalDescription(sdp) => Some(sdp),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_offer_carries_audio_and_data_channel() {
        let mut session = session();
        let sdp = offer(&mut session);

        assert!(sdp.contains("m=audio"));
        assert!(sdp.to_lowercase().contains("opus/48000"));
        assert!(sdp.contains("m=application"));
        assert!(sdp.contains("webrtc-datachannel"));
        // Host candidate on the bound interface
        assert!(sdp.contains("127.0.0.1"));
    }

    #[test]
    fn test_second_offer_is_rejected() {
        let mut session = session();
        session.create_offer().unwrap();
        assert!(matches!(session.create_offer(), Err(SessionError::Offer(_))));
    }

    #[test]
    fn test_answer_without_offer_is_rejected() {
        let mut session = session();
        assert!(matches!(
            session.set_remote_description("v=0\r\n"),
            Err(SessionError::RemoteDescription(_))
        ));
    }

    #[test]
    fn test_garbage_answer_is_rejected() {
        let mut session = session();
        session.create_offer().unwrap();
        assert!(matches!(
            session.set_remote_description("this is not sdp"),
            Err(SessionError::RemoteDescription(_))
        ));
    }

    #[test]
    fn test_answer_from_peer_is_accepted() {
        let mut session = session();
        let sdp = offer(&mut session);

        let mut answerer = Rtc::new();
        let answer = answerer
            .sdp_api()
            .accept_offer(SdpOffer::from_sdp_string(&sdp).unwrap())
            .unwrap();

        session
            .set_remote_description(&answer.to_sdp_string())
            .unwrap();
        // The pending offer is consumed
        assert!(session.set_remote_description(&answer.to_sdp_string()).is_err());
    }

    #[test]
    fn test_data_channel_must_match_negotiation() {
        let mut session = session();
        session.create_offer().unwrap();

        assert!(matches!(
            session.create_data_channel(DataChannelKind::Unreliable, "oai-events"),
            Err(SessionError::DataChannel(_))
        ));
        assert!(matches!(
            session.create_data_channel(DataChannelKind::Reliable, "other"),
            Err(SessionError::DataChannel(_))
        ));
        // Negotiated but not open yet
        assert!(matches!(
            session.create_data_channel(DataChannelKind::Reliable, "oai-events"),
            Err(SessionError::DataChannel(_))
        ));
    }

    #[test]
    fn test_unknown_channel_handle_is_rejected() {
        let mut session = session();
        assert!(matches!(
            session.send_data_channel_message(ChannelHandle(3), b"{}"),
            Err(SessionError::DataChannel(_))
        ));
    }

    #[test]
    fn test_audio_before_connect_is_discarded() {
        let mut session = session();
        session.create_offer().unwrap();
        let sink = session.audio_sink();
        for _ in 0..OUTBOUND_AUDIO_QUEUE + 2 {
            sink.send_audio(Bytes::from_static(&[0xF8, 0xFF, 0xFE])).unwrap();
        }
        // The queue keeps the first frames and counts the overflow
        assert_eq!(session.audio_frames_dropped(), 2);

        let mut events = Vec::new();
        session.poll(&mut events).unwrap();

        assert!(!events
            .iter()
            .any(|event| matches!(event, PeerEvent::StateChanged(_))));
        assert!(session.outbound.is_empty());
        assert_eq!(session.audio_frames_dropped(), 2);
    }

    #[test]
    fn test_rtp_ticks_scale_to_clock() {
        // 40 ms at 8 kHz on the 48 kHz Opus clock
        assert_eq!(rtp_ticks_per_frame(320, 8000, 48_000), 1920);
        // 20 ms at 16 kHz
        assert_eq!(rtp_ticks_per_frame(320, 16_000, 48_000), 960);
    }
}
