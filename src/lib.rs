//! # Voice Appliance
//!
//! On-device runtime of a realtime voice assistant: microphone audio is
//! streamed over a peer connection to a cloud speech endpoint and the
//! synthesized reply is played back on the same device.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                         MAIN LOOP (scheduler)                             │
//! │   every tick: poll engine ─► dispatch events ─► poll UI ─► sleep          │
//! │                                                                           │
//! │   ┌──────────────────────────────────────────────────────────────────┐   │
//! │   │                 Coordinator (session::coordinator)                │   │
//! │   │  NEW ──offer──► NEGOTIATING ──answer──► CONNECTED ──lost──► restart│   │
//! │   │                                                                    │   │
//! │   │   LocalDescription ─► signaling worker (network::signaling)       │   │
//! │   │   AudioTrack       ─► Opus decoder ─► device.playback             │   │
//! │   │   DataChannel*     ─► greeting / transcript (protocol)            │   │
//! │   └──────────────────────────────────────────────────────────────────┘   │
//! │                 │ spawns on CONNECTED, detached on restart                │
//! │                 ▼                                                         │
//! │   ┌──────────────────────────────────────────────────────────────────┐   │
//! │   │            Audio Send Task (session::send_task) - own thread       │   │
//! │   │      device.capture ─► Opus encoder ─► engine audio sink          │   │
//! │   └──────────────────────────────────────────────────────────────────┘   │
//! │                                                                           │
//! │   ┌──────────────────────────────────────────────────────────────────┐   │
//! │   │   Audio device (audio::device) - HalfDuplex lock when the board   │   │
//! │   │   shares one codec between microphone and speaker                 │   │
//! │   └──────────────────────────────────────────────────────────────────┘   │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod peer;
pub mod protocol;
pub mod scheduler;
pub mod session;
pub mod ui;

/// Application-wide constants
pub mod constants {
    /// Default Opus bitrate in bits per second
    pub const DEFAULT_BITRATE: u32 = 30_000;

    /// Default Opus complexity; the lowest setting keeps encode cheap
    pub const DEFAULT_COMPLEXITY: u8 = 0;

    /// Largest Opus packet the encoder may produce
    pub const MAX_ENCODED_FRAME_BYTES: usize = 1276;

    /// Sample rates accepted by Opus
    pub const OPUS_SAMPLE_RATES: [u32; 5] = [8_000, 12_000, 16_000, 24_000, 48_000];

    /// Legal Opus frame durations in microseconds
    pub const OPUS_FRAME_DURATIONS_US: [u64; 6] = [2_500, 5_000, 10_000, 20_000, 40_000, 60_000];

    /// Main loop tick in milliseconds
    pub const DEFAULT_TICK_INTERVAL_MS: u64 = 15;

    /// Default signaling endpoint
    pub const DEFAULT_SIGNALING_URL: &str = "https://api.openai.com/v1/realtime";

    /// Upper bound on the signaling answer body
    pub const MAX_SIGNALING_RESPONSE_BYTES: usize = 8_192;

    /// Label of the event data channel
    pub const DEFAULT_DATA_CHANNEL_LABEL: &str = "oai-events";

    /// Instructions carried by the greeting
    pub const DEFAULT_GREETING_INSTRUCTIONS: &str = "Say 'How can I help?.'";

    /// Default port for the web status surface
    pub const DEFAULT_HTTP_PORT: u16 = 8080;

    /// Inbound frames played per main-loop tick; older pending frames are dropped
    pub const MAX_INBOUND_FRAMES_PER_TICK: usize = 2;

    /// Capacity of the outbound encoded-frame queue (frames)
    pub const OUTBOUND_AUDIO_QUEUE: usize = 8;

    /// Capacity of the capture chunk queue (chunks)
    pub const CAPTURE_QUEUE_CAPACITY: usize = 64;

    /// Largest UDP datagram read from the media socket
    pub const MAX_DATAGRAM_SIZE: usize = 2_000;
}
