//! Application configuration
//!
//! Loaded from a TOML file (explicit path or the platform config
//! directory), with a small set of environment overrides for secrets and
//! endpoints. Every section has defaults so an empty file is valid.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::ConfigError;

/// Environment variable overriding `signaling.url`
pub const ENV_SIGNALING_URL: &str = "VOICE_SIGNALING_URL";

/// Environment variable overriding `signaling.api_key`
pub const ENV_API_KEY: &str = "VOICE_API_KEY";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub codec: CodecSettings,
    pub signaling: SignalingConfig,
    pub session: SessionConfig,
    pub ui: UiConfig,
    pub restart: RestartConfig,
    pub monitor: MonitorConfig,
    pub debug_tap: DebugTapConfig,
}

/// Hardware variant. Picks the audio adapter and its default format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Board {
    /// Separate capture and playback paths; no ordering needed
    DualCodec,
    /// One physical codec shared by microphone and speaker
    HalfDuplex,
}

impl Board {
    /// Default sample rate for this board
    pub fn default_sample_rate(self) -> u32 {
        match self {
            Board::DualCodec => 8_000,
            Board::HalfDuplex => 16_000,
        }
    }

    /// Default frame size in samples for this board
    pub fn default_frame_size(self) -> usize {
        match self {
            Board::DualCodec | Board::HalfDuplex => 320,
        }
    }
}

impl Default for Board {
    fn default() -> Self {
        Board::DualCodec
    }
}

/// Audio path configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub board: Board,
    /// Overrides the board's default sample rate
    pub sample_rate: Option<u32>,
    /// Overrides the board's default frame size (samples per channel)
    pub frame_size: Option<usize>,
    /// Input device name; default input device when unset
    pub input_device: Option<String>,
    /// Output device name; default output device when unset
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            board: Board::default(),
            sample_rate: None,
            frame_size: None,
            input_device: None,
            output_device: None,
        }
    }
}

impl AudioConfig {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
            .unwrap_or_else(|| self.board.default_sample_rate())
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
            .unwrap_or_else(|| self.board.default_frame_size())
    }

    /// Duration of one frame
    pub fn frame_duration(&self) -> Duration {
        Duration::from_micros(self.frame_size() as u64 * 1_000_000 / self.sample_rate() as u64)
    }
}

/// Encoder signal-type hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpusSignal {
    Auto,
    Voice,
    Music,
}

/// Encoder settings, applied once at initialization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecSettings {
    /// Target bitrate in bits per second
    pub bitrate: u32,
    /// Encoder complexity (0-10)
    pub complexity: u8,
    pub signal: OpusSignal,
}

impl Default for CodecSettings {
    fn default() -> Self {
        Self::voice()
    }
}

impl CodecSettings {
    /// Low-complexity speech preset
    pub fn voice() -> Self {
        Self {
            bitrate: DEFAULT_BITRATE,
            complexity: DEFAULT_COMPLEXITY,
            signal: OpusSignal::Voice,
        }
    }
}

/// Signaling endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    pub url: String,
    /// Bearer token sent with the offer
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    /// Upper bound on the answer body
    pub max_response_bytes: usize,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SIGNALING_URL.to_string(),
            api_key: None,
            timeout_secs: 10,
            max_response_bytes: MAX_SIGNALING_RESPONSE_BYTES,
        }
    }
}

impl SignalingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Session and scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Main loop tick in milliseconds
    pub tick_interval_ms: u64,
    /// Send task tick in milliseconds; the frame duration when unset
    pub send_interval_ms: Option<u64>,
    pub data_channel_label: String,
    /// Instructions carried by the greeting sent when the data channel opens
    pub greeting_instructions: String,
    /// Log every inbound data-channel payload at debug level
    pub log_datachannel_messages: bool,
    /// Local address for the media socket; auto-detected when unset
    pub bind_address: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            send_interval_ms: None,
            data_channel_label: DEFAULT_DATA_CHANNEL_LABEL.to_string(),
            greeting_instructions: DEFAULT_GREETING_INSTRUCTIONS.to_string(),
            log_datachannel_messages: false,
            bind_address: None,
        }
    }
}

impl SessionConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Parsed media socket address; `None` when unset or unparseable
    pub fn bind_ip(&self) -> Option<IpAddr> {
        self.bind_address.as_deref().and_then(|a| a.parse().ok())
    }

    /// Send task interval, falling back to one frame
    pub fn send_interval(&self, audio: &AudioConfig) -> Duration {
        self.send_interval_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| audio.frame_duration())
    }
}

/// Web status surface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub http_port: u16,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "0.0.0.0".to_string(),
            http_port: DEFAULT_HTTP_PORT,
        }
    }
}

/// How the process restarts after a fatal session failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartMode {
    /// Re-execute the current binary in place
    Exec,
    /// Exit and let a supervisor restart the process
    Exit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartConfig {
    pub mode: RestartMode,
    pub exit_code: i32,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            mode: RestartMode::Exec,
            exit_code: 75,
        }
    }
}

/// Periodic statistics logging
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 5,
        }
    }
}

/// Mirrors raw PCM to a UDP listener for debugging
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugTapConfig {
    pub enabled: bool,
    pub host: String,
    /// Receives captured (microphone) PCM
    pub in_port: u16,
    /// Receives played (speaker) PCM
    pub out_port: u16,
}

impl Default for DebugTapConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            in_port: 10_000,
            out_port: 10_001,
        }
    }
}

impl AppConfig {
    /// Default config file location, `<config dir>/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "voice-appliance").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, the default location is
    /// tried and defaults are used when it is absent.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => {
                    tracing::debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply environment overrides through `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_SIGNALING_URL).filter(|v| !v.is_empty()) {
            self.signaling.url = url;
        }
        if let Some(key) = lookup(ENV_API_KEY).filter(|v| !v.is_empty()) {
            self.signaling.api_key = Some(key);
        }
    }

    /// Check values the runtime cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sample_rate = self.audio.sample_rate();
        if !OPUS_SAMPLE_RATES.contains(&sample_rate) {
            return Err(ConfigError::invalid(
                "audio.sample_rate",
                format!("{sample_rate} Hz is not an Opus sample rate"),
            ));
        }

        // Opus accepts 2.5, 5, 10, 20, 40 and 60 ms frames
        let frame_size = self.audio.frame_size();
        let legal = OPUS_FRAME_DURATIONS_US
            .iter()
            .any(|us| frame_size as u64 * 1_000_000 == *us * sample_rate as u64);
        if !legal {
            return Err(ConfigError::invalid(
                "audio.frame_size",
                format!("{frame_size} samples at {sample_rate} Hz is not a legal Opus frame duration"),
            ));
        }

        if self.codec.complexity > 10 {
            return Err(ConfigError::invalid("codec.complexity", "must be between 0 and 10"));
        }
        if !(500..=512_000).contains(&self.codec.bitrate) {
            return Err(ConfigError::invalid(
                "codec.bitrate",
                "must be between 500 and 512000 bits per second",
            ));
        }
        if self.signaling.url.trim().is_empty() {
            return Err(ConfigError::invalid("signaling.url", "must not be empty"));
        }
        if self.signaling.max_response_bytes == 0 {
            return Err(ConfigError::invalid("signaling.max_response_bytes", "must be positive"));
        }
        if self.session.tick_interval_ms == 0 {
            return Err(ConfigError::invalid("session.tick_interval_ms", "must be positive"));
        }
        if self.session.send_interval_ms == Some(0) {
            return Err(ConfigError::invalid("session.send_interval_ms", "must be positive"));
        }
        if self.session.data_channel_label.is_empty() {
            return Err(ConfigError::invalid("session.data_channel_label", "must not be empty"));
        }
        if let Some(addr) = &self.session.bind_address {
            if addr.parse::<IpAddr>().is_err() {
                return Err(ConfigError::invalid(
                    "session.bind_address",
                    format!("'{addr}' is not an IP address"),
                ));
            }
        }
        if self.monitor.enabled && self.monitor.interval_secs == 0 {
            return Err(ConfigError::invalid("monitor.interval_secs", "must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.audio.sample_rate(), 8_000);
        assert_eq!(config.audio.frame_size(), 320);
        assert_eq!(config.audio.frame_duration(), Duration::from_millis(40));
        assert_eq!(config.session.tick_interval(), Duration::from_millis(15));
    }

    #[test]
    fn test_half_duplex_board_defaults() {
        let config = AppConfig::from_toml("[audio]\nboard = \"half-duplex\"\n").unwrap();
        assert_eq!(config.audio.board, Board::HalfDuplex);
        assert_eq!(config.audio.sample_rate(), 16_000);
        assert_eq!(config.audio.frame_duration(), Duration::from_millis(20));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_send_interval_falls_back_to_frame_duration() {
        let mut config = AppConfig::default();
        assert_eq!(
            config.session.send_interval(&config.audio),
            Duration::from_millis(40)
        );
        config.session.send_interval_ms = Some(15);
        assert_eq!(
            config.session.send_interval(&config.audio),
            Duration::from_millis(15)
        );
    }

    #[test]
    fn test_rejects_illegal_frame_duration() {
        let config = AppConfig::from_toml("[audio]\nframe_size = 300\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "audio.frame_size", .. }));
    }

    #[test]
    fn test_rejects_unknown_sample_rate() {
        let config = AppConfig::from_toml("[audio]\nsample_rate = 44100\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_complexity() {
        let config = AppConfig::from_toml("[codec]\ncomplexity = 11\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bind_address() {
        let config = AppConfig::from_toml("[session]\nbind_address = \"192.168.1.20\"\n").unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.session.bind_ip(), Some("192.168.1.20".parse().unwrap()));

        let config = AppConfig::from_toml("[session]\nbind_address = \"wlan0\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config.apply_env(|key| match key {
            ENV_SIGNALING_URL => Some("https://example.test/offer".to_string()),
            ENV_API_KEY => Some("secret".to_string()),
            _ => None,
        });
        assert_eq!(config.signaling.url, "https://example.test/offer");
        assert_eq!(config.signaling.api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn test_empty_env_values_are_ignored() {
        let mut config = AppConfig::default();
        config.apply_env(|_| Some(String::new()));
        assert_eq!(config.signaling.url, DEFAULT_SIGNALING_URL);
        assert!(config.signaling.api_key.is_none());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[codec]\nbitrate = 24000\n[session]\ntick_interval_ms = 10\n",
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.codec.bitrate, 24_000);
        assert_eq!(config.session.tick_interval_ms, 10);
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::load(Some(&dir.path().join("missing.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
