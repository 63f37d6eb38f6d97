//! Debug audio tap
//!
//! Mirrors captured and played PCM as raw little-endian datagrams so the
//! audio path can be inspected from another machine, e.g.
//! `nc -ul 10000 | aplay -f S16_LE -r 8000`.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use crate::audio::buffer::AudioFrame;
use crate::audio::device::{AudioDevice, AudioFormat};
use crate::config::DebugTapConfig;
use crate::error::DeviceError;
use crate::network::create_socket;

/// Wraps a device and mirrors its traffic over UDP
pub struct TappedDevice<D> {
    inner: D,
    socket: UdpSocket,
    in_addr: SocketAddr,
    out_addr: SocketAddr,
}

impl<D: AudioDevice> TappedDevice<D> {
    pub fn new(inner: D, config: &DebugTapConfig) -> Result<Self, DeviceError> {
        let resolve = |port: u16| -> Result<SocketAddr, DeviceError> {
            (config.host.as_str(), port)
                .to_socket_addrs()
                .map_err(|e| DeviceError::Stream(format!("debug tap address: {e}")))?
                .next()
                .ok_or_else(|| DeviceError::Stream(format!("debug tap host {} did not resolve", config.host)))
        };
        let in_addr = resolve(config.in_port)?;
        let out_addr = resolve(config.out_port)?;

        let bind: SocketAddr = if in_addr.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        // Non-blocking: a full send buffer drops the datagram, never the audio
        let socket = create_socket(bind).map_err(|e| DeviceError::Stream(e.to_string()))?;

        tracing::info!(%in_addr, %out_addr, "Debug audio tap enabled");

        Ok(Self {
            inner,
            socket,
            in_addr,
            out_addr,
        })
    }

    fn mirror(&self, frame: &AudioFrame, dest: SocketAddr) {
        if let Err(e) = self.socket.send_to(&frame.to_le_bytes(), dest) {
            tracing::trace!(%dest, "Debug tap send failed: {}", e);
        }
    }
}

impl<D: AudioDevice> AudioDevice for TappedDevice<D> {
    fn format(&self) -> AudioFormat {
        self.inner.format()
    }

    fn capture(&self) -> Result<AudioFrame, DeviceError> {
        let frame = self.inner.capture()?;
        self.mirror(&frame, self.in_addr);
        Ok(frame)
    }

    fn playback(&self, frame: &AudioFrame) -> Result<(), DeviceError> {
        self.inner.playback(frame)?;
        self.mirror(frame, self.out_addr);
        Ok(())
    }

    fn suspend_capture(&self) {
        self.inner.suspend_capture()
    }

    fn resume_capture(&self) {
        self.inner.resume_capture()
    }
}
