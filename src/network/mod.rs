//! Network plumbing: signaling exchange and the media socket

pub mod signaling;
pub mod udp;

pub use signaling::{HttpSignaling, Signaling, SignalingExchange};
pub use udp::{create_socket, detect_local_ip};
