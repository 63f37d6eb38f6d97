//! User-facing surfaces: status board and the optional web UI

pub mod status;

#[cfg(feature = "web-ui")]
pub mod handlers;
#[cfg(feature = "web-ui")]
pub mod server;

pub use status::{StatusBoard, StatusSnapshot, UiInput};

#[cfg(feature = "web-ui")]
pub use server::WebServer;
