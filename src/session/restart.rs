//! Full-process restart, the recovery path for every session failure

use std::fmt;

use parking_lot::Mutex;

use crate::config::{RestartConfig, RestartMode};
use crate::peer::ConnectionState;

/// Why the session gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartReason {
    /// The engine could not create a peer connection or offer
    SessionCreate(String),
    /// The offer/answer exchange failed
    Signaling(String),
    /// The answer could not be applied
    RemoteDescription(String),
    /// The engine failed while being driven
    Transport(String),
    /// The peer connection reached a terminal state
    ConnectionLost(ConnectionState),
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartReason::SessionCreate(e) => write!(f, "session creation failed: {}", e),
            RestartReason::Signaling(e) => write!(f, "signaling failed: {}", e),
            RestartReason::RemoteDescription(e) => write!(f, "remote description rejected: {}", e),
            RestartReason::Transport(e) => write!(f, "transport failed: {}", e),
            RestartReason::ConnectionLost(state) => write!(f, "connection {}", state),
        }
    }
}

/// Performs the restart. Production implementations do not return.
pub trait Restarter: Send + Sync {
    fn restart(&self, reason: &RestartReason);
}

/// Restarts the whole process
#[derive(Debug, Clone)]
pub struct ProcessRestarter {
    mode: RestartMode,
    exit_code: i32,
}

impl ProcessRestarter {
    pub fn new(config: &RestartConfig) -> Self {
        Self {
            mode: config.mode,
            exit_code: config.exit_code,
        }
    }

    #[cfg(unix)]
    fn exec_self(&self) -> std::io::Error {
        use std::os::unix::process::CommandExt;

        match std::env::current_exe() {
            Ok(exe) => std::process::Command::new(exe)
                .args(std::env::args_os().skip(1))
                .exec(),
            Err(e) => e,
        }
    }

    #[cfg(not(unix))]
    fn exec_self(&self) -> std::io::Error {
        let spawned = std::env::current_exe().and_then(|exe| {
            std::process::Command::new(exe)
                .args(std::env::args_os().skip(1))
                .spawn()
        });
        match spawned {
            Ok(_) => std::process::exit(0),
            Err(e) => e,
        }
    }
}

impl Restarter for ProcessRestarter {
    fn restart(&self, reason: &RestartReason) {
        match self.mode {
            RestartMode::Exec => {
                tracing::warn!(%reason, "Re-executing process");
                let e = self.exec_self();
                tracing::error!("Re-exec failed: {}; exiting with {}", e, self.exit_code);
                std::process::exit(self.exit_code);
            }
            RestartMode::Exit => {
                tracing::warn!(%reason, code = self.exit_code, "Exiting for supervisor restart");
                std::process::exit(self.exit_code);
            }
        }
    }
}

/// Latches the first restart request; later requests are ignored
#[derive(Debug, Default)]
pub struct RestartLatch {
    reason: Mutex<Option<RestartReason>>,
}

impl RestartLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true only for the request that set the latch
    pub fn trigger(&self, reason: RestartReason) -> bool {
        let mut slot = self.reason.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(reason);
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.reason.lock().is_some()
    }

    pub fn reason(&self) -> Option<RestartReason> {
        self.reason.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latch_fires_once() {
        let latch = RestartLatch::new();
        assert!(!latch.is_triggered());

        assert!(latch.trigger(RestartReason::Signaling("timeout".into())));
        assert!(!latch.trigger(RestartReason::ConnectionLost(ConnectionState::Closed)));

        assert_eq!(latch.reason(), Some(RestartReason::Signaling("timeout".into())));
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(
            RestartReason::ConnectionLost(ConnectionState::Disconnected).to_string(),
            "connection disconnected"
        );
    }
}
