//! Main loop
//!
//! Single-threaded cooperative scheduler: every tick advances the
//! coordinator, forwards user input and sleeps out the rest of the tick.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::session::{Coordinator, RestartReason};
use crate::ui::StatusBoard;

pub struct MainLoop {
    coordinator: Coordinator,
    status: Arc<StatusBoard>,
    tick: Duration,
    monitor_interval: Option<Duration>,
    last_report: Instant,
    ticks: u64,
}

impl MainLoop {
    pub fn new(coordinator: Coordinator, status: Arc<StatusBoard>, tick: Duration) -> Self {
        Self {
            coordinator,
            status,
            tick,
            monitor_interval: None,
            last_report: Instant::now(),
            ticks: 0,
        }
    }

    /// Log pipeline statistics every `interval`
    pub fn with_monitor(mut self, interval: Duration) -> Self {
        self.monitor_interval = Some(interval);
        self
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Run one tick without sleeping; returns the restart reason once the
    /// session has failed
    pub fn step(&mut self) -> Option<RestartReason> {
        self.ticks += 1;
        self.coordinator.tick();

        while let Some(input) = self.status.try_input() {
            self.coordinator.handle_input(input);
        }

        if let Some(interval) = self.monitor_interval {
            if self.last_report.elapsed() >= interval {
                self.last_report = Instant::now();
                self.report();
            }
        }

        self.coordinator.restart_reason()
    }

    /// Tick until a restart is latched
    pub fn run(mut self) -> RestartReason {
        tracing::info!(tick_ms = self.tick.as_millis() as u64, "Main loop started");

        loop {
            let started = Instant::now();
            if let Some(reason) = self.step() {
                tracing::warn!(%reason, ticks = self.ticks, "Main loop exiting");
                return reason;
            }

            let elapsed = started.elapsed();
            if elapsed < self.tick {
                thread::sleep(self.tick - elapsed);
            } else {
                tracing::trace!(elapsed_ms = elapsed.as_millis() as u64, "Tick overran");
            }
        }
    }

    fn report(&self) {
        let stats = self.coordinator.stats();
        tracing::info!(
            state = %self.coordinator.state(),
            frames_sent = stats.send.frames_sent,
            capture_errors = stats.send.capture_errors,
            frames_played = stats.frames_played,
            dropped_inbound = stats.frames_dropped_inbound,
            dropped_outbound = stats.frames_dropped_outbound,
            transcripts = stats.transcripts,
            signaling_rtt_ms = stats.signaling_round_trip.map(|d| d.as_millis() as u64),
            "Stats"
        );
    }
}
