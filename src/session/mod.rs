//! Session lifecycle: state machine, outbound audio task, restart

pub mod coordinator;
pub mod restart;
pub mod send_task;

pub use coordinator::{Coordinator, CoordinatorSettings, SessionContext, SessionStats};
pub use restart::{ProcessRestarter, RestartLatch, RestartReason, Restarter};
pub use send_task::{AudioSendTask, SendTaskSnapshot, SendTaskStats};
