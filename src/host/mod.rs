//! Host module for miner process supervision and output relay

pub mod ansi;
pub mod relay;
pub mod supervisor;

pub use relay::{DrainMode, RelayItem, RelayPoller, RelaySender, POLL_INTERVAL};
pub use supervisor::{
    ProcessHandle, ProcessSupervisor, SupervisorError, TerminalStatus,
    DEFAULT_STOP_TIMEOUT,
};
