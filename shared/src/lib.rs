//! Telecommand Shared Types
//!
//! This crate provides the command model, lifecycle state machine and store
//! contract shared by the ground station, the command sender and the
//! spacecraft simulator.

pub mod config;
pub mod error;
pub mod model;
pub mod producer;
pub mod protocol;
pub mod state_machine;
pub mod store;

use chrono::{DateTime, Utc};

// Re-export commonly used types at crate root
pub use error::{CommandError, StoreError};
pub use model::{Command, CommandState, NewCommand};
pub use producer::Producer;
pub use protocol::{Phase, TransmitRequest, TransmitResponse};
pub use state_machine::{LifecycleEvent, StateUpdate};
pub use store::{CommandStore, MemoryStore, SqliteStore};

/// Current wall-clock time, truncated to microseconds (the store's resolution)
pub fn now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now)
}

/// Timing parameters for the system
pub mod timing {
    /// Delay between dispatcher poll cycles in milliseconds
    pub const POLL_INTERVAL_MS: u64 = 1000;

    /// Ceiling for the backoff applied after a failed poll cycle
    pub const MAX_BACKOFF_MS: u64 = 30_000;

    /// Transmit phase timeout, covering the simulated uplink delay
    pub const TRANSMIT_TIMEOUT_MS: u64 = 45_000;

    /// Per-request timeout for the HTTP call to the spacecraft
    pub const HTTP_REQUEST_TIMEOUT_MS: u64 = 10_000;

    /// Acknowledge phase timeout
    pub const ACK_TIMEOUT_MS: u64 = 15_000;

    /// Execute phase timeout
    pub const EXECUTE_TIMEOUT_MS: u64 = 30_000;

    /// Age after which an unfinished claim is considered abandoned
    pub const STALE_CLAIM_AFTER_MS: u64 = 300_000;

    /// Store readiness probes before a service gives up
    pub const STORE_CONNECT_MAX_RETRIES: u32 = 60;

    /// Delay between store readiness probes
    pub const STORE_RETRY_DELAY_MS: u64 = 5000;

    /// Probability that the simulated spacecraft executes a command successfully
    pub const SIMULATED_SUCCESS_RATE: f64 = 0.85;
}
