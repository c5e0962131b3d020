//! Command dispatch for the sender
//!
//! This module handles:
//! - Polling the store for Ready commands in pickup order
//! - Claiming them through the guarded store update
//! - Driving each claim through transmit, acknowledge and execute
//! - Failing claims abandoned by crashed dispatchers

mod dispatcher;
mod timeout;

pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use timeout::PhaseTimeouts;
