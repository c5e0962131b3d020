//! Telecommand handling on board the spacecraft
//!
//! This module handles:
//! - Receiving and validating telecommands from the command sender
//! - Simulating on-board handling time
//! - Generating receipts

mod receiver;

pub use receiver::{unix_seconds, CommandReceiver, CommandResult};
