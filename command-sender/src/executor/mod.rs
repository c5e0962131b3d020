//! Executor abstraction for the dispatcher
//!
//! This module handles:
//! - The three-phase contract a dispatcher drives for every claimed command
//! - The HTTP spacecraft client with its simulated uplink/downlink
//!
//! An `Err` from any phase is an executor failure and fails the command.
//! A `Verdict::Refused` is the executor answering "no", which also fails the
//! command but carries the executor's own reason.

mod http;

pub use http::{HttpExecutor, HttpExecutorConfig, SimulatedLink};

use async_trait::async_trait;
use telecommand_shared::{Command, CommandError, TransmitResponse};

/// Executor answer for the acknowledge and execute phases
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Refused(String),
}

/// Remote system that carries out telecommands
#[async_trait]
pub trait Executor: Send + Sync {
    /// Short label used in logs
    fn name(&self) -> &str;

    /// Deliver the command and return the executor's receipt
    async fn transmit(&self, command: &Command) -> Result<TransmitResponse, CommandError>;

    /// Decide whether the transmit receipt amounts to an acknowledgement
    async fn acknowledge(
        &self,
        command: &Command,
        receipt: &TransmitResponse,
    ) -> Result<Verdict, CommandError>;

    /// Wait for the final execution outcome
    async fn execute(&self, command: &Command) -> Result<Verdict, CommandError>;
}
