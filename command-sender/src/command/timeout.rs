//! Per-phase timeouts for executor calls

use std::future::Future;
use std::time::Duration;

use telecommand_shared::{timing, CommandError, Phase};
use tokio::time::timeout;

/// Upper bound on each executor phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTimeouts {
    pub transmit: Duration,
    pub acknowledge: Duration,
    pub execute: Duration,
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        Self {
            transmit: Duration::from_millis(timing::TRANSMIT_TIMEOUT_MS),
            acknowledge: Duration::from_millis(timing::ACK_TIMEOUT_MS),
            execute: Duration::from_millis(timing::EXECUTE_TIMEOUT_MS),
        }
    }
}

impl PhaseTimeouts {
    /// Same limit for every phase
    pub fn uniform(limit: Duration) -> Self {
        Self {
            transmit: limit,
            acknowledge: limit,
            execute: limit,
        }
    }

    pub fn for_phase(&self, phase: Phase) -> Duration {
        match phase {
            Phase::Transmit => self.transmit,
            Phase::Acknowledge => self.acknowledge,
            Phase::Execute => self.execute,
        }
    }

    /// Longest a single command can spend with the executor
    pub fn total(&self) -> Duration {
        self.transmit + self.acknowledge + self.execute
    }

    /// Run one phase, turning an elapsed deadline into `ExecutorTimeout`
    pub async fn run<T, F>(&self, phase: Phase, call: F) -> Result<T, CommandError>
    where
        F: Future<Output = Result<T, CommandError>>,
    {
        let after = self.for_phase(phase);
        match timeout(after, call).await {
            Ok(result) => result,
            Err(_) => Err(CommandError::ExecutorTimeout { phase, after }),
        }
    }
}
