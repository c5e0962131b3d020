//! Command receiver - validates incoming telecommands and issues receipts

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::Serialize;
use telecommand_shared::config::SecsRange;
use telecommand_shared::{TransmitRequest, TransmitResponse};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// How many receipts the receiver remembers
const RECENT_LIMIT: usize = 100;

/// Result of receiving a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// Command accepted for execution
    Received,
    /// Command refused before execution
    Rejected { message: String },
}

/// A command the spacecraft has seen
#[derive(Debug, Clone, Serialize)]
pub struct ReceivedCommand {
    pub command_id: Uuid,
    pub command_name: String,
    pub status: String,
    pub processing_ms: u64,
    pub timestamp: f64,
}

/// Receives telecommands from the command sender
pub struct CommandReceiver {
    processing_delay: SecsRange,
    received_total: AtomicU64,
    recent: Arc<RwLock<Vec<ReceivedCommand>>>,
}

impl CommandReceiver {
    pub fn new(processing_delay: SecsRange) -> Self {
        Self {
            processing_delay,
            received_total: AtomicU64::new(0),
            recent: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Number of commands received since start
    pub fn received_total(&self) -> u64 {
        self.received_total.load(Ordering::SeqCst)
    }

    /// Most recent receipts, oldest first
    pub async fn recent(&self) -> Vec<ReceivedCommand> {
        self.recent.read().await.clone()
    }

    /// Validate a command, simulate on-board handling time and build the receipt
    pub async fn receive(&self, request: &TransmitRequest) -> (CommandResult, TransmitResponse) {
        let start = Instant::now();
        info!(
            "[SPACECRAFT] Received command {} ({}) with {} parameters",
            request.command_name,
            request.command_id,
            request.parameters.len()
        );

        let result = if request.command_name.trim().is_empty() {
            CommandResult::Rejected {
                message: "Missing command_name".into(),
            }
        } else {
            tokio::time::sleep(self.handling_time()).await;
            CommandResult::Received
        };

        let timestamp = unix_seconds();
        let response = match &result {
            CommandResult::Received => {
                TransmitResponse::received(request.command_name.clone(), timestamp)
            }
            CommandResult::Rejected { message } => {
                warn!("[SPACECRAFT] Rejected {}: {}", request.command_id, message);
                TransmitResponse::rejected(request.command_name.clone(), message.clone(), timestamp)
            }
        };

        self.received_total.fetch_add(1, Ordering::SeqCst);
        self.remember(ReceivedCommand {
            command_id: request.command_id,
            command_name: request.command_name.clone(),
            status: response.status.clone(),
            processing_ms: start.elapsed().as_millis() as u64,
            timestamp,
        })
        .await;

        info!("[SPACECRAFT] Sent response: {}", response.status);
        (result, response)
    }

    fn handling_time(&self) -> Duration {
        let range = self.processing_delay;
        let secs = if range.max > range.min {
            rand::rng().random_range(range.min..=range.max)
        } else {
            range.min
        };
        Duration::from_secs_f64(secs)
    }

    async fn remember(&self, command: ReceivedCommand) {
        let mut recent = self.recent.write().await;
        recent.push(command);
        if recent.len() > RECENT_LIMIT {
            let excess = recent.len() - RECENT_LIMIT;
            recent.drain(..excess);
        }
    }
}

/// Seconds since the Unix epoch, as the receipts report them
pub fn unix_seconds() -> f64 {
    telecommand_shared::now().timestamp_micros() as f64 / 1_000_000.0
}
