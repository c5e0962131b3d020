//! Error taxonomy for producer, dispatcher and store operations

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::model::CommandState;
use crate::protocol::Phase;
use crate::state_machine::LifecycleEvent;

/// Errors raised by the persistence layer
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt telecommand record {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("Store offline: {0}")]
    Offline(String),
}

/// Errors surfaced by command lifecycle operations
#[derive(Error, Debug)]
pub enum CommandError {
    /// Malformed create request
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Telecommand {0} not found")]
    NotFound(Uuid),

    /// State guard violation; the record is left untouched
    #[error("Cannot {event} telecommand in {state} state")]
    InvalidTransition {
        state: CommandState,
        event: LifecycleEvent,
    },

    #[error("Executor unavailable: {0}")]
    ExecutorUnavailable(String),

    #[error("Executor timed out during {phase} after {after:?}")]
    ExecutorTimeout { phase: Phase, after: Duration },

    /// Fatal to the current poll cycle, never to the dispatcher
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl CommandError {
    /// Executor failures terminate the command rather than the cycle
    pub fn is_executor_failure(&self) -> bool {
        matches!(
            self,
            CommandError::ExecutorUnavailable(_) | CommandError::ExecutorTimeout { .. }
        )
    }
}

/// A state name that is not part of the closed lifecycle set
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown telecommand state: {0}")]
pub struct UnknownState(pub String);
