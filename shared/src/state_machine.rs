//! Telecommand Lifecycle State Machine
//!
//! Defines valid lifecycle transitions and the guarded update each one is
//! persisted as. Every transition is written as "update where state = from",
//! so the state machine doubles as the cross-process concurrency contract.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::CommandError;
use crate::model::{Command, CommandState};

/// Events that can trigger lifecycle transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// Producer withdrew a queued command
    Cancel,
    /// A dispatcher took ownership of a queued command
    Claim,
    /// Executor accepted the transmitted payload
    TransmitConfirmed,
    /// Transmit returned an error or timed out
    TransmitFailed,
    /// Executor acknowledged receipt
    Acknowledge,
    /// Acknowledgement missing, negative or late
    AcknowledgeFailed,
    /// Executor reported successful execution
    Execute,
    /// Executor reported failed execution, or never reported
    ExecutionFailed,
    /// Claim held past the stale threshold by a dispatcher that never finished
    ClaimExpired,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            LifecycleEvent::Cancel => "cancel",
            LifecycleEvent::Claim => "claim",
            LifecycleEvent::TransmitConfirmed => "confirm transmission of",
            LifecycleEvent::TransmitFailed => "fail transmission of",
            LifecycleEvent::Acknowledge => "acknowledge",
            LifecycleEvent::AcknowledgeFailed => "fail acknowledgement of",
            LifecycleEvent::Execute => "execute",
            LifecycleEvent::ExecutionFailed => "fail execution of",
            LifecycleEvent::ClaimExpired => "expire claim on",
        };
        f.write_str(verb)
    }
}

/// Timestamp column written by a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stamp {
    ClaimedAt,
    TransmittedAt,
    AcknowledgedAt,
    ExecutedAt,
}

impl Stamp {
    /// Column name in the `telecommands` table
    pub fn column(&self) -> &'static str {
        match self {
            Stamp::ClaimedAt => "claimed_at",
            Stamp::TransmittedAt => "transmitted_at",
            Stamp::AcknowledgedAt => "acknowledged_at",
            Stamp::ExecutedAt => "executed_at",
        }
    }

    pub fn get(&self, command: &Command) -> Option<DateTime<Utc>> {
        match self {
            Stamp::ClaimedAt => command.claimed_at,
            Stamp::TransmittedAt => command.transmitted_at,
            Stamp::AcknowledgedAt => command.acknowledged_at,
            Stamp::ExecutedAt => command.executed_at,
        }
    }

    fn slot<'a>(&self, command: &'a mut Command) -> &'a mut Option<DateTime<Utc>> {
        match self {
            Stamp::ClaimedAt => &mut command.claimed_at,
            Stamp::TransmittedAt => &mut command.transmitted_at,
            Stamp::AcknowledgedAt => &mut command.acknowledged_at,
            Stamp::ExecutedAt => &mut command.executed_at,
        }
    }
}

impl LifecycleEvent {
    /// Timestamp recorded when this event is applied
    pub fn stamp(&self) -> Option<Stamp> {
        match self {
            LifecycleEvent::Claim => Some(Stamp::ClaimedAt),
            LifecycleEvent::TransmitConfirmed => Some(Stamp::TransmittedAt),
            LifecycleEvent::Acknowledge => Some(Stamp::AcknowledgedAt),
            LifecycleEvent::Execute | LifecycleEvent::ExecutionFailed => Some(Stamp::ExecutedAt),
            LifecycleEvent::Cancel
            | LifecycleEvent::TransmitFailed
            | LifecycleEvent::AcknowledgeFailed
            | LifecycleEvent::ClaimExpired => None,
        }
    }
}

/// Get the next state for an event, if the transition is valid
pub fn next_state(from: CommandState, event: LifecycleEvent) -> Option<CommandState> {
    use CommandState::*;
    use LifecycleEvent::*;

    match (from, event) {
        // From Ready
        (Ready, Cancel) => Some(Cancelled),
        (Ready, Claim) => Some(Transmitted),

        // From Transmitted (the claim marker until the executor confirms)
        (Transmitted, TransmitConfirmed) => Some(Transmitted),
        (Transmitted, TransmitFailed) => Some(Failed),
        (Transmitted, Acknowledge) => Some(Acknowledged),
        (Transmitted, AcknowledgeFailed) => Some(Failed),

        // From Acknowledged
        (Acknowledged, Execute) => Some(Executed),
        (Acknowledged, ExecutionFailed) => Some(Failed),

        // Abandoned claims can be failed from either in-progress state
        (Transmitted | Acknowledged, ClaimExpired) => Some(Failed),

        // Terminal states and everything else
        _ => None,
    }
}

/// A validated transition, ready to be written as a conditional update
#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate {
    pub event: LifecycleEvent,
    pub from: CommandState,
    pub to: CommandState,
    pub at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub claimed_by: Option<String>,
}

impl StateUpdate {
    /// Build the update for `event` applied to a command currently in `from`
    pub fn new(
        from: CommandState,
        event: LifecycleEvent,
        at: DateTime<Utc>,
    ) -> Result<Self, CommandError> {
        let to = next_state(from, event)
            .ok_or(CommandError::InvalidTransition { state: from, event })?;

        Ok(Self {
            event,
            from,
            to,
            at,
            error_message: None,
            claimed_by: None,
        })
    }

    /// `Ready -> Transmitted` on behalf of `dispatcher_id`
    pub fn claim(dispatcher_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            event: LifecycleEvent::Claim,
            from: CommandState::Ready,
            to: CommandState::Transmitted,
            at,
            error_message: None,
            claimed_by: Some(dispatcher_id.into()),
        }
    }

    /// `Ready -> Cancelled`
    pub fn cancel(at: DateTime<Utc>) -> Self {
        Self {
            event: LifecycleEvent::Cancel,
            from: CommandState::Ready,
            to: CommandState::Cancelled,
            at,
            error_message: None,
            claimed_by: None,
        }
    }

    /// Attach an error message; only persisted when entering `Failed`
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn stamp(&self) -> Option<Stamp> {
        self.event.stamp()
    }

    /// Error message to persist, if this update enters `Failed`
    pub fn failure_message(&self) -> Option<&str> {
        match self.to {
            CommandState::Failed => self.error_message.as_deref(),
            _ => None,
        }
    }

    /// Whether the guard holds: expected prior state and an unset stamp column
    pub fn guard_matches(&self, command: &Command) -> bool {
        command.state == self.from
            && self.stamp().map_or(true, |stamp| stamp.get(command).is_none())
    }

    /// Apply to an in-memory record; returns false without mutating if the
    /// guard does not hold
    pub fn apply(&self, command: &mut Command) -> bool {
        if !self.guard_matches(command) {
            return false;
        }

        command.state = self.to;
        if let Some(stamp) = self.stamp() {
            *stamp.slot(command) = Some(self.at);
        }
        if let Some(message) = self.failure_message() {
            command.error_message = Some(message.to_string());
        }
        if let Some(dispatcher_id) = &self.claimed_by {
            command.claimed_by = Some(dispatcher_id.clone());
        }
        true
    }
}
