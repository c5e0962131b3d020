//! Wire types exchanged between the command sender and the spacecraft

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::model::Command;

/// Receipt status reported by a spacecraft that accepted a command
pub const STATUS_RECEIVED: &str = "received";

/// Receipt status reported by a spacecraft that refused a command
pub const STATUS_REJECTED: &str = "rejected";

/// The three executor phases driven for every claimed command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Transmit,
    Acknowledge,
    Execute,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Transmit => write!(f, "transmit"),
            Phase::Acknowledge => write!(f, "acknowledge"),
            Phase::Execute => write!(f, "execute"),
        }
    }
}

/// Payload delivered to the spacecraft on transmit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransmitRequest {
    pub command_id: Uuid,
    pub command_name: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl From<&Command> for TransmitRequest {
    fn from(command: &Command) -> Self {
        Self {
            command_id: command.id,
            command_name: command.name.clone(),
            parameters: command.parameters.clone(),
        }
    }
}

/// Spacecraft response to a transmit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransmitResponse {
    pub status: String,
    pub command: String,
    #[serde(default)]
    pub message: String,
    /// Seconds since the Unix epoch on the spacecraft clock
    pub timestamp: f64,
}

impl TransmitResponse {
    /// Create a response confirming receipt of `command`
    pub fn received(command: impl Into<String>, timestamp: f64) -> Self {
        Self {
            status: STATUS_RECEIVED.into(),
            command: command.into(),
            message: "Command received by spacecraft".into(),
            timestamp,
        }
    }

    /// Create a response refusing `command`
    pub fn rejected(command: impl Into<String>, message: impl Into<String>, timestamp: f64) -> Self {
        Self {
            status: STATUS_REJECTED.into(),
            command: command.into(),
            message: message.into(),
            timestamp,
        }
    }

    pub fn is_received(&self) -> bool {
        self.status == STATUS_RECEIVED
    }
}
