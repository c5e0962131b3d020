//! Telecommand record and create request

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{CommandError, UnknownState};

/// Priority assigned when a create request omits one (lower = more urgent)
pub const DEFAULT_PRIORITY: i32 = 5;

/// Maximum command name length, matching the `telecommands.name` column
pub const MAX_NAME_LEN: usize = 100;

/// Lifecycle state of a telecommand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandState {
    /// Queued, waiting for a dispatcher
    Ready,
    /// Claimed by a dispatcher and handed to the executor
    Transmitted,
    /// Receipt confirmed by the executor
    Acknowledged,
    Executed,
    Failed,
    Cancelled,
}

impl CommandState {
    pub const ALL: [CommandState; 6] = [
        CommandState::Ready,
        CommandState::Transmitted,
        CommandState::Acknowledged,
        CommandState::Executed,
        CommandState::Failed,
        CommandState::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandState::Ready => "Ready",
            CommandState::Transmitted => "Transmitted",
            CommandState::Acknowledged => "Acknowledged",
            CommandState::Executed => "Executed",
            CommandState::Failed => "Failed",
            CommandState::Cancelled => "Cancelled",
        }
    }

    /// No transition leaves a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CommandState::Executed | CommandState::Failed | CommandState::Cancelled
        )
    }

    /// Claimed by a dispatcher but not yet finished
    pub fn is_in_progress(&self) -> bool {
        matches!(self, CommandState::Transmitted | CommandState::Acknowledged)
    }
}

impl fmt::Display for CommandState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| UnknownState(s.to_string()))
    }
}

/// A telecommand as persisted in the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: Uuid,
    #[serde(rename = "command_name")]
    pub name: String,
    pub parameters: Map<String, Value>,
    pub priority: i32,
    pub operator_id: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "status")]
    pub state: CommandState,
    pub created_at: DateTime<Utc>,
    pub transmitted_at: Option<DateTime<Utc>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
}

impl Command {
    /// Latest timestamp recorded on this command
    pub fn latest_timestamp(&self) -> DateTime<Utc> {
        [
            self.claimed_at,
            self.transmitted_at,
            self.acknowledged_at,
            self.executed_at,
        ]
        .into_iter()
        .flatten()
        .fold(self.created_at, |latest, t| latest.max(t))
    }

    /// Time to stamp the next transition with, never earlier than any
    /// timestamp already on the record
    pub fn stamp_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.max(self.latest_timestamp())
    }

    /// Sort key for Ready pickup: priority, then age, then id
    pub fn pickup_key(&self) -> (i32, DateTime<Utc>, Uuid) {
        (self.priority, self.created_at, self.id)
    }
}

/// Request to create a telecommand
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewCommand {
    #[serde(rename = "command_name", default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parameters: Option<Value>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub operator_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewCommand {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = Some(parameters);
        self
    }

    /// Validate the request and build a `Ready` command created at `at`
    pub fn into_command(self, at: DateTime<Utc>) -> Result<Command, CommandError> {
        let name = match self.name {
            Some(name) if !name.trim().is_empty() => name,
            _ => return Err(CommandError::Validation("Missing command_name".into())),
        };
        if name.chars().count() > MAX_NAME_LEN {
            return Err(CommandError::Validation(format!(
                "command_name exceeds {} characters",
                MAX_NAME_LEN
            )));
        }

        let parameters = match self.parameters {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(CommandError::Validation(format!(
                    "parameters must be a JSON object, got {}",
                    json_kind(&other)
                )))
            }
        };

        Ok(Command {
            id: Uuid::new_v4(),
            name,
            parameters,
            priority: self.priority.unwrap_or(DEFAULT_PRIORITY),
            operator_id: self.operator_id,
            description: self.description,
            state: CommandState::Ready,
            created_at: at,
            transmitted_at: None,
            acknowledged_at: None,
            executed_at: None,
            error_message: None,
            claimed_by: None,
            claimed_at: None,
        })
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
