//! Producer-side operations: create, inspect and cancel telecommands
//!
//! The producer never talks to a dispatcher. Everything goes through the
//! store, and cancellation is the same guarded write a dispatcher's claim
//! uses, so at most one of them can win.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::CommandError;
use crate::model::{Command, CommandState, NewCommand};
use crate::state_machine::LifecycleEvent;
use crate::store::CommandStore;

/// Ground-side handle on the command store
#[derive(Clone)]
pub struct Producer {
    store: Arc<dyn CommandStore>,
}

impl Producer {
    pub fn new(store: Arc<dyn CommandStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn CommandStore> {
        &self.store
    }

    /// Validate and enqueue a new command in `Ready`
    pub async fn create(&self, request: NewCommand) -> Result<Command, CommandError> {
        let command = request.into_command(crate::now())?;
        self.store.insert(&command).await?;

        info!(
            "[GROUND] Telecommand {} created: {} (priority {})",
            command.id, command.name, command.priority
        );
        Ok(command)
    }

    pub async fn get(&self, id: Uuid) -> Result<Command, CommandError> {
        self.store
            .get(id)
            .await?
            .ok_or(CommandError::NotFound(id))
    }

    /// All commands, optionally filtered by state, newest first
    pub async fn list(&self, state: Option<CommandState>) -> Result<Vec<Command>, CommandError> {
        let commands = self.store.list(state).await?;
        debug!("[GROUND] Listed {} telecommands (filter: {:?})", commands.len(), state);
        Ok(commands)
    }

    /// Cancel a `Ready` command.
    ///
    /// Fails with `InvalidTransition` naming the state actually found when the
    /// command has already moved on, including when a dispatcher claimed it
    /// between our read and our write.
    pub async fn cancel(&self, id: Uuid) -> Result<Command, CommandError> {
        let current = self.get(id).await?;
        if current.state != CommandState::Ready {
            warn!(
                "[GROUND] Refusing to cancel telecommand {} in {} state",
                id, current.state
            );
            return Err(CommandError::InvalidTransition {
                state: current.state,
                event: LifecycleEvent::Cancel,
            });
        }

        let at = current.stamp_time(crate::now());
        if self.store.try_cancel(id, at).await? {
            info!("[GROUND] Telecommand {} cancelled", id);
            return self.get(id).await;
        }

        // Lost the race; report what won
        let latest = self.get(id).await?;
        warn!(
            "[GROUND] Cancel of telecommand {} lost the race, now {}",
            id, latest.state
        );
        Err(CommandError::InvalidTransition {
            state: latest.state,
            event: LifecycleEvent::Cancel,
        })
    }
}
