//! In-memory command store
//!
//! Applies the same guarded-update rules as the SQL store under a single
//! write lock. Used by unit tests across the workspace.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::CommandStore;
use crate::error::StoreError;
use crate::model::{Command, CommandState};
use crate::state_machine::StateUpdate;

/// Command store backed by a `HashMap`
#[derive(Debug, Default)]
pub struct MemoryStore {
    commands: Arc<RwLock<HashMap<Uuid, Command>>>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with `StoreError::Offline` until cleared
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Offline("memory store marked offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CommandStore for MemoryStore {
    async fn insert(&self, command: &Command) -> Result<(), StoreError> {
        self.check_online()?;
        let mut commands = self.commands.write().await;
        if commands.contains_key(&command.id) {
            return Err(StoreError::Corrupt {
                id: command.id.to_string(),
                reason: "duplicate id".into(),
            });
        }
        commands.insert(command.id, command.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Command>, StoreError> {
        self.check_online()?;
        Ok(self.commands.read().await.get(&id).cloned())
    }

    async fn list(&self, state: Option<CommandState>) -> Result<Vec<Command>, StoreError> {
        self.check_online()?;
        let commands = self.commands.read().await;
        let mut listed: Vec<Command> = commands
            .values()
            .filter(|c| state.map_or(true, |s| c.state == s))
            .cloned()
            .collect();
        listed.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(listed)
    }

    async fn fetch_ready_ordered(&self) -> Result<Vec<Command>, StoreError> {
        self.check_online()?;
        let commands = self.commands.read().await;
        let mut ready: Vec<Command> = commands
            .values()
            .filter(|c| c.state == CommandState::Ready)
            .cloned()
            .collect();
        ready.sort_by_key(Command::pickup_key);
        Ok(ready)
    }

    async fn advance(&self, id: Uuid, update: &StateUpdate) -> Result<bool, StoreError> {
        self.check_online()?;
        let mut commands = self.commands.write().await;
        Ok(commands
            .get_mut(&id)
            .map_or(false, |command| update.apply(command)))
    }

    async fn fetch_stale_claims(&self, cutoff: DateTime<Utc>) -> Result<Vec<Command>, StoreError> {
        self.check_online()?;
        let commands = self.commands.read().await;
        let mut stale: Vec<Command> = commands
            .values()
            .filter(|c| c.state.is_in_progress() && c.claimed_at.map_or(false, |t| t < cutoff))
            .cloned()
            .collect();
        stale.sort_by_key(|c| c.claimed_at);
        Ok(stale)
    }

    async fn ping(&self) -> Result<u64, StoreError> {
        self.check_online()?;
        Ok(self.commands.read().await.len() as u64)
    }
}
