//! Command store: the single shared mutable resource
//!
//! This module handles:
//! - The narrow repository contract every dispatcher and producer goes through
//! - A durable SQLite implementation shared across processes
//! - An in-memory implementation for unit tests
//!
//! Every mutation is a conditional write guarded by the expected prior state.
//! A write that affects zero rows is reported as `Ok(false)`: somebody else
//! got there first, which callers treat as a normal outcome.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{Command, CommandState};
use crate::state_machine::StateUpdate;

/// Persistence contract for telecommands
#[async_trait]
pub trait CommandStore: Send + Sync {
    /// Insert a freshly created command
    async fn insert(&self, command: &Command) -> Result<(), StoreError>;

    /// Fetch one command by id
    async fn get(&self, id: Uuid) -> Result<Option<Command>, StoreError>;

    /// All commands, optionally filtered by state, newest first
    async fn list(&self, state: Option<CommandState>) -> Result<Vec<Command>, StoreError>;

    /// Ready commands in pickup order: priority, then age, then id
    async fn fetch_ready_ordered(&self) -> Result<Vec<Command>, StoreError>;

    /// Apply `update` only if the stored record still satisfies its guard.
    /// Returns whether a row changed.
    async fn advance(&self, id: Uuid, update: &StateUpdate) -> Result<bool, StoreError>;

    /// In-progress commands whose claim is older than `cutoff`
    async fn fetch_stale_claims(&self, cutoff: DateTime<Utc>) -> Result<Vec<Command>, StoreError>;

    /// Readiness probe; returns the number of stored commands
    async fn ping(&self) -> Result<u64, StoreError>;

    /// Create whatever backing structures the store needs. Idempotent.
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Claim a Ready command for `dispatcher_id`
    async fn try_claim(
        &self,
        id: Uuid,
        dispatcher_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.advance(id, &StateUpdate::claim(dispatcher_id, at)).await
    }

    /// Cancel a Ready command
    async fn try_cancel(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        self.advance(id, &StateUpdate::cancel(at)).await
    }
}

/// Apply the schema and probe the store until it answers, at most
/// `max_retries` attempts `retry_delay` apart.
/// Returns the number of stored commands.
pub async fn wait_until_ready(
    store: &dyn CommandStore,
    max_retries: u32,
    retry_delay: Duration,
) -> Result<u64, StoreError> {
    let max_retries = max_retries.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let probe = match store.ensure_schema().await {
            Ok(()) => store.ping().await,
            Err(e) => Err(e),
        };

        match probe {
            Ok(count) => {
                info!("[STORE] Ready with {} telecommands", count);
                return Ok(count);
            }
            Err(e) if attempt >= max_retries => {
                error!("[STORE] Not ready after {} attempts: {}", attempt, e);
                return Err(e);
            }
            Err(e) => {
                warn!("[STORE] Not ready ({}/{}): {}", attempt, max_retries, e);
                tokio::time::sleep(retry_delay).await;
            }
        }
    }
}


#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every `CommandStore` implementation must share

    use super::*;
    use crate::model::NewCommand;
    use crate::state_machine::LifecycleEvent;
    use chrono::Duration;
    use std::sync::Arc;

    fn command(name: &str, priority: i32, created_at: DateTime<Utc>) -> Command {
        NewCommand::named(name)
            .with_priority(priority)
            .into_command(created_at)
            .unwrap()
    }

    pub async fn insert_and_get<S: CommandStore>(store: &S) {
        let cmd = command("PING", 5, crate::now());
        store.insert(&cmd).await.unwrap();

        let loaded = store.get(cmd.id).await.unwrap().unwrap();
        assert_eq!(loaded, cmd);
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
        assert_eq!(store.ping().await.unwrap(), 1);
    }

    pub async fn ready_order<S: CommandStore>(store: &S) {
        let t0 = crate::now();
        let late_urgent = command("LATE_URGENT", 1, t0 + Duration::seconds(10));
        let early_normal = command("EARLY_NORMAL", 5, t0);
        let late_normal = command("LATE_NORMAL", 5, t0 + Duration::seconds(5));
        let claimed = command("CLAIMED", 0, t0);

        for cmd in [&late_normal, &claimed, &early_normal, &late_urgent] {
            store.insert(cmd).await.unwrap();
        }
        assert!(store.try_claim(claimed.id, "sender-1", t0).await.unwrap());

        let names: Vec<_> = store
            .fetch_ready_ordered()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["LATE_URGENT", "EARLY_NORMAL", "LATE_NORMAL"]);
    }

    pub async fn list_filters_newest_first<S: CommandStore>(store: &S) {
        let t0 = crate::now();
        let old = command("OLD", 5, t0);
        let new = command("NEW", 5, t0 + Duration::seconds(1));
        store.insert(&old).await.unwrap();
        store.insert(&new).await.unwrap();
        store.try_cancel(old.id, t0).await.unwrap();

        let all: Vec<_> = store.list(None).await.unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(all, vec!["NEW", "OLD"]);

        let cancelled = store.list(Some(CommandState::Cancelled)).await.unwrap();
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].id, old.id);
    }

    pub async fn guarded_advance<S: CommandStore>(store: &S) {
        let t0 = crate::now();
        let cmd = command("PING", 5, t0);
        store.insert(&cmd).await.unwrap();

        assert!(store.try_claim(cmd.id, "sender-1", t0).await.unwrap());
        // Second claim and a late cancel both observe zero rows
        assert!(!store.try_claim(cmd.id, "sender-2", t0).await.unwrap());
        assert!(!store.try_cancel(cmd.id, t0).await.unwrap());

        let confirm = StateUpdate::new(CommandState::Transmitted, LifecycleEvent::TransmitConfirmed, t0)
            .unwrap();
        assert!(store.advance(cmd.id, &confirm).await.unwrap());
        // transmitted_at is already set, so the same update cannot land twice
        assert!(!store.advance(cmd.id, &confirm).await.unwrap());

        let fail = StateUpdate::new(CommandState::Transmitted, LifecycleEvent::AcknowledgeFailed, t0)
            .unwrap()
            .with_error("no acknowledgement");
        assert!(store.advance(cmd.id, &fail).await.unwrap());

        let loaded = store.get(cmd.id).await.unwrap().unwrap();
        assert_eq!(loaded.state, CommandState::Failed);
        assert_eq!(loaded.claimed_by.as_deref(), Some("sender-1"));
        assert_eq!(loaded.claimed_at, Some(t0));
        assert_eq!(loaded.transmitted_at, Some(t0));
        assert!(loaded.acknowledged_at.is_none());
        assert_eq!(loaded.error_message.as_deref(), Some("no acknowledgement"));

        // Nothing leaves a terminal state
        let ack = StateUpdate::new(CommandState::Transmitted, LifecycleEvent::Acknowledge, t0).unwrap();
        assert!(!store.advance(cmd.id, &ack).await.unwrap());
        assert_eq!(store.get(cmd.id).await.unwrap().unwrap(), loaded);
    }

    pub async fn advance_unknown_id<S: CommandStore>(store: &S) {
        assert!(!store.try_claim(Uuid::new_v4(), "sender-1", crate::now()).await.unwrap());
    }

    pub async fn stale_claims<S: CommandStore>(store: &S) {
        let t0 = crate::now();
        let stale = command("STALE", 5, t0);
        let fresh = command("FRESH", 5, t0);
        let queued = command("QUEUED", 5, t0);
        for cmd in [&stale, &fresh, &queued] {
            store.insert(cmd).await.unwrap();
        }
        store.try_claim(stale.id, "sender-1", t0).await.unwrap();
        store
            .try_claim(fresh.id, "sender-2", t0 + Duration::seconds(600))
            .await
            .unwrap();

        let found = store
            .fetch_stale_claims(t0 + Duration::seconds(300))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, stale.id);
    }

    pub async fn exclusive_claim<S: CommandStore + 'static>(store: Arc<S>) {
        let cmd = command("PING", 5, crate::now());
        store.insert(&cmd).await.unwrap();
        let id = cmd.id;

        let attempts = (0..8).map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .try_claim(id, &format!("sender-{i}"), crate::now())
                    .await
                    .unwrap()
            })
        });
        let wins = futures::future::join_all(attempts)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap())
            .count();

        assert_eq!(wins, 1);
    }

    pub async fn claim_cancel_race<S: CommandStore + 'static>(store: Arc<S>) {
        let cmd = command("PING", 5, crate::now());
        store.insert(&cmd).await.unwrap();
        let id = cmd.id;

        let claim = {
            let store = store.clone();
            tokio::spawn(async move { store.try_claim(id, "sender-1", crate::now()).await.unwrap() })
        };
        let cancel = {
            let store = store.clone();
            tokio::spawn(async move { store.try_cancel(id, crate::now()).await.unwrap() })
        };
        let (claimed, cancelled) = (claim.await.unwrap(), cancel.await.unwrap());

        assert!(claimed ^ cancelled, "exactly one of claim/cancel must win");
        let state = store.get(cmd.id).await.unwrap().unwrap().state;
        if claimed {
            assert_eq!(state, CommandState::Transmitted);
        } else {
            assert_eq!(state, CommandState::Cancelled);
        }
    }
}
