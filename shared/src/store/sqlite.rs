//! SQLite command store
//!
//! One `telecommands` table keyed by `id`. Timestamps are INTEGER
//! microseconds since the Unix epoch so ordering in SQL is numeric.
//! Several processes may open the same database file; the guarded
//! `UPDATE ... WHERE id = ? AND state = ?` is what keeps them apart.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row, Sqlite};
use tracing::{debug, warn};
use uuid::Uuid;

use super::CommandStore;
use crate::error::StoreError;
use crate::model::{Command, CommandState};
use crate::state_machine::StateUpdate;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS telecommands (
    id              TEXT PRIMARY KEY NOT NULL,
    name            TEXT NOT NULL,
    parameters      TEXT NOT NULL DEFAULT '{}',
    priority        INTEGER NOT NULL DEFAULT 5,
    operator_id     TEXT,
    description     TEXT,
    state           TEXT NOT NULL,
    created_at      INTEGER NOT NULL,
    transmitted_at  INTEGER,
    acknowledged_at INTEGER,
    executed_at     INTEGER,
    error_message   TEXT,
    claimed_by      TEXT,
    claimed_at      INTEGER
)
"#;

const PICKUP_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_telecommands_pickup \
     ON telecommands (state, priority, created_at)";

const COLUMNS: &str = "id, name, parameters, priority, operator_id, description, state, \
     created_at, transmitted_at, acknowledged_at, executed_at, error_message, claimed_by, claimed_at";

/// Command store backed by a SQLite database
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open a pool for `database_url` without touching the database yet.
    /// Reachability is established by `ping` or `ensure_schema`.
    pub fn connect_lazy(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy_with(options);

        Ok(Self { pool })
    }

    /// Private in-memory database with the schema applied
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        // A single long-lived connection: the database vanishes with it
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn fetch_where(
        &self,
        clause: &str,
        state: Option<CommandState>,
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<Vec<Command>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM telecommands {clause}");
        let mut query = sqlx::query::<Sqlite>(&sql);
        if let Some(state) = state {
            query = query.bind(state.as_str());
        }
        if let Some(cutoff) = cutoff {
            query = query.bind(cutoff.timestamp_micros());
        }

        let rows = query.fetch_all(&self.pool).await?;
        let mut commands = Vec::with_capacity(rows.len());
        for row in &rows {
            match decode_row(row) {
                Ok(command) => commands.push(command),
                // One bad record must not hide the rest
                Err(StoreError::Corrupt { id, reason }) => {
                    warn!("[STORE] Skipping corrupt telecommand {}: {}", id, reason);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(commands)
    }
}

#[async_trait]
impl CommandStore for SqliteStore {
    async fn insert(&self, command: &Command) -> Result<(), StoreError> {
        let parameters = Value::Object(command.parameters.clone()).to_string();

        sqlx::query(&format!(
            "INSERT INTO telecommands ({COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(command.id.to_string())
        .bind(&command.name)
        .bind(parameters)
        .bind(command.priority)
        .bind(command.operator_id.as_deref())
        .bind(command.description.as_deref())
        .bind(command.state.as_str())
        .bind(command.created_at.timestamp_micros())
        .bind(command.transmitted_at.map(|t| t.timestamp_micros()))
        .bind(command.acknowledged_at.map(|t| t.timestamp_micros()))
        .bind(command.executed_at.map(|t| t.timestamp_micros()))
        .bind(command.error_message.as_deref())
        .bind(command.claimed_by.as_deref())
        .bind(command.claimed_at.map(|t| t.timestamp_micros()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Command>, StoreError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM telecommands WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(decode_row).transpose()
    }

    async fn list(&self, state: Option<CommandState>) -> Result<Vec<Command>, StoreError> {
        let clause = match state {
            Some(_) => "WHERE state = ? ORDER BY created_at DESC, id DESC",
            None => "ORDER BY created_at DESC, id DESC",
        };
        self.fetch_where(clause, state, None).await
    }

    async fn fetch_ready_ordered(&self) -> Result<Vec<Command>, StoreError> {
        self.fetch_where(
            "WHERE state = ? ORDER BY priority ASC, created_at ASC, id ASC",
            Some(CommandState::Ready),
            None,
        )
        .await
    }

    async fn advance(&self, id: Uuid, update: &StateUpdate) -> Result<bool, StoreError> {
        let stamp = update.stamp().map(|s| s.column());

        let mut sql = String::from(
            "UPDATE telecommands SET state = ?, \
             error_message = COALESCE(?, error_message), \
             claimed_by = COALESCE(?, claimed_by)",
        );
        if let Some(column) = stamp {
            sql.push_str(&format!(", {column} = ?"));
        }
        sql.push_str(" WHERE id = ? AND state = ?");
        if let Some(column) = stamp {
            sql.push_str(&format!(" AND {column} IS NULL"));
        }

        let mut query = sqlx::query::<Sqlite>(&sql)
            .bind(update.to.as_str())
            .bind(update.failure_message())
            .bind(update.claimed_by.as_deref());
        if stamp.is_some() {
            query = query.bind(update.at.timestamp_micros());
        }
        let result = query
            .bind(id.to_string())
            .bind(update.from.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn fetch_stale_claims(&self, cutoff: DateTime<Utc>) -> Result<Vec<Command>, StoreError> {
        self.fetch_where(
            "WHERE state IN ('Transmitted', 'Acknowledged') AND claimed_at < ? \
             ORDER BY claimed_at ASC",
            None,
            Some(cutoff),
        )
        .await
    }

    /// Create the table and pickup index if missing
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        sqlx::query(PICKUP_INDEX).execute(&self.pool).await?;
        debug!("telecommands schema ready");
        Ok(())
    }

    async fn ping(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM telecommands")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

fn decode_row(row: &SqliteRow) -> Result<Command, StoreError> {
    let raw_id: String = row.try_get("id")?;
    let corrupt = |reason: String| StoreError::Corrupt {
        id: raw_id.clone(),
        reason,
    };

    let id = Uuid::parse_str(&raw_id).map_err(|e| corrupt(e.to_string()))?;

    let raw_parameters: String = row.try_get("parameters")?;
    let parameters: Map<String, Value> =
        serde_json::from_str(&raw_parameters).map_err(|e| corrupt(format!("parameters: {e}")))?;

    let raw_state: String = row.try_get("state")?;
    let state = raw_state
        .parse::<CommandState>()
        .map_err(|e| corrupt(e.to_string()))?;

    let created_at = from_micros(row.try_get("created_at")?)
        .ok_or_else(|| corrupt("created_at out of range".into()))?;

    let optional_time = |column: &str| -> Result<Option<DateTime<Utc>>, StoreError> {
        match row.try_get::<Option<i64>, _>(column)? {
            None => Ok(None),
            Some(micros) => from_micros(micros)
                .map(Some)
                .ok_or_else(|| corrupt(format!("{column} out of range"))),
        }
    };

    Ok(Command {
        id,
        name: row.try_get("name")?,
        parameters,
        priority: row.try_get("priority")?,
        operator_id: row.try_get("operator_id")?,
        description: row.try_get("description")?,
        state,
        created_at,
        transmitted_at: optional_time("transmitted_at")?,
        acknowledged_at: optional_time("acknowledged_at")?,
        executed_at: optional_time("executed_at")?,
        error_message: row.try_get("error_message")?,
        claimed_by: row.try_get("claimed_by")?,
        claimed_at: optional_time("claimed_at")?,
    })
}

fn from_micros(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
}
