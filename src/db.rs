use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use libsql::{Builder, Connection, Value};
use tracing::{debug, warn};

use crate::models::NotificationState;
use crate::state::StateStore;

/// libsql-backed state, one row per scope ("rating", "reminder").
pub struct Database {
    conn: Connection,
    scope: String,
    db_type: &'static str,
}

impl Database {
    pub async fn open(path: &Path, scope: &str) -> Result<Self> {
        let db = Builder::new_local(path)
            .build()
            .await
            .context("Failed to open database")?;
        Self::from_db(db, scope, "sqlite").await
    }

    pub async fn open_turso(url: &str, auth_token: &str, scope: &str) -> Result<Self> {
        let db = Builder::new_remote(url.to_string(), auth_token.to_string())
            .build()
            .await
            .context("Failed to connect to Turso database")?;
        Self::from_db(db, scope, "turso").await
    }

    #[cfg(test)]
    pub async fn open_in_memory(scope: &str) -> Result<Self> {
        let db = Builder::new_local(":memory:")
            .build()
            .await
            .context("Failed to open in-memory database")?;
        Self::from_db(db, scope, "memory").await
    }

    async fn from_db(db: libsql::Database, scope: &str, db_type: &'static str) -> Result<Self> {
        let conn = db.connect().context("Failed to connect to database")?;
        let store = Self {
            conn,
            scope: scope.to_string(),
            db_type,
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS notification_state (
                    scope TEXT PRIMARY KEY,
                    last_contest_id TEXT,
                    last_date TEXT,
                    updated_at TEXT NOT NULL
                )",
                (),
            )
            .await
            .context("Failed to create notification_state table")?;

        debug!(scope = %self.scope, "Database schema initialized");
        Ok(())
    }

    async fn read_state(&self) -> Result<NotificationState> {
        let mut rows = self
            .conn
            .query(
                "SELECT last_contest_id, last_date FROM notification_state WHERE scope = ?1",
                vec![Value::Text(self.scope.clone())],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(NotificationState::default());
        };

        let contest_id = text_value(row.get_value(0)?);
        let date = match text_value(row.get_value(1)?) {
            Some(raw) => match NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
                Ok(d) => Some(d),
                Err(e) => {
                    warn!(scope = %self.scope, raw = %raw, error = %e, "Ignoring unreadable date");
                    None
                }
            },
            None => None,
        };

        Ok(NotificationState {
            last_notified_contest_id: contest_id,
            last_notified_date: date,
        })
    }
}

fn text_value(value: Value) -> Option<String> {
    match value {
        Value::Text(s) if !s.is_empty() => Some(s),
        _ => None,
    }
}

fn optional_text(value: Option<String>) -> Value {
    value.map(Value::Text).unwrap_or(Value::Null)
}

#[async_trait]
impl StateStore for Database {
    fn backend(&self) -> &'static str {
        self.db_type
    }

    async fn load(&self) -> NotificationState {
        match self.read_state().await {
            Ok(state) => {
                debug!(scope = %self.scope, state = ?state, "Loaded state");
                state
            }
            Err(e) => {
                warn!(scope = %self.scope, error = %e, "State unreadable, starting from empty state");
                NotificationState::default()
            }
        }
    }

    async fn save(&self, state: &NotificationState) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO notification_state (scope, last_contest_id, last_date, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(scope) DO UPDATE SET
                    last_contest_id = excluded.last_contest_id,
                    last_date = excluded.last_date,
                    updated_at = excluded.updated_at",
                vec![
                    Value::Text(self.scope.clone()),
                    optional_text(state.last_notified_contest_id.clone()),
                    optional_text(state.last_notified_date.map(|d| d.format("%Y-%m-%d").to_string())),
                    Value::Text(chrono::Utc::now().to_rfc3339()),
                ],
            )
            .await
            .context("Failed to save notification state")?;

        debug!(scope = %self.scope, state = ?state, "Saved state");
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM notification_state WHERE scope = ?1",
                vec![Value::Text(self.scope.clone())],
            )
            .await
            .context("Failed to clear notification state")?;
        Ok(())
    }
}
