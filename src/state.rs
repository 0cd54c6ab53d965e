use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Timelike, Utc};
use tracing::{debug, info, warn};

use crate::models::NotificationState;

/// Hours after local midnight that still count as the previous day.
const ROLLOVER_HOUR: u32 = 2;

/// Calendar date a run belongs to, in the fixed `offset` zone.
///
/// Runs before 02:00 local time are attributed to the previous day so a
/// scheduler firing a little late around midnight does not open a new day.
pub fn notification_date(now: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    let local = now.with_timezone(&offset);
    if local.hour() < ROLLOVER_HOUR {
        (local - Duration::hours(i64::from(ROLLOVER_HOUR))).date_naive()
    } else {
        local.date_naive()
    }
}

/// Durable notification state.
///
/// `load` never fails: unreadable or corrupt state is reported and treated as
/// empty, which at worst repeats a notification instead of silencing it.
#[async_trait]
pub trait StateStore: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn load(&self) -> NotificationState;

    async fn save(&self, state: &NotificationState) -> Result<()>;

    async fn clear(&self) -> Result<()>;

    async fn commit(&self, contest_id: &str) -> Result<()> {
        let mut state = self.load().await;
        state.last_notified_contest_id = Some(contest_id.to_string());
        self.save(&state).await?;
        info!(backend = self.backend(), contest_id = %contest_id, "Committed notification state");
        Ok(())
    }

    /// Put `previous` back, deleting the record when there was none.
    async fn restore(&self, previous: &NotificationState) -> Result<()> {
        if previous.is_empty() {
            self.clear().await?;
        } else {
            self.save(previous).await?;
        }
        info!(
            backend = self.backend(),
            contest_id = ?previous.last_notified_contest_id,
            "Restored previous notification state"
        );
        Ok(())
    }

    async fn mark_daily(&self, date: NaiveDate) -> Result<()> {
        let mut state = self.load().await;
        state.last_notified_date = Some(date);
        self.save(&state).await
    }

    async fn already_notified_today(&self, date: NaiveDate) -> bool {
        self.load().await.last_notified_date == Some(date)
    }
}

/// JSON file store.
///
/// A file that holds nothing but a contest id (the older plain-text layout)
/// is still accepted.
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse(&self, content: &str) -> NotificationState {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return NotificationState::default();
        }

        match serde_json::from_str::<NotificationState>(trimmed) {
            Ok(state) => state,
            Err(_) if is_legacy_contest_id(trimmed) => {
                warn!(
                    path = %self.path.display(),
                    contest_id = %trimmed,
                    "Plain-text state file found; it may have been written when contests were \
                     committed before confirming a rated result"
                );
                NotificationState {
                    last_notified_contest_id: Some(trimmed.to_string()),
                    last_notified_date: None,
                }
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "State file is corrupt, starting from empty state"
                );
                NotificationState::default()
            }
        }
    }
}

fn is_legacy_contest_id(text: &str) -> bool {
    !text.starts_with('{')
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

#[async_trait]
impl StateStore for FileStateStore {
    fn backend(&self) -> &'static str {
        "file"
    }

    async fn load(&self) -> NotificationState {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                let state = self.parse(&content);
                debug!(path = %self.path.display(), state = ?state, "Loaded state");
                state
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No state file yet");
                NotificationState::default()
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "State file unreadable, starting from empty state"
                );
                NotificationState::default()
            }
        }
    }

    async fn save(&self, state: &NotificationState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("tmp");

        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        debug!(path = %self.path.display(), state = ?state, "Saved state");
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", self.path.display())),
        }
    }
}
