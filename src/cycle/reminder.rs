use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, FixedOffset, Utc};
use tracing::{error, info};

use crate::contest_source::ContestSource;
use crate::error::DeliveryError;
use crate::lock::CycleLock;
use crate::message::{MessageFormatter, ReminderSlot};
use crate::models::{DeliveryResult, WebhookTarget};
use crate::notifier::Dispatcher;
use crate::state::{notification_date, StateStore};

#[derive(Debug, Clone, PartialEq)]
pub enum ReminderOutcome {
    NoContest,
    SourceUnavailable,
    ContestOver { contest_id: String },
    AlreadyReminded { contest_id: String },
    Sent {
        contest_id: String,
        slot: ReminderSlot,
        delivery: DeliveryResult,
    },
}

/// Pre-contest reminder pass.
pub struct ReminderCycle {
    source: Arc<dyn ContestSource>,
    store: Arc<dyn StateStore>,
    dispatcher: Dispatcher,
    formatter: MessageFormatter,
    targets: Vec<WebhookTarget>,
    offset: FixedOffset,
    once_per_day: bool,
    lock_path: Option<PathBuf>,
}

impl ReminderCycle {
    pub fn new(
        source: Arc<dyn ContestSource>,
        store: Arc<dyn StateStore>,
        dispatcher: Dispatcher,
        formatter: MessageFormatter,
        targets: Vec<WebhookTarget>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            source,
            store,
            dispatcher,
            formatter,
            targets,
            offset,
            once_per_day: false,
            lock_path: None,
        }
    }

    pub fn once_per_day(mut self, enabled: bool) -> Self {
        self.once_per_day = enabled;
        self
    }

    pub fn with_lock(mut self, path: PathBuf) -> Self {
        self.lock_path = Some(path);
        self
    }

    pub async fn run(&self, now: DateTime<Utc>) -> Result<ReminderOutcome> {
        let _lock = self
            .lock_path
            .as_deref()
            .map(CycleLock::acquire)
            .transpose()?;

        let contest = match self.source.fetch_latest_contest().await {
            Ok(Some(contest)) => contest,
            Ok(None) => {
                info!("No upcoming contest found");
                return Ok(ReminderOutcome::NoContest);
            }
            Err(e) => {
                error!(error = %e, "Fetching contest list failed");
                return Ok(ReminderOutcome::SourceUnavailable);
            }
        };
        let contest_id = contest.contest_id.clone();

        if contest.end_time() < now {
            info!(
                contest_id = %contest_id,
                ended_at = %contest.end_time(),
                "Latest contest already finished, nothing to remind"
            );
            return Ok(ReminderOutcome::ContestOver { contest_id });
        }

        let today = notification_date(now, self.offset);
        if self.once_per_day && self.store.already_notified_today(today).await {
            info!(contest_id = %contest_id, date = %today, "Already reminded today");
            return Ok(ReminderOutcome::AlreadyReminded { contest_id });
        }

        let slot = ReminderSlot::at(now, self.offset);
        let message = self.formatter.format_reminder(&contest, slot, self.offset);
        info!(contest_id = %contest_id, slot = ?slot, "Sending reminder");

        let delivery = self.dispatcher.send(&message, &self.targets).await;
        if !delivery.is_success() {
            return Err(DeliveryError {
                attempted: delivery.attempted(),
            }
            .into());
        }

        if self.once_per_day {
            self.store.mark_daily(today).await?;
        }

        Ok(ReminderOutcome::Sent {
            contest_id,
            slot,
            delivery,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::testing::{abc300, FakeSource};
    use crate::message::Locale;
    use crate::notifier::parse_webhook_targets;
    use crate::notifier::testing::RecordingSender;
    use crate::state::FileStateStore;
    use chrono::TimeZone;

    fn jst() -> FixedOffset {
        FixedOffset::east_opt(9 * 3600).unwrap()
    }

    fn cycle(
        dir: &tempfile::TempDir,
        sender: RecordingSender,
        once_per_day: bool,
    ) -> ReminderCycle {
        let source = FakeSource {
            latest: Some(abc300()),
            ..Default::default()
        };
        ReminderCycle::new(
            Arc::new(source),
            Arc::new(FileStateStore::new(dir.path().join("reminder.json"))),
            Dispatcher::new(sender),
            MessageFormatter::new("alice", Locale::Ja, "https://atcoder.jp"),
            parse_webhook_targets("https://one"),
            jst(),
        )
        .once_per_day(once_per_day)
    }

    // abc300 starts 2023-04-29 21:00 JST and lasts 100 minutes
    fn at_jst(hour: u32) -> DateTime<Utc> {
        jst()
            .with_ymd_and_hms(2023, 4, 29, hour, 0, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn test_reminder_uses_slot_for_hour() {
        let dir = tempfile::tempdir().unwrap();
        let sender = RecordingSender::default();
        let cycle = cycle(&dir, sender.clone(), false);

        let outcome = cycle.run(at_jst(20)).await.unwrap();
        assert!(matches!(
            outcome,
            ReminderOutcome::Sent {
                slot: ReminderSlot::Evening,
                ..
            }
        ));
        let message = &sender.messages()[0];
        assert!(message.starts_with("🌙"));
        assert!(message.contains("2023/04/29 21:00 - 22:40 JST"));
    }

    #[tokio::test]
    async fn test_finished_contest_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let sender = RecordingSender::default();
        let cycle = cycle(&dir, sender.clone(), false);

        let outcome = cycle.run(at_jst(23)).await.unwrap();
        assert_eq!(
            outcome,
            ReminderOutcome::ContestOver {
                contest_id: "abc300".to_string()
            }
        );
        assert!(sender.messages().is_empty());
    }

    #[tokio::test]
    async fn test_once_per_day_marker() {
        let dir = tempfile::tempdir().unwrap();
        let sender = RecordingSender::default();
        let cycle = cycle(&dir, sender.clone(), true);

        assert!(matches!(
            cycle.run(at_jst(12)).await.unwrap(),
            ReminderOutcome::Sent { .. }
        ));
        assert!(matches!(
            cycle.run(at_jst(16)).await.unwrap(),
            ReminderOutcome::AlreadyReminded { .. }
        ));
        assert_eq!(sender.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_repeats_without_marker() {
        let dir = tempfile::tempdir().unwrap();
        let sender = RecordingSender::default();
        let cycle = cycle(&dir, sender.clone(), false);

        cycle.run(at_jst(12)).await.unwrap();
        cycle.run(at_jst(16)).await.unwrap();
        assert_eq!(sender.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_reminder_does_not_mark_day() {
        let dir = tempfile::tempdir().unwrap();
        let cycle = cycle(&dir, RecordingSender::failing(&["https://one"]), true);

        assert!(cycle.run(at_jst(12)).await.is_err());
        let store = FileStateStore::new(dir.path().join("reminder.json"));
        assert!(store.load().await.last_notified_date.is_none());
    }
}
