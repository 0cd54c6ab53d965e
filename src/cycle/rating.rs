use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::ValueEnum;
use tracing::{debug, error, info, warn};

use crate::contest_source::ContestSource;
use crate::error::DeliveryError;
use crate::extract::extract;
use crate::lock::CycleLock;
use crate::message::MessageFormatter;
use crate::models::{DeliveryResult, NotificationState, WebhookTarget};
use crate::notifier::Dispatcher;
use crate::state::StateStore;

/// When the contest id is written to the state store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CommitPolicy {
    /// Only after a rated result has been delivered. Unrated or missing
    /// results are looked at again on the next cycle.
    Deferred,
    /// As soon as a new contest id is seen, so each contest is examined
    /// once. Rolled back when fetching or delivery fails.
    Eager,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RatingOutcome {
    NoContest,
    SourceUnavailable,
    AlreadyNotified { contest_id: String },
    NotParticipated { contest_id: String },
    ResultPending { contest_id: String },
    Unrated { contest_id: String },
    Notified {
        contest_id: String,
        delta: i32,
        delivery: DeliveryResult,
    },
}

/// One poll-detect-notify pass over injected collaborators.
pub struct RatingCycle {
    source: Arc<dyn ContestSource>,
    store: Arc<dyn StateStore>,
    dispatcher: Dispatcher,
    formatter: MessageFormatter,
    targets: Vec<WebhookTarget>,
    policy: CommitPolicy,
    lock_path: Option<PathBuf>,
}

impl RatingCycle {
    pub fn new(
        source: Arc<dyn ContestSource>,
        store: Arc<dyn StateStore>,
        dispatcher: Dispatcher,
        formatter: MessageFormatter,
        targets: Vec<WebhookTarget>,
    ) -> Self {
        Self {
            source,
            store,
            dispatcher,
            formatter,
            targets,
            policy: CommitPolicy::Deferred,
            lock_path: None,
        }
    }

    pub fn with_policy(mut self, policy: CommitPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_lock(mut self, path: PathBuf) -> Self {
        self.lock_path = Some(path);
        self
    }

    pub async fn run(&self) -> Result<RatingOutcome> {
        static CYCLE_COUNT: AtomicU64 = AtomicU64::new(0);
        let cycle_number = CYCLE_COUNT.fetch_add(1, Ordering::SeqCst) + 1;
        let cycle_start = Instant::now();

        let _lock = self
            .lock_path
            .as_deref()
            .map(CycleLock::acquire)
            .transpose()?;

        info!(
            cycle_number = cycle_number,
            source = self.source.name(),
            backend = self.store.backend(),
            policy = ?self.policy,
            "Starting rating cycle"
        );

        let outcome = self.run_locked().await;

        match &outcome {
            Ok(outcome) => info!(
                cycle_number = cycle_number,
                outcome = ?outcome,
                total_duration_ms = cycle_start.elapsed().as_millis(),
                "Rating cycle completed"
            ),
            Err(e) => error!(
                cycle_number = cycle_number,
                error = %e,
                total_duration_ms = cycle_start.elapsed().as_millis(),
                "Rating cycle failed"
            ),
        }

        outcome
    }

    async fn run_locked(&self) -> Result<RatingOutcome> {
        let latest = match self.source.fetch_latest_contest().await {
            Ok(Some(contest)) => contest,
            Ok(None) => {
                info!("No contest found upstream");
                return Ok(RatingOutcome::NoContest);
            }
            Err(e) => {
                error!(error = %e, "Fetching latest contest failed, will retry next cycle");
                return Ok(RatingOutcome::SourceUnavailable);
            }
        };
        let contest_id = latest.contest_id.clone();

        let previous = self.store.load().await;
        if previous.already_notified(&contest_id) {
            info!(contest_id = %contest_id, "Latest contest already handled");
            return Ok(RatingOutcome::AlreadyNotified { contest_id });
        }

        info!(
            contest_id = %contest_id,
            last_notified = ?previous.last_notified_contest_id,
            "New contest, checking result"
        );

        if self.policy == CommitPolicy::Eager {
            self.store.commit(&contest_id).await?;
        }

        let rows = match self.source.fetch_user_history(&contest_id).await {
            Ok(Some(rows)) => rows,
            Ok(None) => {
                info!(contest_id = %contest_id, "No participation record");
                return Ok(RatingOutcome::NotParticipated { contest_id });
            }
            Err(e) => {
                error!(contest_id = %contest_id, error = %e, "Fetching history failed, will retry next cycle");
                self.roll_back(&previous).await;
                return Ok(RatingOutcome::SourceUnavailable);
            }
        };

        let Some(delta) = extract(&contest_id, &rows) else {
            info!(contest_id = %contest_id, "Result not available yet");
            return Ok(RatingOutcome::ResultPending { contest_id });
        };

        if !delta.is_rated {
            info!(contest_id = %contest_id, "Rating unchanged, skipping notification");
            return Ok(RatingOutcome::Unrated { contest_id });
        }

        info!(contest_id = %contest_id, delta = delta.delta, "Rating change detected");

        let detail = match delta.share_url.as_deref().or(latest.share_url.as_deref()) {
            Some(url) => match self.source.fetch_share_detail(url).await {
                Ok(detail) => detail,
                Err(e) => {
                    warn!(error = %e, "Share page unavailable, using baseline message");
                    None
                }
            },
            None => None,
        };

        let message = self.formatter.format(&delta, &latest, detail.as_deref());
        debug!(contest_id = %contest_id, message = %message, "Message formatted");

        let delivery = self.dispatcher.send(&message, &self.targets).await;
        if !delivery.is_success() {
            self.roll_back(&previous).await;
            return Err(DeliveryError {
                attempted: delivery.attempted(),
            }
            .into());
        }

        if self.policy == CommitPolicy::Deferred {
            self.store.commit(&contest_id).await?;
        }

        Ok(RatingOutcome::Notified {
            contest_id,
            delta: delta.delta,
            delivery,
        })
    }

    /// Undo an eager commit so the next cycle tries again.
    async fn roll_back(&self, previous: &NotificationState) {
        if self.policy != CommitPolicy::Eager {
            return;
        }
        if let Err(e) = self.store.restore(previous).await {
            error!(error = %e, "Failed to roll back notification state");
        }
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

    struct Harness {
        _dir: tempfile::TempDir,
        state_path: PathBuf,
        source: Arc<FakeSource>,
        sender: RecordingSender,
        cycle: RatingCycle,
    }

    impl Harness {
        fn new(source: FakeSource, sender: RecordingSender, policy: CommitPolicy) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let state_path = dir.path().join("state.json");
            let source = Arc::new(source);
            let cycle = RatingCycle::new(
                source.clone(),
                Arc::new(FileStateStore::new(&state_path)),
                Dispatcher::new(sender.clone()),
                MessageFormatter::new("alice", Locale::Ja, "https://atcoder.jp"),
                parse_webhook_targets("https://one,https://two,https://three"),
            )
            .with_policy(policy)
            .with_lock(dir.path().join("acbot.lock"));

            Self {
                _dir: dir,
                state_path,
                source,
                sender,
                cycle,
            }
        }

        fn store(&self) -> FileStateStore {
            FileStateStore::new(&self.state_path)
        }

        async fn state(&self) -> NotificationState {
            self.store().load().await
        }
    }

    #[tokio::test]
    async fn test_second_run_is_noop() {
        let h = Harness::new(
            FakeSource::rated("1000", "1051"),
            RecordingSender::default(),
            CommitPolicy::Deferred,
        );

        let first = h.cycle.run().await.unwrap();
        assert!(matches!(first, RatingOutcome::Notified { delta: 51, .. }));
        let second = h.cycle.run().await.unwrap();
        assert_eq!(
            second,
            RatingOutcome::AlreadyNotified {
                contest_id: "abc300".to_string()
            }
        );

        // one message fanned out to three targets
        assert_eq!(h.sender.messages().len(), 3);
        assert!(h.state().await.already_notified("abc300"));
    }

    #[tokio::test]
    async fn test_unrated_result_sends_nothing() {
        let h = Harness::new(
            FakeSource::rated("1500", "1500"),
            RecordingSender::default(),
            CommitPolicy::Deferred,
        );

        let outcome = h.cycle.run().await.unwrap();
        assert_eq!(
            outcome,
            RatingOutcome::Unrated {
                contest_id: "abc300".to_string()
            }
        );
        assert!(h.sender.messages().is_empty());
        assert_eq!(h.state().await, NotificationState::default());
    }

    #[tokio::test]
    async fn test_first_rated_contest_from_sentinel() {
        let h = Harness::new(
            FakeSource::rated("-", "1200"),
            RecordingSender::default(),
            CommitPolicy::Deferred,
        );

        let outcome = h.cycle.run().await.unwrap();
        assert!(matches!(outcome, RatingOutcome::Notified { delta: 1200, .. }));
        let message = &h.sender.messages()[0];
        assert!(message.contains("-→1200 (+1200) 🙂"));
    }

    #[tokio::test]
    async fn test_total_delivery_failure_leaves_state_unchanged() {
        let h = Harness::new(
            FakeSource::rated("1000", "1051"),
            RecordingSender::failing(&["https://one", "https://two", "https://three"]),
            CommitPolicy::Deferred,
        );
        h.store().commit("abc299").await.unwrap();
        let before = h.state().await;

        let err = h.cycle.run().await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<DeliveryError>(),
            Some(&DeliveryError { attempted: 3 })
        );
        assert_eq!(h.state().await, before);
    }

    #[tokio::test]
    async fn test_eager_commit_rolled_back_on_delivery_failure() {
        let h = Harness::new(
            FakeSource::rated("1000", "1051"),
            RecordingSender::failing(&["https://one", "https://two", "https://three"]),
            CommitPolicy::Eager,
        );
        h.store().commit("abc299").await.unwrap();
        let before = h.state().await;

        assert!(h.cycle.run().await.is_err());
        assert_eq!(h.state().await, before);
    }

    #[tokio::test]
    async fn test_eager_rollback_removes_state_when_none_existed() {
        let h = Harness::new(
            FakeSource::rated("1000", "1051"),
            RecordingSender::failing(&["https://one", "https://two", "https://three"]),
            CommitPolicy::Eager,
        );

        assert!(h.cycle.run().await.is_err());
        assert!(!h.state_path.exists());
    }

    #[tokio::test]
    async fn test_partial_delivery_commits() {
        let h = Harness::new(
            FakeSource::rated("1000", "1051"),
            RecordingSender::failing(&["https://two"]),
            CommitPolicy::Deferred,
        );

        let outcome = h.cycle.run().await.unwrap();
        match outcome {
            RatingOutcome::Notified { delivery, .. } => {
                assert_eq!(delivery, DeliveryResult { succeeded: 2, failed: 1 });
                assert!(delivery.is_success());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(h.state().await.already_notified("abc300"));
    }

    #[tokio::test]
    async fn test_deferred_rechecks_contest_without_result() {
        let source = FakeSource {
            latest: Some(abc300()),
            rows: None,
            ..Default::default()
        };
        let h = Harness::new(source, RecordingSender::default(), CommitPolicy::Deferred);

        for _ in 0..2 {
            let outcome = h.cycle.run().await.unwrap();
            assert_eq!(
                outcome,
                RatingOutcome::NotParticipated {
                    contest_id: "abc300".to_string()
                }
            );
        }
        assert_eq!(h.source.history_calls(), 2);
        assert_eq!(h.state().await, NotificationState::default());
    }

    #[tokio::test]
    async fn test_eager_examines_contest_once() {
        let source = FakeSource {
            latest: Some(abc300()),
            rows: Some(vec![]),
            ..Default::default()
        };
        let h = Harness::new(source, RecordingSender::default(), CommitPolicy::Eager);

        assert_eq!(
            h.cycle.run().await.unwrap(),
            RatingOutcome::ResultPending {
                contest_id: "abc300".to_string()
            }
        );
        assert!(matches!(
            h.cycle.run().await.unwrap(),
            RatingOutcome::AlreadyNotified { .. }
        ));
        assert_eq!(h.source.history_calls(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_rolls_back_eager_commit() {
        let mut source = FakeSource::rated("1000", "1051");
        source.history_status = Some(503);
        let h = Harness::new(source, RecordingSender::default(), CommitPolicy::Eager);

        assert_eq!(h.cycle.run().await.unwrap(), RatingOutcome::SourceUnavailable);
        assert_eq!(h.state().await, NotificationState::default());
        assert!(h.sender.messages().is_empty());
    }

    #[tokio::test]
    async fn test_no_contest_upstream() {
        let h = Harness::new(
            FakeSource::default(),
            RecordingSender::default(),
            CommitPolicy::Deferred,
        );
        assert_eq!(h.cycle.run().await.unwrap(), RatingOutcome::NoContest);
        assert_eq!(h.source.history_calls(), 0);
    }

    #[tokio::test]
    async fn test_share_detail_enriches_message() {
        let mut source = FakeSource::rated("1000", "1051");
        source.detail = Some(
            "Contest Name\nAtCoder Beginner Contest 300\nRank\n4219th\n\
             Rating Change\n1000\n→\n1051\n(+51)\n"
                .to_string(),
        );
        let h = Harness::new(source, RecordingSender::default(), CommitPolicy::Deferred);

        h.cycle.run().await.unwrap();
        let message = &h.sender.messages()[0];
        assert!(message.starts_with("aliceさんのAtCoder Beginner Contest 300での成績：4219位"));
        assert!(message.contains("#AtCoder #AtCoder Beginner Contest 300（ABC300）"));
    }

    #[tokio::test]
    async fn test_held_lock_blocks_overlapping_run() {
        let h = Harness::new(
            FakeSource::rated("1000", "1051"),
            RecordingSender::default(),
            CommitPolicy::Deferred,
        );
        let lock_path = h.state_path.with_file_name("acbot.lock");
        let _held = CycleLock::acquire(&lock_path).unwrap();

        assert!(h.cycle.run().await.is_err());
        assert!(h.sender.messages().is_empty());
        assert_eq!(h.state().await, NotificationState::default());
    }
}
