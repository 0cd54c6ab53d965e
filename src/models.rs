use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A contest as seen on one poll. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ContestObservation {
    pub contest_id: String,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub duration: Duration,
    pub share_url: Option<String>,
}

impl ContestObservation {
    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time + self.duration
    }
}

/// One row of the per-user history table, cells kept as raw text.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistoryRow {
    pub date: String,
    pub contest_name: String,
    pub contest_href: String,
    pub rank: String,
    pub performance: String,
    pub old_rating: String,
    pub new_rating: String,
    pub share_href: Option<String>,
}

/// A rating cell after sentinel handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatingField {
    Value(i32),
    /// The literal `-` placeholder: not rated yet.
    Unrated,
    /// The cell was absent or empty.
    Missing,
}

impl RatingField {
    /// Value used for arithmetic. Both sentinels count as zero.
    pub fn value(&self) -> i32 {
        match self {
            RatingField::Value(v) => *v,
            RatingField::Unrated | RatingField::Missing => 0,
        }
    }
}

impl fmt::Display for RatingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RatingField::Value(v) => write!(f, "{}", v),
            RatingField::Unrated => f.write_str("-"),
            RatingField::Missing => f.write_str("0"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RatingDelta {
    pub contest_id: String,
    pub old_rating: RatingField,
    pub new_rating: RatingField,
    pub delta: i32,
    pub is_rated: bool,
    pub share_url: Option<String>,
}

impl RatingDelta {
    pub fn new(
        contest_id: String,
        old_rating: RatingField,
        new_rating: RatingField,
        share_url: Option<String>,
    ) -> Self {
        let delta = new_rating.value() - old_rating.value();
        Self {
            contest_id,
            old_rating,
            new_rating,
            delta,
            is_rated: delta != 0,
            share_url,
        }
    }
}

/// Durable record guarding at-most-once delivery.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NotificationState {
    #[serde(default)]
    pub last_notified_contest_id: Option<String>,
    #[serde(default)]
    pub last_notified_date: Option<NaiveDate>,
}

impl NotificationState {
    pub fn is_empty(&self) -> bool {
        self.last_notified_contest_id.is_none() && self.last_notified_date.is_none()
    }

    pub fn already_notified(&self, contest_id: &str) -> bool {
        self.last_notified_contest_id.as_deref() == Some(contest_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookTarget {
    pub url: String,
}

impl WebhookTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeliveryResult {
    pub succeeded: usize,
    pub failed: usize,
}

impl DeliveryResult {
    pub fn is_success(&self) -> bool {
        self.succeeded > 0
    }

    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed
    }
}
