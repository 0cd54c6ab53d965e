use std::path::PathBuf;
use std::time::Duration;

use chrono::FixedOffset;
use clap::{Parser, Subcommand};

use crate::contest_source::{SourceKind, SourceSettings, DEFAULT_FEED_URL, DEFAULT_SITE_URL};
use crate::cycle::CommitPolicy;
use crate::error::ConfigError;
use crate::message::Locale;
use crate::models::WebhookTarget;
use crate::notifier::parse_webhook_targets;

pub const MIN_INTERVAL_SECS: u64 = 60;

#[derive(Parser, Debug, Clone)]
#[command(name = "acbot")]
#[command(about = "AtCoder rating notifier - posts new rated results and contest reminders to chat webhooks")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run a single rating check and exit
    Check {
        #[command(flatten)]
        config: Config,
    },
    /// Run rating checks continuously
    Watch {
        #[command(flatten)]
        config: Config,

        /// Check interval in seconds (minimum 60)
        #[arg(short, long, default_value = "600")]
        interval: u64,
    },
    /// Send a reminder for the next contest and exit
    Remind {
        #[command(flatten)]
        config: Config,

        /// Send at most one reminder per local day
        #[arg(long, env = "ACBOT_ONCE_PER_DAY")]
        once_per_day: bool,
    },
    /// Post a test message to every configured webhook
    TestWebhook {
        #[command(flatten)]
        config: Config,

        /// Use the reminder webhook list instead of the notifier list
        #[arg(long)]
        reminder: bool,
    },
}

#[derive(Parser, Debug, Clone)]
pub struct Config {
    /// AtCoder user whose results are announced
    #[arg(short, long, env = "ATCODER_USER_ID")]
    pub user: Option<String>,

    /// Webhooks for rating notifications (comma, semicolon or newline separated)
    #[arg(long, env = "DISCORD_WEBHOOK_URLS_NOTIFIER", value_name = "URLS")]
    pub webhooks: Option<String>,

    /// Webhooks for contest reminders (comma, semicolon or newline separated)
    #[arg(long, env = "DISCORD_WEBHOOK_URLS_REMINDER", value_name = "URLS")]
    pub reminder_webhooks: Option<String>,

    /// Where the latest contest is discovered
    #[arg(long, env = "ACBOT_SOURCE", value_enum, default_value = "feed")]
    pub source: SourceKind,

    /// Only contests whose id starts with this prefix are followed
    #[arg(long, env = "ACBOT_CONTEST_PREFIX", default_value = "abc")]
    pub contest_prefix: String,

    /// Language of the posted messages
    #[arg(long, env = "ACBOT_LOCALE", value_enum, default_value = "ja")]
    pub locale: Locale,

    /// Fixed UTC offset (hours) for dates and reminder times
    #[arg(long, env = "ACBOT_UTC_OFFSET_HOURS", default_value = "9", allow_negative_numbers = true)]
    pub utc_offset_hours: i32,

    /// Timeout for every HTTP request, in seconds
    #[arg(long, env = "ACBOT_TIMEOUT_SECS", default_value = "10")]
    pub timeout_secs: u64,

    /// When the notified contest is recorded
    #[arg(long, env = "ACBOT_COMMIT_POLICY", value_enum, default_value = "deferred")]
    pub commit_policy: CommitPolicy,

    /// JSON state file (used unless --db or --database-url is set)
    #[arg(long, env = "ACBOT_STATE_FILE", default_value = "last_contest.json")]
    pub state_file: PathBuf,

    /// Reminder state file (used with --once-per-day)
    #[arg(long, env = "ACBOT_REMINDER_STATE_FILE", default_value = "last_reminder.json")]
    pub reminder_state_file: PathBuf,

    /// Local libsql/SQLite database for state instead of JSON files
    #[arg(long, env = "ACBOT_DB")]
    pub db: Option<PathBuf>,

    /// Turso/LibSQL database URL (e.g., libsql://your-db.turso.io)
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Turso/LibSQL authentication token (required when using --database-url)
    #[arg(long, env = "DATABASE_AUTH_TOKEN")]
    pub database_auth_token: Option<String>,

    /// Lock file guarding against overlapping runs
    #[arg(long, env = "ACBOT_LOCK_FILE", default_value = "acbot.lock")]
    pub lock_file: PathBuf,

    /// Site base URL
    #[arg(long, env = "ACBOT_SITE_URL", default_value = DEFAULT_SITE_URL)]
    pub site_url: String,

    /// Contest list feed URL
    #[arg(long, env = "ACBOT_FEED_URL", default_value = DEFAULT_FEED_URL)]
    pub feed_url: String,

    /// Print messages instead of posting them
    #[arg(long)]
    pub dry_run: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Which webhook list a command posts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Notifier,
    Reminder,
}

impl Channel {
    fn env_name(&self) -> &'static str {
        match self {
            Channel::Notifier => "DISCORD_WEBHOOK_URLS_NOTIFIER",
            Channel::Reminder => "DISCORD_WEBHOOK_URLS_REMINDER",
        }
    }
}

impl Config {
    pub fn targets(&self, channel: Channel) -> Vec<WebhookTarget> {
        let raw = match channel {
            Channel::Notifier => &self.webhooks,
            Channel::Reminder => &self.reminder_webhooks,
        };
        raw.as_deref().map(parse_webhook_targets).unwrap_or_default()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }

    pub fn offset(&self) -> Result<FixedOffset, ConfigError> {
        if !(-23..=23).contains(&self.utc_offset_hours) {
            return Err(ConfigError::InvalidOffset(self.utc_offset_hours));
        }
        FixedOffset::east_opt(self.utc_offset_hours * 3600)
            .ok_or(ConfigError::InvalidOffset(self.utc_offset_hours))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn uses_turso(&self) -> bool {
        self.database_url.is_some()
    }

    /// Checks everything needed before the first network call.
    ///
    /// `needs_user` is false for commands that never look at a user's
    /// history (reminders, webhook tests).
    pub fn validate(&self, channel: Channel, needs_user: bool) -> Result<(), ConfigError> {
        if needs_user && self.user_id().is_none() {
            return Err(ConfigError::MissingUserId);
        }

        if !self.dry_run && self.targets(channel).is_empty() {
            return Err(ConfigError::NoWebhooks(channel.env_name()));
        }

        if self.contest_prefix.trim().is_empty() {
            return Err(ConfigError::EmptyPrefix);
        }

        self.offset()?;

        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout);
        }

        if let Some(ref db_url) = self.database_url {
            if !db_url.starts_with("libsql://") && !db_url.starts_with("https://") {
                return Err(ConfigError::InvalidDatabaseUrl(db_url.clone()));
            }
            if self.database_auth_token.is_none() {
                return Err(ConfigError::MissingDatabaseToken);
            }
        }

        Ok(())
    }

    pub fn source_settings(&self, kind: SourceKind) -> Result<SourceSettings, ConfigError> {
        Ok(SourceSettings {
            kind,
            user_id: self.user_id().unwrap_or_default().to_string(),
            contest_prefix: self.contest_prefix.trim().to_string(),
            site_url: self.site_url.trim_end_matches('/').to_string(),
            feed_url: self.feed_url.clone(),
            timeout: self.timeout(),
            offset: self.offset()?,
        })
    }
}

/// Validate the interval for the watch command
pub fn validate_interval(interval: u64) -> Result<(), ConfigError> {
    if interval < MIN_INTERVAL_SECS {
        return Err(ConfigError::IntervalTooShort(interval, MIN_INTERVAL_SECS));
    }
    Ok(())
}
