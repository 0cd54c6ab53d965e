mod config;
mod contest_source;
mod cycle;
mod db;
mod error;
mod extract;
mod lock;
mod message;
mod models;
mod notifier;
mod state;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use config::{validate_interval, Channel, Cli, Command, Config};
use contest_source::{AtCoderSource, ContestSource, SourceKind};
use cycle::{RatingCycle, RatingOutcome, ReminderCycle, ReminderOutcome};
use db::Database;
use error::DeliveryError;
use message::MessageFormatter;
use models::WebhookTarget;
use notifier::{ConsoleSender, DiscordWebhook, Dispatcher};
use state::{FileStateStore, StateStore};

const TEST_MESSAGE: &str = "acbot test message: webhook delivery works ✅";

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if it exists
    dotenvy::dotenv().ok();

    let cli = Cli::parse_args();

    let result = match cli.command {
        Command::Check { config } => run_check(config).await,
        Command::Watch { config, interval } => run_watch(config, interval).await,
        Command::Remind {
            config,
            once_per_day,
        } => run_remind(config, once_per_day).await,
        Command::TestWebhook { config, reminder } => run_test_webhook(config, reminder).await,
    };

    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_check(config: Config) -> Result<()> {
    init_logging(config.verbose);
    config.validate(Channel::Notifier, true)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = "check",
        "Running single rating check"
    );
    log_config(&config);

    let cycle = build_rating_cycle(&config).await?;
    cycle.run().await?;
    Ok(())
}

async fn run_watch(config: Config, interval_secs: u64) -> Result<()> {
    init_logging(config.verbose);
    config.validate(Channel::Notifier, true)?;
    validate_interval(interval_secs)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        interval_secs = interval_secs,
        interval_human = format!("{}m {}s", interval_secs / 60, interval_secs % 60),
        "Starting rating watcher"
    );
    log_config(&config);

    let cycle = build_rating_cycle(&config).await?;
    let mut ticker = interval(Duration::from_secs(interval_secs));

    info!("Entering watch loop (Ctrl+C to stop)");

    loop {
        ticker.tick().await;
        debug!("Ticker fired, starting new cycle");

        match cycle.run().await {
            Ok(RatingOutcome::Notified { contest_id, .. }) => {
                info!(contest_id = %contest_id, "Notification delivered");
            }
            Ok(_) => {}
            Err(e) if e.downcast_ref::<DeliveryError>().is_some() => {
                warn!(error = %e, "Delivery failed - will retry next interval");
            }
            Err(e) => {
                error!(error = %e, "Rating cycle failed - will retry next interval");
            }
        }
    }
}

async fn run_remind(config: Config, once_per_day: bool) -> Result<()> {
    init_logging(config.verbose);
    config.validate(Channel::Reminder, false)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = "remind",
        once_per_day = once_per_day,
        "Running contest reminder"
    );
    log_config(&config);

    // The history table only lists past contests, so reminders always read the feed.
    let source: Arc<dyn ContestSource> =
        Arc::new(AtCoderSource::new(config.source_settings(SourceKind::Feed)?)?);
    let store = open_state_store(&config, "reminder", &config.reminder_state_file).await?;

    let cycle = ReminderCycle::new(
        source,
        store,
        build_dispatcher(&config)?,
        build_formatter(&config),
        targets_for(&config, Channel::Reminder),
        config.offset()?,
    )
    .once_per_day(once_per_day)
    .with_lock(config.lock_file.clone());

    match cycle.run(Utc::now()).await? {
        ReminderOutcome::Sent {
            contest_id,
            slot,
            delivery,
        } => info!(
            contest_id = %contest_id,
            slot = ?slot,
            succeeded = delivery.succeeded,
            failed = delivery.failed,
            "Reminder delivered"
        ),
        outcome => info!(outcome = ?outcome, "Reminder completed without sending"),
    }
    Ok(())
}

async fn run_test_webhook(config: Config, reminder: bool) -> Result<()> {
    init_logging(config.verbose);
    let channel = if reminder {
        Channel::Reminder
    } else {
        Channel::Notifier
    };
    config.validate(channel, false)?;

    let targets = targets_for(&config, channel);
    info!(
        channel = ?channel,
        target_count = targets.len(),
        "Sending test message"
    );

    let dispatcher = build_dispatcher(&config)?;
    let delivery = dispatcher.send(TEST_MESSAGE, &targets).await;
    if !delivery.is_success() {
        return Err(DeliveryError {
            attempted: delivery.attempted(),
        }
        .into());
    }

    info!(
        succeeded = delivery.succeeded,
        failed = delivery.failed,
        "Test message sent"
    );
    Ok(())
}

async fn build_rating_cycle(config: &Config) -> Result<RatingCycle> {
    let source: Arc<dyn ContestSource> =
        Arc::new(AtCoderSource::new(config.source_settings(config.source)?)?);
    let store = open_state_store(config, "rating", &config.state_file).await?;

    Ok(RatingCycle::new(
        source,
        store,
        build_dispatcher(config)?,
        build_formatter(config),
        targets_for(config, Channel::Notifier),
    )
    .with_policy(config.commit_policy)
    .with_lock(config.lock_file.clone()))
}

/// Open the state store based on configuration (Turso, local libsql, or JSON file)
async fn open_state_store(
    config: &Config,
    scope: &str,
    state_file: &std::path::Path,
) -> Result<Arc<dyn StateStore>> {
    if let Some(ref db_url) = config.database_url {
        let auth_token = config
            .database_auth_token
            .as_ref()
            .context("DATABASE_AUTH_TOKEN is required when using DATABASE_URL")?;

        info!(db_url = %db_url, scope = %scope, "Using Turso remote database");
        return Ok(Arc::new(Database::open_turso(db_url, auth_token, scope).await?));
    }

    if let Some(ref path) = config.db {
        info!(db_path = %path.display(), scope = %scope, "Using local libsql database");
        return Ok(Arc::new(Database::open(path, scope).await?));
    }

    let store = FileStateStore::new(state_file);
    info!(state_file = %store.path().display(), scope = %scope, "Using JSON state file");
    Ok(Arc::new(store))
}

fn build_dispatcher(config: &Config) -> Result<Dispatcher> {
    if config.dry_run {
        debug!(sender = "console", "Dry run, messages will be printed");
        return Ok(Dispatcher::new(ConsoleSender::new()));
    }
    Ok(Dispatcher::new(DiscordWebhook::new(config.timeout())?))
}

fn build_formatter(config: &Config) -> MessageFormatter {
    MessageFormatter::new(
        config.user_id().unwrap_or_default(),
        config.locale,
        config.site_url.clone(),
    )
}

/// A dry run without configured webhooks still prints to one pseudo target.
fn targets_for(config: &Config, channel: Channel) -> Vec<WebhookTarget> {
    let targets = config.targets(channel);
    if targets.is_empty() && config.dry_run {
        return vec![WebhookTarget::new("https://dry-run.invalid/console")];
    }
    targets
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn log_config(config: &Config) {
    let db_type = if config.uses_turso() {
        "turso"
    } else if config.db.is_some() {
        "sqlite"
    } else {
        "file"
    };

    info!(
        user = %config.user_id().unwrap_or("not set"),
        source = ?config.source,
        contest_prefix = %config.contest_prefix,
        locale = ?config.locale,
        utc_offset_hours = config.utc_offset_hours,
        commit_policy = ?config.commit_policy,
        db_type = db_type,
        dry_run = config.dry_run,
        "Core configuration"
    );

    info!(
        notifier_webhooks = config.targets(Channel::Notifier).len(),
        reminder_webhooks = config.targets(Channel::Reminder).len(),
        timeout_secs = config.timeout_secs,
        "Webhook configuration"
    );
}
