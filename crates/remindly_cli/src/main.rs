//! `remindly` command-line entry point.
//!
//! # Responsibility
//! - Run the delivery loop as a foreground service.
//! - Offer operator commands for intake, listing and due inspection against
//!   the same store.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;
use remindly_core::config::EngineConfig;
use remindly_core::delivery::alerts::{AlertSink, Alerter, ChannelAlertSink, LogAlertSink};
use remindly_core::delivery::channel::NotificationChannel;
use remindly_core::delivery::dispatcher::NotificationDispatcher;
use remindly_core::delivery::telegram::TelegramChannel;
use remindly_core::logging::{default_log_level, init_logging_with, LogOptions};
use remindly_core::model::candidate::ReminderCandidate;
use remindly_core::repo::reminder_repo::{ReminderRepository, SqliteReminderRepository};
use remindly_core::scheduler::clock::{Clock, SystemClock};
use remindly_core::scheduler::due_scheduler::DueReminderScheduler;
use remindly_core::service::format::{confirmation_message, format_full};
use remindly_core::service::intake_service::IntakeService;
use remindly_core::service::list_view::ReminderListService;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "remindly")]
#[command(about = "Personal reminder engine")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true, env = "REMINDLY_CONFIG", default_value = "remindly.toml")]
    config: PathBuf,

    /// Overrides the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the delivery loop until Ctrl-C
    Run,
    /// Store a new reminder
    Add(AddArgs),
    /// Print an owner's reminders grouped by day
    List {
        #[arg(long)]
        owner: String,
    },
    /// Print reminders due now without delivering them
    Due,
}

#[derive(Args)]
struct AddArgs {
    /// Recipient / owner id (Telegram chat id)
    #[arg(long)]
    owner: String,

    /// Event moment, `YYYY-MM-DDTHH:MM[:SS]±HH:MM`
    #[arg(long, required_unless_present = "json", conflicts_with = "json")]
    at: Option<String>,

    /// Minutes before the event to notify
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    lead: i64,

    /// Reminder text
    #[arg(long, required_unless_present = "json", conflicts_with = "json")]
    text: Option<String>,

    /// Raw extractor JSON instead of the individual fields
    #[arg(long)]
    json: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is normal outside development.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = EngineConfig::load(Some(cli.config.as_path()))
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    setup_logging(&config, cli.log_level.as_deref(), matches!(cli.command, Command::Run))?;

    let store = Arc::new(
        SqliteReminderRepository::open(&config.engine.database_path).with_context(|| {
            format!(
                "opening reminder store at {}",
                config.engine.database_path.display()
            )
        })?,
    );
    let clock = SystemClock::new(config.operating_offset());

    match cli.command {
        Command::Run => run(&config, store).await,
        Command::Add(args) => add(&config, store, &clock, args),
        Command::List { owner } => {
            let view = ReminderListService::new(store).list_for_owner(&owner, clock.now())?;
            print!("{}", view.to_message());
            Ok(())
        }
        Command::Due => {
            let due = store.due_for_delivery(clock.now())?;
            if due.is_empty() {
                println!("Nothing is due.");
            }
            for reminder in due.reminders {
                let deliver_at = reminder
                    .delivery_instant()
                    .map(|instant| format_full(instant, config.operating_offset()))
                    .unwrap_or_else(|_| "malformed".to_string());
                println!(
                    "#{} owner={} deliver_at={} attempts={}",
                    reminder.id, reminder.owner_id, deliver_at, reminder.delivery_attempts
                );
            }
            for row in due.undecodable {
                println!("#{} unreadable: {}", row.id, row.reason);
            }
            Ok(())
        }
    }
}

fn setup_logging(config: &EngineConfig, level: Option<&str>, foreground: bool) -> Result<()> {
    let level = level
        .or(config.logging.level.as_deref())
        .unwrap_or(default_log_level());
    let dir = match &config.logging.dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?.join("logs"),
    };
    let dir = dir
        .to_str()
        .context("log directory must be valid UTF-8")?
        .to_string();

    init_logging_with(
        level,
        &dir,
        LogOptions {
            duplicate_to_stderr: foreground,
        },
    )?;
    Ok(())
}

async fn run(config: &EngineConfig, store: Arc<SqliteReminderRepository>) -> Result<()> {
    let Some(token) = config.telegram.bot_token.as_deref() else {
        bail!("telegram.bot_token (or REMINDLY_TELEGRAM_TOKEN) is required to run");
    };
    let channel: Arc<dyn NotificationChannel> = Arc::new(TelegramChannel::new(token)?);

    let sink: Arc<dyn AlertSink> = match &config.alerts.recipient {
        Some(recipient) => Arc::new(ChannelAlertSink::new(Arc::clone(&channel), recipient)),
        None => Arc::new(LogAlertSink),
    };
    let alerter = Alerter::new(sink);

    let zone = config.operating_offset();
    let dispatcher = NotificationDispatcher::new(channel, config.dispatch_policy(), zone);
    let scheduler = DueReminderScheduler::new(
        store,
        dispatcher,
        alerter.clone(),
        Arc::new(SystemClock::new(zone)),
        config.scheduler_config(),
    );

    let handle = scheduler.start();
    alerter
        .raise_and_wait(&format!(
            "engine started (v{}), polling every {}s",
            remindly_core::core_version(),
            config.scheduler.poll_interval_secs
        ))
        .await;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("event=shutdown module=cli status=start");
    handle.shutdown().await;
    info!("event=shutdown module=cli status=ok");
    Ok(())
}

fn add(
    config: &EngineConfig,
    store: Arc<SqliteReminderRepository>,
    clock: &SystemClock,
    args: AddArgs,
) -> Result<()> {
    let intake = IntakeService::new(store);
    let now = clock.now();

    let result = match (&args.json, args.at, args.text) {
        (Some(raw), _, _) => intake.submit_extractor_output(&args.owner, raw, now),
        (None, Some(at), Some(text)) => {
            let candidate = ReminderCandidate::new(at, text, args.lead);
            intake.submit(&args.owner, &candidate, now)
        }
        _ => bail!("either --json or both --at and --text are required"),
    };

    match result {
        Ok(reminder) => {
            println!("Saved reminder #{}", reminder.id);
            println!("{}", confirmation_message(&reminder, config.operating_offset()));
            Ok(())
        }
        Err(err) => bail!("reminder rejected: {err}"),
    }
}
