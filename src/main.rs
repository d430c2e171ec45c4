//! Quiet-Harvest main entry point
//!
//! This is the command-line interface invoked once per daily slot.

use anyhow::{bail, Context};
use chrono::{Local, NaiveDate};
use clap::Parser;
use quiet_harvest::config::{load_config_with_hash, validate_session_id, Config};
use quiet_harvest::crawler::{PagedAreaSource, SessionScheduler, SessionTrigger};
use quiet_harvest::output::{
    load_day_statistics, print_breakers, print_day_statistics, write_summary, JsonlSink,
};
use quiet_harvest::state::BreakerRegistry;
use quiet_harvest::storage::{SessionStore, SqliteStorage};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Quiet-Harvest: a session-paced listing crawler
///
/// Each invocation runs at most one session for a daily slot. Sessions pace
/// themselves, back off a failing target through a circuit breaker and leave
/// early when the target starts to look suspicious.
#[derive(Parser, Debug)]
#[command(name = "quiet-harvest")]
#[command(version = "1.0.0")]
#[command(about = "A session-paced listing crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Slot to run (defaults to the latest slot due at the current local time)
    #[arg(long)]
    slot: Option<String>,

    /// Explicit session id (defaults to <slot>-<YYYYmmddTHHMMSS>)
    #[arg(long)]
    session_id: Option<String>,

    /// Day the session belongs to, as YYYY-MM-DD (defaults to today)
    #[arg(long, value_parser = parse_date)]
    date: Option<NaiveDate>,

    /// Maximum number of items to fetch
    #[arg(long)]
    max_properties: Option<u32>,

    /// Comma-separated area ids, overriding the day's assignment
    #[arg(long, value_delimiter = ',')]
    areas: Option<Vec<String>>,

    /// Wall-clock budget for the session
    #[arg(long)]
    max_runtime_minutes: Option<u64>,

    /// Explicit log filter (e.g. "debug" or "quiet_harvest=trace"), overrides -v/-q
    #[arg(long)]
    log_level: Option<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show the slot plan and area partition without crawling
    #[arg(long, conflicts_with_all = ["status", "breakers"])]
    dry_run: bool,

    /// Show the day's session records and exit
    #[arg(long, conflicts_with_all = ["dry_run", "breakers"])]
    status: bool,

    /// Show persisted circuit breaker states and exit
    #[arg(long, conflicts_with_all = ["dry_run", "status"])]
    breakers: bool,
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| format!("{}: {}", value, e))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.log_level.as_deref(), cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    let date = cli.date.unwrap_or_else(|| Local::now().date_naive());

    if cli.dry_run {
        handle_dry_run(config, config_hash, date)
    } else if cli.status {
        handle_status(&config, date)
    } else if cli.breakers {
        handle_breakers(&config)
    } else {
        let code = handle_session(&cli, config, config_hash, date).await?;
        if code != 0 {
            std::process::exit(code);
        }
        Ok(())
    }
}

/// Sets up the logging/tracing subscriber
///
/// An explicit `--log-level` directive wins over the verbosity flags.
fn setup_logging(log_level: Option<&str>, verbose: u8, quiet: bool) {
    let filter = match log_level {
        Some(directive) => EnvFilter::new(directive),
        None if quiet => EnvFilter::new("error"),
        None => match verbose {
            0 => EnvFilter::new("quiet_harvest=info,warn"),
            1 => EnvFilter::new("quiet_harvest=debug,info"),
            2 => EnvFilter::new("quiet_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        },
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles --dry-run: shows the slot plan and the day's partition
fn handle_dry_run(config: Config, config_hash: String, date: NaiveDate) -> anyhow::Result<()> {
    println!("=== Quiet-Harvest Dry Run ===\n");

    println!("Target: {}", config.target.base_url);
    println!(
        "Session limits: {} items, {} minutes",
        config.session.max_properties, config.session.max_runtime_minutes
    );
    println!(
        "Breaker: opens after {} failures, probes after {}s",
        config.breaker.failure_threshold, config.breaker.recovery_timeout_secs
    );
    println!("Database: {}", config.output.database_path);
    println!("Records: {}", config.output.records_dir);

    // Built without opening the database so a dry run never writes
    let storage = Arc::new(Mutex::new(SqliteStorage::new_in_memory()?));
    let breakers = Arc::new(BreakerRegistry::new(config.breaker.clone()));
    let scheduler = SessionScheduler::with_storage(config, config_hash, storage, breakers)?;

    let partition = scheduler.preview_assignment(date);
    println!("\nSlot plan for {} ({} slots):", date, scheduler.plan().len());
    for slot in scheduler.plan().slots() {
        let areas = partition.get(&slot.name).cloned().unwrap_or_default();
        println!(
            "  {} {:<14} {}",
            slot.time.format("%H:%M"),
            slot.name,
            if areas.is_empty() {
                "-".to_string()
            } else {
                areas.join(", ")
            }
        );
    }

    println!("\n✓ Configuration is valid");
    Ok(())
}

/// Handles --status: prints the day's session records
fn handle_status(config: &Config, date: NaiveDate) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);
    let storage = SqliteStorage::new(Path::new(&config.output.database_path))?;

    let stats = load_day_statistics(&storage, date)?;
    print_day_statistics(&stats);
    Ok(())
}

/// Handles --breakers: prints persisted breaker states
fn handle_breakers(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);
    let storage = SqliteStorage::new(Path::new(&config.output.database_path))?;

    print_breakers(&storage.load_all_breakers()?);
    Ok(())
}

/// Handles the session run, returning the process exit code
async fn handle_session(
    cli: &Cli,
    config: Config,
    config_hash: String,
    date: NaiveDate,
) -> anyhow::Result<i32> {
    let records_dir = PathBuf::from(&config.output.records_dir);
    let mut source = PagedAreaSource::from_config(&config)?;
    let scheduler = SessionScheduler::new(config, config_hash)?;

    let slot_name = match &cli.slot {
        Some(slot) => slot.clone(),
        None => {
            let now = Local::now().time();
            match scheduler.plan().current_slot(now) {
                Some(slot) => slot.name.clone(),
                None => bail!("No slot is due yet at {}; pass --slot", now.format("%H:%M")),
            }
        }
    };

    let mut trigger = SessionTrigger::new(slot_name, date);
    trigger.session_id = cli.session_id.clone();
    trigger.max_properties = cli.max_properties;
    trigger.areas = cli.areas.clone();
    trigger.max_runtime = cli
        .max_runtime_minutes
        .map(|minutes| Duration::from_secs(minutes.saturating_mul(60)));

    // Fixed up front so the record file and the session row share the id
    let session_id = trigger.resolve_session_id();
    validate_session_id(&session_id).context("Invalid --session-id")?;
    trigger.session_id = Some(session_id.clone());

    let mut sink = JsonlSink::new(&records_dir, date, &session_id);
    let summary = scheduler.run(&trigger, &mut source, &mut sink).await?;

    if summary.status.is_terminal() {
        let path = write_summary(&records_dir, &summary)?;
        tracing::info!("Summary written to {}", path.display());
    }
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(summary.exit_code())
}
