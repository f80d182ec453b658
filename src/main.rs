//! # Agenda — personal calendar scheduler daemon
//!
//! Loads config, opens the event database, registers built-in handlers,
//! starts the scheduler engine, arms the wake and maintenance triggers,
//! re-hydrates persisted events, then runs until Ctrl-C.
//!
//! Usage:
//!   agenda                           # Run the scheduler daemon
//!   agenda --config ./agenda.toml    # Custom config file
//!   agenda armed                     # List tasks that would be armed now
//!   agenda slots --date 2026-05-04   # Free slots for a day
//!   agenda wake                      # Send a wake request now

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use agenda_core::config::AgendaConfig;
use agenda_core::storage::Storage;
use agenda_db::{SettingsStore, SqliteStorage, keys};
use agenda_scheduler::builtins::register_builtins;
use agenda_scheduler::{Calendar, CallbackRegistry, SchedulerEngine, WakeScheduler};

#[derive(Parser)]
#[command(name = "agenda", version, about = "📅 Agenda — personal calendar scheduler")]
struct Cli {
    /// Config file (default: ~/.agenda/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Event database path (overrides config and AGENDA_DB)
    #[arg(long)]
    db: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler daemon (default)
    Run,
    /// Re-hydrate from the database and list the tasks that would be armed
    Armed,
    /// Show free slots in the working window
    Slots {
        /// Day to inspect, YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Number of days to include
        #[arg(long, default_value = "1")]
        days: u32,
        /// Only print slots at least this long
        #[arg(long, default_value = "0")]
        min_minutes: i64,
    },
    /// Send a wake request immediately
    Wake,
}

struct App {
    config: AgendaConfig,
    storage: Arc<SqliteStorage>,
    engine: Arc<SchedulerEngine>,
}

fn load_config(cli: &Cli) -> Result<AgendaConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let expanded = shellexpand::tilde(path).to_string();
            AgendaConfig::load_from(Path::new(&expanded))?
        }
        None => AgendaConfig::load()?,
    };
    if let Some(db) = cli.db.clone().or_else(|| std::env::var("AGENDA_DB").ok()) {
        config.db_path = db;
    }
    Ok(config)
}

/// Open storage, persist the WAKE_SERVER_URL override, and resolve the wake endpoint.
fn open_app(mut config: AgendaConfig) -> Result<App> {
    let db_path: PathBuf = config.resolved_db_path();
    let storage = Arc::new(
        SqliteStorage::open(&db_path).with_context(|| format!("opening {}", db_path.display()))?,
    );
    let settings = SettingsStore::open(&db_path)?;
    if let Ok(url) = std::env::var("WAKE_SERVER_URL") {
        settings.set_string(keys::WAKE_SERVER_URL, &url)?;
    }
    if let Some(url) = settings.get_string(keys::WAKE_SERVER_URL)? {
        config.wake.server_url = url;
    }

    let registry = Arc::new(CallbackRegistry::new());
    register_builtins(&registry, &config.actions)?;
    let engine = Arc::new(SchedulerEngine::new(registry, config.scheduler.clone()));

    tracing::info!("🗄️ Database: {}", db_path.display());
    Ok(App { config, storage, engine })
}

async fn run(app: App) -> Result<()> {
    let storage: Arc<dyn Storage> = app.storage.clone();
    let engine = app.engine.clone();
    engine.start();

    let wake = WakeScheduler::new(engine.clone(), storage.clone(), app.config.wake.clone())?;
    if let Err(e) = wake.schedule_today().await {
        tracing::warn!("⚠️ Wake planning failed: {e}");
    }
    wake.schedule_daily_maintenance()?;
    engine
        .rehydrate(storage.as_ref())
        .await
        .context("startup re-hydration failed")?;

    let status = wake.status();
    println!("📅 Agenda v{}", env!("CARGO_PKG_VERSION"));
    println!("   ⏰ Armed tasks:      {}", engine.armed_count());
    match status.next_wake {
        Some(at) => println!("   🌅 Next wake:        {}", at.with_timezone(&Local)),
        None => println!("   🌅 Next wake:        none"),
    }
    if let Some(at) = status.next_maintenance {
        println!("   🛠️  Next maintenance: {}", at.with_timezone(&Local));
    }
    println!();

    tokio::signal::ctrl_c().await?;
    tracing::info!("🛑 Shutting down");
    engine.stop().await;
    Ok(())
}

async fn armed(app: App) -> Result<()> {
    app.engine.rehydrate(&*app.storage).await?;
    let tasks = app.engine.snapshot();
    if tasks.is_empty() {
        println!("No tasks within the scheduling horizon.");
        return Ok(());
    }
    for task in tasks {
        println!(
            "{:>6}  {}  {:<32}  notify={} action={} reminders={}",
            task.handle.to_string(),
            task.next_fire_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            task.title,
            if task.notifier.is_empty() { "-" } else { task.notifier.as_str() },
            if task.action.is_empty() { "-" } else { task.action.as_str() },
            task.pending_reminders.len(),
        );
    }
    Ok(())
}

async fn slots(app: App, date: Option<NaiveDate>, days: u32, min_minutes: i64) -> Result<()> {
    let hours = app.config.availability.working_hours()?;
    let storage: Arc<dyn Storage> = app.storage.clone();
    let calendar = Calendar::new(storage, app.engine.clone(), hours);

    let from = date.unwrap_or_else(|| Local::now().date_naive());
    let to = from + chrono::Duration::days(i64::from(days.max(1)) - 1);
    let min = chrono::Duration::minutes(min_minutes.max(0));
    let slots = calendar.free_slots_between(from, to, &Local).await?;

    let mut shown = 0;
    for slot in slots.iter().filter(|s| s.duration() >= min) {
        let start = slot.start.with_timezone(&Local);
        let end = slot.end.with_timezone(&Local);
        println!(
            "{}  {} - {}  ({} min)",
            start.format("%Y-%m-%d"),
            start.format("%H:%M"),
            end.format("%H:%M"),
            slot.duration().num_minutes()
        );
        shown += 1;
    }
    if shown == 0 {
        println!("No free slots.");
    }
    Ok(())
}

async fn wake_now(app: App) -> Result<()> {
    let storage: Arc<dyn Storage> = app.storage.clone();
    let wake = WakeScheduler::new(app.engine.clone(), storage, app.config.wake.clone())?;
    wake.trigger_wake().await?;
    println!("✅ Wake request sent to {}", app.config.wake.server_url);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "agenda=debug,agenda_core=debug,agenda_db=debug,agenda_scheduler=debug"
    } else {
        "agenda=info,agenda_core=info,agenda_db=info,agenda_scheduler=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = load_config(&cli)?;
    let app = open_app(config)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(app).await,
        Command::Armed => armed(app).await,
        Command::Slots { date, days, min_minutes } => slots(app, date, days, min_minutes).await,
        Command::Wake => wake_now(app).await,
    }
}
