//! workmaster CLI: operator interface to coordinator event streams.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use tracing::info;
use workmaster::announce::PgmqAnnouncer;
use workmaster::config::{Config, Settings};
use workmaster::coordinator::Coordinator;
use workmaster::db::Db;
use workmaster::db::pgmq::RESULTS_QUEUE;
use workmaster::event::LedgerEvent;
use workmaster::ledger::Ledger;
use workmaster::telemetry::{TelemetryConfig, init_telemetry};

#[derive(Parser)]
#[command(name = "workmaster", about = "Event-sourced work distribution coordinator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run migrations and create the results queue
    Migrate,
    /// Recover and hold the coordinator for INSTANCE_KEY until interrupted
    ///
    /// Replays the event log, requeues stranded work and settles unconfirmed
    /// completions. No worker or submitter transport is attached; embed the
    /// library to serve jobs.
    Serve {
        /// TOML settings file with a [coordinator] table
        #[arg(long)]
        settings: Option<PathBuf>,
    },
    /// Event stream operations
    Events {
        #[command(subcommand)]
        action: EventsAction,
    },
    /// Ledger operations
    Ledger {
        #[command(subcommand)]
        action: LedgerAction,
    },
    /// Announced results
    Results {
        #[command(subcommand)]
        action: ResultsAction,
    },
    /// Validate a settings file and print the effective coordinator config
    CheckSettings {
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum EventsAction {
    /// List stored events of an instance key
    List {
        /// Instance key (defaults to INSTANCE_KEY)
        #[arg(long)]
        key: Option<String>,
        /// Only events after this sequence number
        #[arg(long, default_value_t = 0)]
        since: u64,
    },
}

#[derive(Subcommand)]
enum LedgerAction {
    /// Replay an instance key's stream and print the resulting ledger
    Show {
        /// Instance key (defaults to INSTANCE_KEY)
        #[arg(long)]
        key: Option<String>,
    },
}

#[derive(Subcommand)]
enum ResultsAction {
    /// Read and archive the next announced result
    Read {
        /// Visibility timeout in seconds
        #[arg(long, default_value_t = 30)]
        vt: i32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Command::CheckSettings { path } = &cli.command {
        return cmd_check_settings(path);
    }

    let config = Config::from_env()?;
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "workmaster".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let db = Db::connect(config.database_url.expose_secret()).await?;

    match cli.command {
        Command::Migrate => {
            db.migrate().await?;
            db.create_queue(RESULTS_QUEUE).await?;
            println!("Migrations applied, queue '{RESULTS_QUEUE}' ready.");
            Ok(())
        }
        Command::Serve { settings } => {
            cmd_serve(db, config.instance_key, settings.as_deref()).await
        }
        Command::Events {
            action: EventsAction::List { key, since },
        } => cmd_events_list(&db, key.unwrap_or(config.instance_key), since).await,
        Command::Ledger {
            action: LedgerAction::Show { key },
        } => cmd_ledger_show(&db, key.unwrap_or(config.instance_key)).await,
        Command::Results {
            action: ResultsAction::Read { vt },
        } => cmd_results_read(&db, vt).await,
        Command::CheckSettings { .. } => unreachable!("handled before connecting"),
    }
}

fn cmd_check_settings(path: &Path) -> anyhow::Result<()> {
    let settings = Settings::load(path)?;
    let config = settings.coordinator_config("<instance>")?;
    println!("Work timeout:    {:?}", config.work_timeout);
    println!("Sweep interval:  {:?}", config.sweep_interval());
    println!("Append timeout:  {:?}", config.append_timeout);
    println!("Inbox capacity:  {}", config.inbox_capacity);
    println!(
        "Restarts:        {} within {:?} (backoff {:?}, doubling up to {:?})",
        config.restart.max_restarts,
        config.restart.within,
        config.restart.backoff,
        config.restart.max_backoff
    );
    Ok(())
}

async fn cmd_serve(db: Db, instance_key: String, settings: Option<&Path>) -> anyhow::Result<()> {
    let settings = match settings {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    let coordinator_config = settings.coordinator_config(instance_key)?;
    db.create_queue(RESULTS_QUEUE).await?;

    info!(
        instance_key = %coordinator_config.instance_key,
        "starting coordinator without a worker transport"
    );
    let announcer = PgmqAnnouncer::new(db.clone());
    let (handle, mut task) = Coordinator::spawn(coordinator_config, db, announcer)?;

    let interrupted = tokio::select! {
        outcome = &mut task => {
            outcome??;
            false
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            true
        }
    };

    if interrupted {
        info!("interrupt received, shutting down");
        handle.shutdown();
        task.await??;
    }
    Ok(())
}

async fn cmd_events_list(db: &Db, key: String, since: u64) -> anyhow::Result<()> {
    let events = db.list_events(&key, since).await?;

    if events.is_empty() {
        println!("No events for '{key}'.");
        return Ok(());
    }

    println!("{:<8}  {:<24}  {:<20}  RECORDED", "SEQ", "KIND", "JOB");
    println!("{}", "-".repeat(80));
    for stored in &events {
        let job = stored
            .event
            .job_id()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<8}  {:<24}  {:<20}  {}",
            stored.seq,
            stored.event.kind(),
            job,
            stored.recorded_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    println!("\n{} event(s)", events.len());
    Ok(())
}

async fn cmd_ledger_show(db: &Db, key: String) -> anyhow::Result<()> {
    let events = db.list_events(&key, 0).await?;
    let ledger = Ledger::replay(events.iter().map(|stored| &stored.event));

    println!("Instance:     {key}");
    println!("Events:       {}", events.len());
    println!("Pending:      {}", ledger.pending_count());
    for job in ledger.pending() {
        println!("  - {}", job.id);
    }
    println!("In progress:  {}", ledger.in_progress_count());
    for job in ledger.in_progress() {
        println!("  - {}", job.id);
    }
    println!("Done:         {}", ledger.done_count());

    let retries = events
        .iter()
        .filter(|stored| {
            matches!(
                stored.event,
                LedgerEvent::WorkerFailed { .. } | LedgerEvent::WorkerTimedOut { .. }
            )
        })
        .count();
    println!("Requeues:     {retries}");
    Ok(())
}

async fn cmd_results_read(db: &Db, vt: i32) -> anyhow::Result<()> {
    let Some(msg) = db.read_from_queue(RESULTS_QUEUE, vt).await? else {
        println!("No results queued.");
        return Ok(());
    };

    println!("Message:   {} (read {} time(s))", msg.msg_id, msg.read_ct);
    println!("Enqueued:  {}", msg.enqueued_at);
    println!("{}", serde_json::to_string_pretty(&msg.message)?);

    db.archive_message(RESULTS_QUEUE, msg.msg_id).await?;
    Ok(())
}
