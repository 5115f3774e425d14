use chrono::Utc;
use clap::{Parser, Subcommand};
use escrowd::application::disputes::DisputeEngine;
use escrowd::application::ledger::EscrowLedger;
use escrowd::application::scheduler::Scheduler;
use escrowd::config::Config;
use escrowd::domain::clock::{ClockArc, ManualClock, SystemClock};
use escrowd::domain::ports::Stores;
use escrowd::infrastructure::in_memory::in_memory_stores;
#[cfg(feature = "storage-rocksdb")]
use escrowd::infrastructure::rocksdb::RocksDBStore;
use escrowd::infrastructure::reputation::ReputationBook;
use escrowd::interfaces::csv::entry_writer::EntryWriter;
use escrowd::interfaces::csv::replay::Replay;
use escrowd::interfaces::csv::scenario_reader::ScenarioReader;
use escrowd::interfaces::http::{self, AppState};
use escrowd::logging::init_logging;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file. ESCROWD_* environment variables override it.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API and run the auto-release scheduler.
    Serve {
        /// Listen address, e.g. 0.0.0.0:8080.
        #[arg(long)]
        bind: Option<String>,

        /// Path to persistent database (optional). If provided, uses RocksDB.
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Replay a scenario CSV on a simulated clock and print the final escrow
    /// entries as CSV.
    Replay {
        /// Input scenario CSV file.
        input: PathBuf,

        /// Path to persistent database (optional). If provided, uses RocksDB.
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).into_diagnostic()?;
    init_logging(&config.logging, cli.verbose).into_diagnostic()?;

    match cli.command {
        Commands::Serve { bind, db_path } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if db_path.is_some() {
                config.storage.db_path = db_path;
            }
            serve(config).await
        }
        Commands::Replay { input, db_path } => {
            if db_path.is_some() {
                config.storage.db_path = db_path;
            }
            replay(config, input).await
        }
    }
}

fn open_stores(db_path: Option<&Path>) -> escrowd::error::Result<Stores> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            info!(path = %path.display(), "using RocksDB storage");
            Ok(RocksDBStore::open(path)?.stores())
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            tracing::warn!(
                "Persistent storage requested via --db-path, but 'storage-rocksdb' \
                 feature is not enabled. Falling back to in-memory storage."
            );
            Ok(in_memory_stores())
        }
        None => Ok(in_memory_stores()),
    }
}

fn build_scheduler(
    config: &Config,
    stores: &Stores,
    clock: ClockArc,
    reputation: &ReputationBook,
) -> Scheduler {
    let ledger = Arc::new(EscrowLedger::new(stores, clock.clone(), config.policy()));
    let engine = Arc::new(DisputeEngine::new(
        ledger,
        stores,
        Arc::new(reputation.clone()),
        clock,
    ));
    Scheduler::new(engine, config.sweep_interval())
}

async fn serve(config: Config) -> Result<()> {
    let stores = open_stores(config.storage.db_path.as_deref()).into_diagnostic()?;
    let reputation = ReputationBook::new(config.voting.min_reputation);
    let scheduler = build_scheduler(&config, &stores, Arc::new(SystemClock), &reputation);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = scheduler.clone().spawn(shutdown_rx);

    let app = http::app(AppState::new(scheduler, reputation));
    let listener = TcpListener::bind(&config.server.bind)
        .await
        .into_diagnostic()?;
    info!(bind = %config.server.bind, "escrowd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .into_diagnostic()?;

    // A closed channel also stops the scheduler, so a failed send is fine.
    let _ = shutdown_tx.send(true);
    sweeper.await.into_diagnostic()?;
    info!("escrowd stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => {
            error!(error = %e, "cannot listen for ctrl-c, running until killed");
            std::future::pending::<()>().await;
        }
    }
}

async fn replay(config: Config, input: PathBuf) -> Result<()> {
    let stores = open_stores(config.storage.db_path.as_deref()).into_diagnostic()?;
    let reputation = ReputationBook::new(config.voting.min_reputation);
    let clock = ManualClock::new(Utc::now());
    let scheduler = build_scheduler(&config, &stores, Arc::new(clock.clone()), &reputation);
    let engine = scheduler.engine().clone();

    let file = File::open(&input).into_diagnostic()?;
    let summary = Replay::new(scheduler, clock)
        .run(ScenarioReader::new(file))
        .await;
    info!(
        applied = summary.applied,
        rejected = summary.rejected,
        "replay finished"
    );

    let entries = engine.ledger().entries().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = EntryWriter::new(stdout.lock());
    writer.write_entries(entries).into_diagnostic()?;

    Ok(())
}
