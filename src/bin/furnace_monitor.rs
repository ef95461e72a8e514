//! Furnace Monitor CLI
//!
//! ```bash
//! furnace-monitor example-config > monitor.toml
//! furnace-monitor run --config monitor.toml
//! furnace-monitor history --config monitor.toml latest -n 5
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::{DateTime, Duration as TimeSpan, Utc};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use furnace_monitor::{
    init_logging, open_store, CellMonitor, Field, MonitorConfig, MonitorError, MonitorResult,
    RegisterTransport, SimulatedTransport, Snapshot,
};

/// Furnace cell acquisition and persistence
#[derive(Parser, Debug)]
#[command(name = "furnace-monitor", version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults apply when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect, poll, and persist until Ctrl-C
    Run {
        /// Use an in-process simulated controller instead of the network
        #[arg(long)]
        simulate: bool,
    },

    /// Read every configured point once and print the snapshot as JSON
    Snapshot {
        #[arg(long)]
        simulate: bool,
    },

    /// Query or prune the history store
    History {
        #[command(subcommand)]
        query: HistoryCommand,
    },

    /// Print a configuration file with every default spelled out
    ExampleConfig,
}

#[derive(Subcommand, Debug)]
enum HistoryCommand {
    /// Most recent records, newest first
    Latest {
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },

    /// Records between two RFC 3339 instants, oldest first
    Range {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// Delete records older than the given number of hours
    Prune {
        #[arg(long)]
        older_than_hours: u64,
    },

    /// Temperature and pressure statistics over the last N hours
    Stats {
        #[arg(long, default_value_t = 24)]
        hours: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Commands::Run { simulate } => run(config, simulate).await,
        Commands::Snapshot { simulate } => snapshot(config, simulate).await,
        Commands::History { query } => history(config, query).await,
        Commands::ExampleConfig => MonitorConfig::default()
            .to_toml_string()
            .map(|text| print!("{}", text)),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> MonitorResult<MonitorConfig> {
    match path {
        Some(path) => MonitorConfig::from_file(path),
        None => Ok(MonitorConfig::default()),
    }
}

/// Simulated controller preloaded with a plausible idle cell.
fn simulated_cell(config: &MonitorConfig) -> SimulatedTransport {
    let sim = SimulatedTransport::new();
    for point in &config.polling.points {
        match point.field {
            Field::Door1Lock | Field::Door2Lock | Field::FurnaceStatus => {
                sim.set_bool(&point.address, true)
            }
            Field::FurnaceTemperature => sim.set(&point.address, 850),
            Field::FurnacePressure => sim.set(&point.address, 101),
            _ => {}
        }
    }
    sim
}

async fn run(config: MonitorConfig, simulate: bool) -> MonitorResult<()> {
    let stores = open_store(&config.history.connection).await?;
    if simulate {
        let transport = simulated_cell(&config);
        supervise(CellMonitor::new(config, transport, stores)?).await
    } else {
        supervise(CellMonitor::tcp(config, stores)?).await
    }
}

async fn supervise<T: RegisterTransport>(monitor: Arc<CellMonitor<T>>) -> MonitorResult<()> {
    let mut connection = monitor.events().subscribe_connection();
    let logger = tokio::spawn(async move {
        while let Ok(event) = connection.recv().await {
            info!(connected = event.is_connected, "{}", event.message);
        }
    });

    let outcome = monitor.connect().await;
    let reconnect = monitor
        .config()
        .plc
        .reconnect_interval()
        .map(|period| monitor.spawn_reconnect(period));
    if !outcome.success && reconnect.is_none() {
        monitor.shutdown().await;
        return Err(MonitorError::connection(outcome.message));
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    if let Some(handle) = reconnect {
        handle.abort();
    }
    monitor.shutdown().await;
    logger.abort();

    let stats = monitor.persistence().stats();
    info!(saved = stats.saved, failed = stats.failed, "monitor stopped");
    Ok(())
}

async fn snapshot(config: MonitorConfig, simulate: bool) -> MonitorResult<()> {
    let stores = open_store("memory://").await?;
    let snapshot = if simulate {
        let transport = simulated_cell(&config);
        read_once(CellMonitor::new(config, transport, stores)?).await?
    } else {
        read_once(CellMonitor::tcp(config, stores)?).await?
    };
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

async fn read_once<T: RegisterTransport>(monitor: Arc<CellMonitor<T>>) -> MonitorResult<Snapshot> {
    let outcome = monitor.client().connect().await;
    if !outcome.success {
        return Err(MonitorError::connection(outcome.message));
    }
    let snapshot = monitor.poll_once().await;
    monitor.client().disconnect().await;
    Ok(snapshot)
}

async fn history(config: MonitorConfig, query: HistoryCommand) -> MonitorResult<()> {
    let stores = open_store(&config.history.connection).await?;
    let history = &stores.history;

    match query {
        HistoryCommand::Latest { limit } => {
            for record in history.latest(limit).await? {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
        HistoryCommand::Range { start, end } => {
            for record in history.range(start, end).await? {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
        HistoryCommand::Prune { older_than_hours } => {
            let cutoff = Utc::now() - TimeSpan::hours(older_than_hours as i64);
            let removed = history.delete_before(cutoff).await?;
            println!("removed {} records older than {}", removed, cutoff);
        }
        HistoryCommand::Stats { hours } => {
            let end = Utc::now();
            let start = end - TimeSpan::hours(hours as i64);
            let stats = history.statistics(start, end).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }
    Ok(())
}
