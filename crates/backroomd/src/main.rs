//! backroomd: runs the scheduling loop until interrupted.

mod logging;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use backroom::config::{default_config_path, load_config, Config};
use backroom::db::stats_repo;
use backroom::{Database, Engine, EngineOptions, HttpAnalyzer, InboxScanner, ScheduleLoop, StateStore};
use clap::Parser;
use log::{error, info, warn};
use tokio::sync::broadcast;

#[derive(Parser, Debug)]
#[command(name = "backroomd")]
#[command(version, about = "Document analysis scheduler", long_about = None)]
struct Args {
    /// Config file (JSON or YAML). Defaults to $BACKROOM_CONFIG or the user config dir.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the database path from the config
    #[arg(long)]
    database: Option<PathBuf>,

    /// Override the inbox directory from the config
    #[arg(long)]
    inbox: Option<PathBuf>,

    /// Write a JSON snapshot of the stored state to this file and exit
    #[arg(long, value_name = "FILE")]
    export_snapshot: Option<PathBuf>,

    /// Print processing statistics for a date range (YYYY-MM-DD..YYYY-MM-DD) and exit
    #[arg(long, value_name = "RANGE")]
    stats: Option<String>,

    /// With --stats, print the daily rows of one endpoint instead of the summary
    #[arg(long, value_name = "ID", requires = "stats")]
    endpoint: Option<String>,
}

fn resolve_config(args: &Args) -> Result<Config, backroom::ConfigError> {
    match args.config.clone().or_else(default_config_path) {
        Some(path) if path.exists() => {
            info!("Loading config from {}", path.display());
            load_config(&path)
        }
        Some(path) if args.config.is_some() => load_config(&path),
        _ => {
            warn!("No config file found, using defaults");
            Ok(Config::default())
        }
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = resolve_config(&args)?;

    let db_path = args
        .database
        .clone()
        .or_else(|| config.resolved_database_path())
        .ok_or("cannot determine database path")?;
    let db = Database::open(&db_path)?;
    info!("Database at {}", db_path.display());

    if let Some(range) = &args.stats {
        let (from, to) = range.split_once("..").unwrap_or((range.as_str(), range.as_str()));
        let json = match &args.endpoint {
            Some(endpoint) => {
                let rows = stats_repo::query(&db, Some(from), Some(to), Some(endpoint))?;
                serde_json::to_string_pretty(&rows)?
            }
            None => serde_json::to_string_pretty(&stats_repo::summary(&db, from, to)?)?,
        };
        println!("{}", json);
        return Ok(());
    }

    let store = StateStore::new(db);

    // Exports the stored rows as they are; no recovery is applied.
    if let Some(path) = &args.export_snapshot {
        store.load()?.write_to(path)?;
        info!("Snapshot written to {}", path.display());
        return Ok(());
    }

    let analyzer = HttpAnalyzer::new(config.analysis_timeout())?;
    let engine = Engine::load(
        Arc::new(analyzer),
        tokio::runtime::Handle::current(),
        EngineOptions::from(&config),
        store,
    )?;

    for endpoint in config.seed_endpoints() {
        let id = endpoint.id.clone();
        match engine.seed_endpoint(endpoint) {
            Ok(true) => info!("Seeded endpoint {}", id),
            Ok(false) => {}
            Err(e) => warn!("Skipping endpoint {}: {}", id, e),
        }
    }

    let engine = Arc::new(engine);
    let mut schedule = ScheduleLoop::new(Arc::clone(&engine), config.tick_interval());
    if let Some(inbox) = args.inbox.clone().or_else(|| config.resolved_inbox_directory()) {
        std::fs::create_dir_all(&inbox)?;
        info!("Watching inbox {}", inbox.display());
        schedule = schedule.with_inbox(InboxScanner::new(inbox, config.defaults.batch_config()));
    }

    let (trigger_tx, trigger_rx) = broadcast::channel(16);
    let handle = schedule.start(trigger_rx)?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    schedule.stop();
    let _ = trigger_tx.send(());
    if handle.join().is_err() {
        error!("Scheduling loop panicked");
    }

    let overview = engine.overview();
    info!(
        "Stopped at tick {}: {} queued, {} processing, {} batches",
        overview.tick, overview.queued_jobs, overview.processing_jobs, overview.total_batches
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init_logging(logging::LogFormat::from_env());
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
