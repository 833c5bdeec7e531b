mod config;
mod scheduler;
mod worker;

use crate::scheduler::TokioScheduler;
use crate::worker::start_chunk_worker;
use backup_engine::database::{Database, SqliteDatabase};
use backup_engine::store::SqliteJobStore;
use backup_engine::utils::logger;
use backup_engine::{BackupCoordinator, ChunkProcessor, Config, EngineState, RestoreOptions};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a backup and, unless detached, process it to the end
    Create {
        #[arg(long)]
        no_database: bool,
        #[arg(long)]
        no_files: bool,
        /// Only record the job; a running `run` daemon picks it up
        #[arg(long)]
        detach: bool,
    },
    /// Show progress of a backup
    Status { backup_id: String },
    /// Cancel a running backup
    Cancel { backup_id: String },
    /// List completed backups, newest first
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Delete a completed backup
    Delete { backup_id: String },
    /// Restore a completed backup
    Restore {
        backup_id: String,
        #[arg(long)]
        no_database: bool,
        #[arg(long)]
        no_files: bool,
        /// Extract files here instead of the configured site root
        #[arg(long, value_name = "DIR")]
        destination: Option<PathBuf>,
    },
    /// Process scheduled chunks until SIGINT/SIGTERM, resuming unfinished backups
    Run,
}

struct Host {
    coordinator: BackupCoordinator,
    processor: Arc<ChunkProcessor>,
    queue: tokio::sync::mpsc::UnboundedReceiver<backup_engine::scheduler::ScheduledTask>,
}

fn build_host(config: Config) -> anyhow::Result<Host> {
    let store = Arc::new(SqliteJobStore::open(&config.store.path)?);
    let database: Option<Arc<dyn Database>> = match &config.database.path {
        Some(path) => Some(Arc::new(SqliteDatabase::open(path)?)),
        None => None,
    };
    let (scheduler, queue) = TokioScheduler::new();

    let state = EngineState::new(config, store, Arc::new(scheduler), database);
    Ok(Host {
        coordinator: BackupCoordinator::new(state.clone()),
        processor: Arc::new(ChunkProcessor::new(state)),
        queue,
    })
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = config::load(args.config.as_deref())?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    logger::init(log_level)?;

    let Host {
        coordinator,
        processor,
        queue,
    } = build_host(config)?;

    match args.command {
        Command::Create {
            no_database,
            no_files,
            detach,
        } => {
            let cancel = CancellationToken::new();
            // Detached: the job stays pending for `run`; the queue stays open until exit
            let worker = if detach {
                None
            } else {
                Some(start_chunk_worker(processor, queue, cancel.clone()))
            };

            let summary = coordinator.create(!no_database, !no_files)?;
            if let Some(worker) = worker {
                let status = wait_for_terminal(&coordinator, &summary.backup_id).await?;
                cancel.cancel();
                let _ = tokio::time::timeout(Duration::from_secs(5), worker).await;
                print_json(&status)?;
            } else {
                print_json(&summary)?;
            }
        }
        Command::Status { backup_id } => print_json(&coordinator.status(&backup_id)?)?,
        Command::Cancel { backup_id } => {
            coordinator.cancel(&backup_id)?;
            print_json(&json!({ "backup_id": backup_id, "cancelled": true }))?;
        }
        Command::List { limit } => print_json(&coordinator.list(limit)?)?,
        Command::Delete { backup_id } => {
            coordinator.delete(&backup_id)?;
            print_json(&json!({ "backup_id": backup_id, "deleted": true }))?;
        }
        Command::Restore {
            backup_id,
            no_database,
            no_files,
            destination,
        } => {
            let options = RestoreOptions {
                database: !no_database,
                files: !no_files,
                destination,
            };
            let report = tokio::task::spawn_blocking(move || coordinator.restore(&backup_id, &options)).await??;
            print_json(&report)?;
        }
        Command::Run => run_daemon(coordinator, processor, queue).await?,
    }

    Ok(())
}

async fn run_daemon(
    coordinator: BackupCoordinator,
    processor: Arc<ChunkProcessor>,
    queue: tokio::sync::mpsc::UnboundedReceiver<backup_engine::scheduler::ScheduledTask>,
) -> anyhow::Result<()> {
    tracing::info!("Starting backup-host v{}", env!("CARGO_PKG_VERSION"));

    let cancel = CancellationToken::new();
    let worker = start_chunk_worker(processor, queue, cancel.clone());

    let resumed = coordinator.resume_pending()?;
    tracing::info!(count = resumed.len(), "Unfinished backups resumed");

    shutdown_signal(cancel.clone()).await;

    // The chunk in flight runs to its end; its successor stays persisted
    tracing::info!("Shutting down...");
    match tokio::time::timeout(Duration::from_secs(30), worker).await {
        Ok(Ok(())) => tracing::info!("Worker stopped"),
        Ok(Err(e)) => tracing::error!("Worker task panicked: {}", e),
        Err(_) => tracing::warn!("Worker shutdown timeout, forcing exit"),
    }
    Ok(())
}

/// Poll job state until it terminates or the process is interrupted
async fn wait_for_terminal(
    coordinator: &BackupCoordinator,
    backup_id: &str,
) -> anyhow::Result<backup_engine::coordinator::JobProgress> {
    let mut interval = tokio::time::interval(Duration::from_millis(500));
    let mut last_chunk = usize::MAX;
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::warn!(backup_id = %backup_id, "Interrupted; run `backup-host run` to resume");
                return Ok(coordinator.status(backup_id)?);
            }
            _ = interval.tick() => {
                let status = coordinator.status(backup_id)?;
                if status.status.is_terminal() {
                    return Ok(status);
                }
                if status.current_chunk != last_chunk {
                    last_chunk = status.current_chunk;
                    tracing::info!(
                        backup_id = %backup_id,
                        progress = status.progress,
                        chunk = status.current_chunk,
                        chunks_total = status.chunks_total,
                        "Backup in progress"
                    );
                }
            }
        }
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl+c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }

    cancel.cancel();
}
