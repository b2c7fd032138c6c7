//! tasuki - polling worker for a shared JSON task queue
//!
//! ```text
//! tasuki run                          # poll and execute until Ctrl-C
//! tasuki enqueue courses/a.md         # write a waiting record
//! tasuki status --stuck-after-secs 600
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use tasuki_core::app::{QueueCounts, WorkerGroup, stuck_in_progress};
use tasuki_core::config::TasukiConfig;
use tasuki_core::domain::{PayloadRef, TaskId};
use tasuki_core::impls::Backend;
use tasuki_core::ports::{Clock, IdGenerator, SystemClock, UlidGenerator};

/// Upper bound for `--stuck-after-secs` (about 100 years).
const MAX_STUCK_AFTER_SECS: i64 = 100 * 365 * 24 * 60 * 60;

#[derive(Parser)]
#[command(name = "tasuki")]
#[command(about = "Polling worker for a shared JSON task queue")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "TASUKI_CONFIG", default_value = "tasuki.toml", global = true)]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Queue namespace (overrides queue.namespace)
    #[arg(long, env = "TASUKI_NAMESPACE", global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the queue and execute tasks until interrupted
    Run {
        /// Number of poll loops (overrides queue.workers)
        #[arg(long)]
        workers: Option<usize>,

        /// Sleep after an empty poll, in milliseconds (overrides queue.empty_poll_delay_ms)
        #[arg(long)]
        empty_poll_delay_ms: Option<u64>,
    },

    /// Write a waiting record
    Enqueue {
        /// Reference handed to the executor
        payload_ref: String,

        /// Record key (a ULID is generated when omitted)
        #[arg(long)]
        id: Option<String>,
    },

    /// Show record counts and long-running in-progress records
    Status {
        /// Report in-progress records not updated for this many seconds
        #[arg(
            long,
            default_value_t = 3600,
            value_parser = clap::value_parser!(i64).range(0..=MAX_STUCK_AFTER_SECS)
        )]
        stuck_after_secs: i64,
    },
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout is reserved for command output
    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(path: &Path, namespace: Option<String>) -> Result<TasukiConfig> {
    let mut config = TasukiConfig::load(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    if let Some(namespace) = namespace {
        config.queue.namespace = namespace;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = load_config(&cli.config, cli.namespace)?;

    match cli.command {
        Commands::Run {
            workers,
            empty_poll_delay_ms,
        } => {
            if let Some(workers) = workers {
                config.queue.workers = workers;
            }
            if let Some(delay) = empty_poll_delay_ms {
                config.queue.empty_poll_delay_ms = delay;
            }
            config.validate()?;
            run(&config).await
        }
        Commands::Enqueue { payload_ref, id } => {
            config.validate()?;
            enqueue(&config, payload_ref, id).await
        }
        Commands::Status { stuck_after_secs } => {
            config.validate()?;
            status(&config, stuck_after_secs).await
        }
    }
}

async fn run(config: &TasukiConfig) -> Result<()> {
    let backend = Backend::open(config)?;
    let executor = Arc::new(config.executor.command()?);
    if matches!(backend, Backend::Memory(_)) {
        warn!("memory store is process-local; nothing can enqueue into this worker");
    }

    info!(
        namespace = %config.queue.namespace,
        workers = config.queue.workers,
        empty_poll_delay_ms = config.queue.empty_poll_delay_ms,
        "starting workers"
    );
    let group = WorkerGroup::spawn(
        config.queue.workers,
        backend.records(),
        executor,
        Arc::new(SystemClock),
        &config.queue,
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutdown requested, waiting for in-flight tasks");

    let stats = group.shutdown_and_join().await;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn enqueue(config: &TasukiConfig, payload_ref: String, id: Option<String>) -> Result<()> {
    if payload_ref.trim().is_empty() {
        bail!("payload_ref must not be empty");
    }
    let backend = Backend::open(config)?;
    let id = match id {
        Some(id) => TaskId::new(id),
        None => UlidGenerator::new(SystemClock).generate_task_id(),
    };

    backend
        .producer()
        .enqueue(&id, &PayloadRef::new(payload_ref))
        .await
        .with_context(|| format!("failed to enqueue {id}"))?;

    info!(task_id = %id, namespace = %config.queue.namespace, "enqueued task");
    println!("{id}");
    Ok(())
}

async fn status(config: &TasukiConfig, stuck_after_secs: i64) -> Result<()> {
    let stuck_after = chrono::Duration::try_seconds(stuck_after_secs)
        .with_context(|| format!("stuck-after-secs out of range: {stuck_after_secs}"))?;
    let backend = Backend::open(config)?;
    let records = backend.records().list().await?;

    let counts = QueueCounts::tally(records.iter().map(|(_, record)| record));
    let stuck = stuck_in_progress(
        records.iter().map(|(id, record)| (id, record)),
        SystemClock.now(),
        stuck_after,
    );

    let stuck: Vec<_> = stuck
        .into_iter()
        .map(|(id, last_updated)| json!({ "id": id, "lastUpdated": last_updated }))
        .collect();
    let report = json!({
        "namespace": config.queue.namespace,
        "counts": counts,
        "stuck": stuck,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
