//! tagwardd: the Tagward daemon.
//!
//! Wires the gate together:
//! - Approval store (redb, or in-memory)
//! - Approval manager + expiry sweep
//! - Workload inventory from `tagward.toml`
//! - Gate orchestrator + resubmission loop
//!
//! Trigger events arrive as newline-delimited JSON on stdin; one JSON
//! report per event is written to stdout.
//!
//! # Usage
//!
//! ```text
//! tagwardd serve --config /etc/tagward/tagward.toml
//! tagwardd schedule check --annotation "0 0 2 * * *|1h"
//! tagwardd approvals list --provider kubernetes
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use tagward_approvals::{Approval, ApprovalManager, ApprovalView, EventSink, NoopSink};
use tagward_core::{Event, GateConfig, ProviderType};
use tagward_gate::{ChannelSink, Gate, InMemoryWorkloads};
use tagward_schedule::{UpdateSchedule, is_update_allowed};
use tagward_state::{Cache, JsonCodec, MemoryCache, RedbCache};
use tokio::io::AsyncBufReadExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,tagward=debug,tagwardd=debug";
const RESUBMISSION_CAPACITY: usize = 256;

#[derive(Parser)]
#[command(name = "tagwardd", about = "Tagward update gate daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gate, reading trigger events from stdin.
    Serve {
        /// Path to tagward.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Inspect maintenance windows.
    Schedule {
        #[command(subcommand)]
        command: ScheduleCommand,
    },

    /// Inspect approval requests.
    Approvals {
        #[command(subcommand)]
        command: ApprovalsCommand,
    },
}

#[derive(Subcommand)]
enum ScheduleCommand {
    /// Check whether an update would be allowed right now.
    Check {
        /// Schedule annotation value (`CRON|DURATION[,...]`).
        #[arg(long)]
        annotation: String,

        /// RFC 3339 time of the workload's last update.
        #[arg(long)]
        last_update: Option<String>,
    },
}

#[derive(Subcommand)]
enum ApprovalsCommand {
    /// Print approval requests as JSON.
    List {
        #[arg(long)]
        config: Option<PathBuf>,

        /// Only this provider (`kubernetes`, `helm`).
        #[arg(long)]
        provider: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Serve { config } => run_serve(load_config(config.as_deref())?).await,
        Command::Schedule {
            command:
                ScheduleCommand::Check {
                    annotation,
                    last_update,
                },
        } => check_schedule(&annotation, last_update.as_deref()),
        Command::Approvals {
            command: ApprovalsCommand::List { config, provider },
        } => list_approvals(&load_config(config.as_deref())?, provider.as_deref()),
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<GateConfig> {
    match path {
        Some(path) => GateConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(GateConfig::default()),
    }
}

fn open_cache(config: &GateConfig) -> anyhow::Result<Arc<dyn Cache>> {
    if config.store.in_memory {
        info!("using in-memory approval store");
        return Ok(Arc::new(MemoryCache::new()));
    }

    std::fs::create_dir_all(&config.store.data_dir).with_context(|| {
        format!(
            "failed to create data directory {}",
            config.store.data_dir.display()
        )
    })?;
    let db_path = config.db_path();
    let cache = RedbCache::open(&db_path).context("failed to open approval store")?;
    info!(path = ?db_path, "approval store opened");
    Ok(Arc::new(cache))
}

fn approval_manager(
    config: &GateConfig,
    sink: Arc<dyn EventSink>,
) -> anyhow::Result<Arc<ApprovalManager>> {
    Ok(Arc::new(ApprovalManager::new(
        open_cache(config)?,
        Arc::new(JsonCodec::<Approval>::new()),
        sink,
    )))
}

async fn run_serve(config: GateConfig) -> anyhow::Result<()> {
    info!("Tagward daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    let (sink, resubmitted) = ChannelSink::channel(RESUBMISSION_CAPACITY);
    let manager = approval_manager(&config, Arc::new(sink))?;

    let workloads = Arc::new(
        InMemoryWorkloads::from_config(&config.workloads)
            .context("invalid workload configuration")?,
    );
    info!(workloads = config.workloads.len(), "workload inventory loaded");

    let deadline = config
        .approvals
        .default_deadline()
        .context("approvals.default_deadline_hours is too large")?;
    let gate = Arc::new(
        Gate::new(workloads, manager.clone(), ProviderType::Kubernetes)
            .with_default_deadline(deadline),
    );
    for tracked in gate.tracked_images()? {
        debug!(image = %tracked, "tracking image");
    }

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let expiry_shutdown = shutdown_rx.clone();
    let resubmit_shutdown = shutdown_rx;

    // ── Start background tasks ─────────────────────────────────

    let expiry_interval = Duration::from_secs(config.approvals.expiry_interval_secs);
    let expiry_manager = manager.clone();
    let expiry_handle = tokio::spawn(async move {
        expiry_manager
            .run_expiry(expiry_interval, expiry_shutdown)
            .await;
    });

    let resubmit_gate = gate.clone();
    let resubmit_handle = tokio::spawn(async move {
        resubmit_gate
            .run_resubmissions(resubmitted, resubmit_shutdown)
            .await;
    });

    // ── Trigger events from stdin ──────────────────────────────

    info!("reading trigger events from stdin");
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => handle_event_line(&gate, &line),
                    Ok(None) => {
                        info!("stdin closed");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "failed to read trigger events");
                        break;
                    }
                }
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(error = %e, "failed to listen for shutdown signal");
                }
                info!("shutdown signal received");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = expiry_handle.await;
    let _ = resubmit_handle.await;

    info!("Tagward daemon stopped");
    Ok(())
}

fn handle_event_line(gate: &Gate, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let event: Event = match serde_json::from_str(line) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "ignoring malformed trigger event");
            return;
        }
    };

    match gate.submit(event) {
        Ok(report) => match serde_json::to_string(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => error!(error = %e, "failed to encode report"),
        },
        Err(e) => error!(error = %e, "failed to process trigger event"),
    }
}

fn check_schedule(annotation: &str, last_update: Option<&str>) -> anyhow::Result<()> {
    let schedule = UpdateSchedule::parse(annotation).context("invalid schedule annotation")?;
    let last_update = match last_update {
        Some(value) => DateTime::parse_from_rfc3339(value)
            .with_context(|| format!("invalid --last-update {value:?}"))?
            .with_timezone(&Utc),
        None => DateTime::<Utc>::UNIX_EPOCH,
    };
    let now = Utc::now();

    if let Some(schedule) = &schedule {
        for window in schedule.windows() {
            match window.previous_opening(now) {
                Ok(Some(opened)) => println!("{window}: last opened {}", opened.to_rfc3339()),
                Ok(None) => println!("{window}: no opening in the past week"),
                Err(e) => println!("{window}: {e}"),
            }
        }
    }

    let allowed = is_update_allowed(schedule.as_ref(), last_update, now);
    println!("{}", if allowed { "allowed" } else { "denied" });
    Ok(())
}

fn list_approvals(config: &GateConfig, provider: Option<&str>) -> anyhow::Result<()> {
    let provider = provider
        .map(|p| p.parse::<ProviderType>().map_err(anyhow::Error::msg))
        .transpose()?;
    let manager = approval_manager(config, Arc::new(NoopSink))?;

    let views: Vec<ApprovalView> = manager
        .list(provider)?
        .iter()
        .map(ApprovalView::from)
        .collect();
    println!("{}", serde_json::to_string_pretty(&views)?);
    Ok(())
}
