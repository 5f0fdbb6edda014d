#![forbid(unsafe_code)]

//! **warden-cli** – Command-line entry point for the Warden
//! operations-automation platform.
//!
//! Wires the CORE together (storage, bus, safety kernel, built-in modules)
//! and exposes a handful of operational subcommands. This is explicitly not
//! the REST/WebSocket transport — connectors, notifiers, and the dashboard
//! are external collaborators that plug into the running platform from
//! outside this binary.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warden_audit::AuditQuery;
use warden_config::WardenConfig;
use warden_runtime::{Runtime, RuntimeConfig, StorageChoice};

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Warden operations-automation platform")]
#[command(version)]
struct Cli {
    /// Path to the YAML/TOML configuration document. Defaults to an empty
    /// document (every module falls back to its compiled-in defaults).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Storage backend: `memory` or `sqlite`.
    #[arg(long, default_value = "memory", global = true)]
    storage: String,

    /// Database path, used only when `--storage sqlite`.
    #[arg(long, default_value = "warden.db", global = true)]
    db_path: PathBuf,

    /// Log level filter (trace, debug, info, warn, error), overridable via
    /// `RUST_LOG`.
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the platform and run until interrupted.
    Run,
    /// Inspect the audit trail.
    Audit {
        #[command(subcommand)]
        command: AuditCommands,
    },
    /// Print current module health.
    Health,
}

#[derive(Subcommand)]
enum AuditCommands {
    /// Query the append-only audit log.
    Query {
        /// Filter by exact action name.
        #[arg(long)]
        action: Option<String>,
        /// Filter by exact actor name.
        #[arg(long)]
        actor: Option<String>,
        /// Filter by subject prefix.
        #[arg(long)]
        subject_prefix: Option<String>,
        /// Maximum number of entries to print, most recent first.
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = match &cli.config {
        Some(path) => WardenConfig::load(path)?,
        None => WardenConfig::from_json(serde_json::json!({})),
    };
    let storage = match cli.storage.as_str() {
        "memory" => StorageChoice::Memory,
        "sqlite" => StorageChoice::Sqlite(cli.db_path.clone()),
        other => anyhow::bail!("unsupported storage backend '{other}'; expected 'memory' or 'sqlite'"),
    };

    let mut runtime = Runtime::assemble(RuntimeConfig { config, storage })?;
    runtime.start().await?;
    tracing::info!("warden platform started");

    match cli.command {
        Commands::Run => run_until_interrupted().await,
        Commands::Audit { command: AuditCommands::Query { action, actor, subject_prefix, limit } } => {
            let filter = AuditQuery { action, actor, subject_prefix, limit, ..Default::default() };
            let entries = runtime.audit_query(&filter).await;
            for entry in &entries {
                println!(
                    "{:>6}  {}  {:<24} {:<16} {:<24} {}",
                    entry.seq,
                    entry.timestamp.to_rfc3339(),
                    entry.action,
                    entry.actor,
                    entry.subject,
                    entry.details
                );
            }
            if entries.is_empty() {
                println!("(no matching audit entries)");
            }
        }
        Commands::Health => {
            for (module_id, health) in runtime.health() {
                println!("{module_id:<20} {:?}{}", health.status, health.message.map(|m| format!(" — {m}")).unwrap_or_default());
            }
        }
    }

    let report = runtime.stop().await;
    if !report.is_clean() {
        for (module_id, message) in &report.failures {
            tracing::warn!(module_id, message, "module failed to shut down cleanly");
        }
    }
    Ok(())
}

async fn run_until_interrupted() {
    tracing::info!("listening for events; press Ctrl+C to stop");
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(err) => tracing::error!(%err, "failed to listen for shutdown signal"),
    }
}

fn init_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer()).init();
}
