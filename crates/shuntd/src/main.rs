//! shuntd — the Shunt routing daemon.
//!
//! Single binary that assembles the gateway subsystems:
//! - Config/state store (redb)
//! - Routing engine with the HTTP upstream invoker
//! - Health monitor
//! - Metrics retention
//!
//! # Usage
//!
//! ```text
//! shuntd standalone --data-dir /var/lib/shunt --credentials /etc/shunt/credentials.toml
//! ```

mod upstream;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use shunt_config::ConfigService;
use shunt_engine::{Engine, TargetStateManager};
use shunt_health::{HealthChecker, HealthMonitor};
use shunt_metrics::MetricsCollector;
use shunt_state::Store;

use crate::upstream::{CredentialBook, HttpInvoker};

#[derive(Parser)]
#[command(name = "shuntd", about = "Shunt routing daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run in standalone mode (all subsystems in one process).
    Standalone {
        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/shunt")]
        data_dir: PathBuf,

        /// Credentials file mapping credential ids to endpoints.
        #[arg(long)]
        credentials: PathBuf,

        /// Per-request upstream timeout in seconds.
        #[arg(long, default_value = "120")]
        request_timeout: u64,

        /// Trace/event retention in days.
        #[arg(long, default_value = "30")]
        retention_days: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,shuntd=debug,shunt=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Standalone {
            data_dir,
            credentials,
            request_timeout,
            retention_days,
        } => run_standalone(data_dir, credentials, request_timeout, retention_days).await,
    }
}

async fn run_standalone(
    data_dir: PathBuf,
    credentials: PathBuf,
    request_timeout: u64,
    retention_days: u64,
) -> anyhow::Result<()> {
    info!("shunt daemon starting in standalone mode");

    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("shunt.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = Store::open(&db_path)?;
    info!(path = ?db_path, "store opened");

    let config = ConfigService::new(store.clone());
    let states = Arc::new(TargetStateManager::new());
    let metrics = MetricsCollector::new(store.clone());

    let book = CredentialBook::load(&credentials)?;
    info!(credentials = book.len(), "credential book loaded");
    let invoker = Arc::new(HttpInvoker::new(
        book,
        Duration::from_secs(request_timeout),
    ));

    let engine = Engine::new(
        config.clone(),
        Arc::clone(&states),
        metrics.clone(),
        invoker.clone(),
    );
    info!("routing engine initialized");

    let checker = Arc::new(HealthChecker::new(
        config.clone(),
        Arc::clone(&states),
        metrics.clone(),
        invoker,
    ));
    let monitor = HealthMonitor::new(
        config.clone(),
        Arc::clone(&states),
        metrics.clone(),
        checker,
    );
    info!("health monitor initialized");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor_shutdown = shutdown_rx.clone();
    let retention_shutdown = shutdown_rx.clone();
    let overview_shutdown = shutdown_rx;

    // ── Start background tasks ─────────────────────────────────

    let monitor_handle = tokio::spawn(async move {
        monitor.run(monitor_shutdown).await;
    });

    let retention_metrics = metrics.clone();
    let retention_handle = tokio::spawn(async move {
        retention_metrics
            .run_retention(
                Duration::from_secs(retention_days * 24 * 60 * 60),
                Duration::from_secs(60 * 60),
                retention_shutdown,
            )
            .await;
    });

    let overview_engine = engine.clone();
    let overview_handle = tokio::spawn(async move {
        log_overview_loop(overview_engine, overview_shutdown).await;
    });

    // ── Wait for shutdown ──────────────────────────────────────

    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C handler");
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = monitor_handle.await;
    let _ = retention_handle.await;
    let _ = overview_handle.await;

    info!("shunt daemon stopped");
    Ok(())
}

/// Log a periodic state summary for operators.
async fn log_overview_loop(engine: Engine, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(300));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match engine.overview() {
                    Ok(overview) => info!(
                        routing_enabled = overview.routing_enabled,
                        routes = overview.total_routes,
                        healthy = overview.healthy_routes,
                        degraded = overview.degraded_routes,
                        unhealthy = overview.unhealthy_routes,
                        "state overview"
                    ),
                    Err(e) => tracing::warn!(error = %e, "overview query failed"),
                }
            }
            changed = shutdown.changed() => {
                // A dropped sender means no one can cancel us anymore;
                // stop rather than spin.
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
