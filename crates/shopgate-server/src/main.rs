//! Shopgate Access-Control Server
//!
//! WebSocket server for RFID door and machine controllers plus admin
//! dashboards.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shopgate_server::monitor::{
    DEFAULT_HEARTBEAT_TIMEOUT_SECS, DEFAULT_SWEEP_INTERVAL_SECS, spawn_liveness_monitor,
};
use shopgate_server::server::{self, ServerContext};
use shopgate_server::storage::Database;

#[derive(Parser, Debug)]
#[command(name = "shopgate-server")]
#[command(
    version,
    about = "Shopgate access-control server - device auth, scan decisions, session accounting"
)]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "SHOPGATE_ADDR", default_value = "0.0.0.0:3000")]
    addr: SocketAddr,

    /// Path to SQLite database file.
    #[arg(long, env = "SHOPGATE_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Seconds between liveness sweeps.
    #[arg(long, default_value_t = DEFAULT_SWEEP_INTERVAL_SECS)]
    heartbeat_interval: u64,

    /// Seconds of heartbeat silence before a device is considered dead.
    #[arg(long, default_value_t = DEFAULT_HEARTBEAT_TIMEOUT_SECS)]
    heartbeat_timeout: u64,

    /// Create an admin account with this username, log its API key,
    /// and exit.
    #[arg(long)]
    bootstrap_admin: Option<String>,

    /// Password for the bootstrapped admin account.
    #[arg(long, env = "SHOPGATE_ADMIN_PASSWORD", requires = "bootstrap_admin")]
    bootstrap_password: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "shopgate_server=info".into()),
    );
    if args.log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %args.addr,
        "Starting shopgate-server"
    );

    let db = match &args.db_path {
        Some(path) => {
            info!(path = %path.display(), "Opening database");
            Database::open(path).await?
        }
        None => {
            let default_path = default_db_path()?;
            info!(path = %default_path.display(), "Opening database (default path)");
            Database::open(&default_path).await?
        }
    };

    if let Some(username) = &args.bootstrap_admin {
        let password = args
            .bootstrap_password
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("--bootstrap-admin requires a password"))?;
        let admin = db.create_admin(username, password).await?;
        info!(
            username = %admin.username,
            api_key = %admin.api_key,
            "Admin account created, store the API key now"
        );
        return Ok(());
    }

    let ctx = Arc::new(ServerContext::new(db.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let monitor = spawn_liveness_monitor(
        ctx.registry.clone(),
        db,
        ctx.broadcaster.clone(),
        Duration::from_secs(args.heartbeat_interval),
        Duration::from_secs(args.heartbeat_timeout),
        shutdown_rx.clone(),
    );

    let listener = TcpListener::bind(args.addr).await?;

    tokio::select! {
        result = server::run(listener, Arc::clone(&ctx), shutdown_rx) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = monitor.await;

    info!("Server stopped");
    Ok(())
}

fn default_db_path() -> anyhow::Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".shopgate").join("shopgate.db"))
}
