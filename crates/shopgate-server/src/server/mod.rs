//! WebSocket server: accept loop, per-connection tasks, and the
//! protocol dispatcher.

pub mod connection;
pub mod handler;


use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::broadcast::AdminBroadcaster;
use crate::engine::AccessEngine;
use crate::registry::DeviceRegistry;
use crate::storage::Database;

/// Shared state handed to every connection task.
#[derive(Clone)]
pub struct ServerContext {
    pub db: Database,
    pub registry: DeviceRegistry,
    pub broadcaster: AdminBroadcaster,
    pub engine: AccessEngine,
}

impl ServerContext {
    pub fn new(db: Database) -> Self {
        Self {
            engine: AccessEngine::new(db.clone()),
            registry: DeviceRegistry::new(),
            broadcaster: AdminBroadcaster::new(),
            db,
        }
    }
}

/// Accept connections until the shutdown signal fires. Each connection
/// gets its own task; a failed accept is logged and the loop continues.
pub async fn run(
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "WebSocket server listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let ctx = Arc::clone(&ctx);
                        tokio::spawn(async move {
                            connection::handle_connection(ctx, stream, peer).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown.changed() => {
                info!("Accept loop shutting down");
                return Ok(());
            }
        }
    }
}
