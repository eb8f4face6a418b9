//! Per-connection plumbing: WebSocket handshake, writer task, and the
//! read loop feeding the dispatcher.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use shopgate_proto::{ClientMessage, ServerMessage};

use crate::registry::{Outbound, next_conn_id};

use super::ServerContext;
use super::handler::{self, ConnState};

/// Outbound channel depth per connection. Handler replies and admin
/// fan-out both ride this channel; a peer that stops reading hits
/// backpressure here instead of growing server memory.
const OUTBOUND_BUFFER: usize = 64;

const ERR_INVALID_MESSAGE: &str = "Invalid message format";

/// Drive one client connection from handshake to cleanup.
pub async fn handle_connection(ctx: Arc<ServerContext>, stream: TcpStream, peer: SocketAddr) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%peer, error = %e, "WebSocket handshake failed");
            return;
        }
    };

    let conn_id = next_conn_id();
    debug!(%peer, conn_id, "Connection established");

    let (mut sink, mut source) = ws.split();
    let (outbound, mut to_write) = mpsc::channel::<Message>(OUTBOUND_BUFFER);

    // Single writer task per connection, so handler replies and
    // broadcast frames never interleave on the socket.
    let writer = tokio::spawn(async move {
        while let Some(msg) = to_write.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() || closing {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut state = ConnState::Unauthenticated;

    while let Some(frame) = source.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!(%peer, conn_id, error = %e, "Read error, dropping connection");
                break;
            }
        };

        match frame {
            Message::Text(text) => {
                dispatch(&ctx, conn_id, &mut state, &outbound, &text).await;
            }
            Message::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => dispatch(&ctx, conn_id, &mut state, &outbound, &text).await,
                Err(_) => {
                    handler::send(&outbound, &ServerMessage::error(ERR_INVALID_MESSAGE)).await;
                }
            },
            Message::Close(_) => break,
            // Transport-level liveness, distinct from protocol heartbeats.
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }

    handler::handle_disconnect(&ctx, state).await;

    // All sender clones are released by cleanup above; dropping ours
    // lets the writer drain and close the socket.
    drop(outbound);
    let _ = writer.await;
    debug!(%peer, conn_id, "Connection closed");
}

async fn dispatch(
    ctx: &ServerContext,
    conn_id: u64,
    state: &mut ConnState,
    outbound: &Outbound,
    text: &str,
) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => handler::handle_message(ctx, conn_id, state, outbound, msg).await,
        Err(e) => {
            debug!(conn_id, error = %e, "Unparseable client message");
            handler::send(outbound, &ServerMessage::error(ERR_INVALID_MESSAGE)).await;
        }
    }
}
