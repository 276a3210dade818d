//! `eventsock serve` - acceptor with ping/pong and chat relay

use std::net::SocketAddr;

use eventsock_net::{Acceptor, EventBindings};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Events every accepted connection understands
fn bindings(relay_tx: mpsc::UnboundedSender<(Uuid, Value)>) -> EventBindings {
    EventBindings::new()
        .on("ping", |conn, data| {
            let conn = conn.clone();
            let data = data.clone();
            tokio::spawn(async move {
                if let Err(e) = conn.emit("pong", &data).await {
                    warn!(conn_id = %conn.id(), error = %e, "Failed to answer ping");
                }
            });
        })
        .on("chat", move |conn, data| {
            let _ = relay_tx.send((conn.id(), data.clone()));
        })
}

/// Run until Ctrl-C
pub async fn run(addr: SocketAddr) -> anyhow::Result<()> {
    let (relay_tx, mut relay_rx) = mpsc::unbounded_channel();
    let acceptor = Acceptor::bind(addr, bindings(relay_tx)).await?;

    acceptor
        .on_connection(|conn| {
            let conn_id = conn.id();
            conn.on_close(move |close| {
                info!(conn_id = %conn_id, code = close.code, reason = %close.reason, "Peer closed");
            });
        })
        .await;

    info!(addr = %acceptor.addr(), "Serving");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some((from, data)) = relay_rx.recv() => {
                match acceptor.broadcast_except("chat", &data, from).await {
                    Ok(count) => tracing::debug!(from = %from, recipients = count, "Relayed chat"),
                    Err(e) => warn!(error = %e, "Relay failed"),
                }
            }
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
        }
    }

    acceptor.shutdown().await;
    Ok(())
}
