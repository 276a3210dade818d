//! WebSocket transport
//!
//! [`WsTransport`] is the connection's handle: it only queues frames. The
//! socket itself is owned by one task running [`run`], which performs the
//! handshake and then pumps frames in both directions until the socket
//! closes, reporting every lifecycle signal to the [`Connection`].

use std::future::Future;
use std::time::Duration;

use eventsock_core::{Connection, Transport, CLOSE_ABNORMAL};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Close code reported when the peer's close frame carried no status
const CLOSE_NO_STATUS: u16 = 1005;

/// How long to wait for the peer to answer our close frame
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Work queued for the socket task
#[derive(Debug)]
pub(crate) enum Outbound {
    Text(String),
    Close(u16, String),
}

/// Transport handle backed by a socket task
pub struct WsTransport {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl WsTransport {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for WsTransport {
    fn send(&self, text: String) -> eventsock_core::Result<()> {
        self.tx
            .send(Outbound::Text(text))
            .map_err(|_| eventsock_core::Error::Transport("socket task has stopped".into()))
    }

    fn close(&self, code: u16, reason: &str) {
        let _ = self.tx.send(Outbound::Close(code, reason.to_string()));
    }
}

/// Complete the handshake, then drive the socket until it closes
pub(crate) async fn run<S, H>(
    conn: Connection,
    handshake: H,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
    H: Future<Output = Result<WebSocketStream<S>>>,
{
    let ws = tokio::select! {
        result = handshake => match result {
            Ok(ws) => ws,
            Err(e) => {
                conn.handle_error(e.into_core());
                conn.handle_close(CLOSE_ABNORMAL, "handshake failed");
                return;
            }
        },
        (code, reason) = close_requested(&mut outbound) => {
            debug!(conn_id = %conn.id(), "Closed before handshake completed");
            conn.handle_close(code, &reason);
            return;
        }
    };

    // A close requested mid-handshake is still queued; drive sends it
    conn.handle_open();
    drive(&conn, ws, outbound).await;
}

/// Wait for a close request while the handshake is still running
async fn close_requested(outbound: &mut mpsc::UnboundedReceiver<Outbound>) -> (u16, String) {
    loop {
        match outbound.recv().await {
            Some(Outbound::Close(code, reason)) => return (code, reason),
            // Emits wait for `Open`, so nothing is queued before the handshake
            Some(Outbound::Text(_)) => continue,
            None => return (CLOSE_ABNORMAL, String::new()),
        }
    }
}

/// Main socket loop - inbound frames and outbound commands
async fn drive<S>(
    conn: &Connection,
    ws: WebSocketStream<S>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut writer, mut reader) = ws.split();
    let mut pending_close: Option<(u16, String)> = None;
    let close_deadline = tokio::time::sleep(Duration::MAX);
    tokio::pin!(close_deadline);

    loop {
        tokio::select! {
            frame = reader.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    conn.handle_message(text.as_str());
                }
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => {
                        conn.handle_message(text);
                    }
                    Err(_) => {
                        debug!(
                            conn_id = %conn.id(),
                            len = bytes.len(),
                            "Ignoring non-text binary frame"
                        );
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    // Report our own code when this is the answer to our close
                    let (code, reason) = pending_close.take().unwrap_or_else(|| {
                        frame
                            .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                            .unwrap_or((CLOSE_NO_STATUS, String::new()))
                    });
                    // Flush tungstenite's queued close reply
                    let _ = writer.close().await;
                    conn.handle_close(code, &reason);
                    return;
                }
                // Ping/pong are answered by tungstenite
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(e)) => {
                    conn.handle_error(Error::from(e).into_core());
                    conn.handle_close(CLOSE_ABNORMAL, "read failed");
                    return;
                }
                None => {
                    let (code, reason) = pending_close
                        .take()
                        .unwrap_or((CLOSE_ABNORMAL, String::new()));
                    conn.handle_close(code, &reason);
                    return;
                }
            },

            cmd = outbound.recv(), if pending_close.is_none() => match cmd {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = writer.send(Message::Text(text.into())).await {
                        conn.handle_error(Error::from(e).into_core());
                        conn.handle_close(CLOSE_ABNORMAL, "write failed");
                        return;
                    }
                }
                Some(Outbound::Close(code, reason)) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    if let Err(e) = writer.send(Message::Close(Some(frame))).await {
                        warn!(conn_id = %conn.id(), error = %e, "Failed to send close frame");
                        conn.handle_close(code, &reason);
                        return;
                    }
                    pending_close = Some((code, reason));
                    close_deadline
                        .as_mut()
                        .reset(tokio::time::Instant::now() + CLOSE_TIMEOUT);
                }
                None => {
                    let _ = writer.close().await;
                    conn.handle_close(CLOSE_ABNORMAL, "transport released");
                    return;
                }
            },

            _ = &mut close_deadline, if pending_close.is_some() => {
                let (code, reason) = pending_close
                    .take()
                    .unwrap_or((CLOSE_ABNORMAL, String::new()));
                debug!(conn_id = %conn.id(), "Peer did not answer close frame");
                conn.handle_close(code, &reason);
                return;
            }
        }
    }
}
