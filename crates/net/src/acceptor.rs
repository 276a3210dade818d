//! WebSocket acceptor - the listening peer
//!
//! Every accepted socket becomes its own [`Connection`] with its own
//! subscriptions. Event bindings registered on the acceptor are applied to
//! each connection individually, and each handler is told which connection
//! the event arrived on.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use eventsock_core::{run_hook, Connection, Multiplexer, SendGuard, CLOSE_GOING_AWAY};
use serde::Serialize;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::transport::{self, WsTransport};

/// Handler bound by the acceptor; receives the connection the event came in on
pub type ConnectionHandler = Arc<dyn Fn(&Connection, &Value) + Send + Sync>;

/// Called once for every accepted connection, before it opens
pub type ConnectionHook = Arc<dyn Fn(&Connection) + Send + Sync>;

/// A batch of event handlers applied to every accepted connection
#[derive(Clone, Default)]
pub struct EventBindings {
    entries: Vec<(String, ConnectionHandler)>,
}

impl EventBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler; several handlers may share an event name
    pub fn on<F>(mut self, event: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Connection, &Value) + Send + Sync + 'static,
    {
        self.entries.push((event.into(), Arc::new(f)));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reject empty event names up front
    pub fn validate(&self) -> Result<()> {
        for (event, _) in &self.entries {
            eventsock_core::envelope::validate_event_name(event).map_err(|_| {
                eventsock_core::Error::InvalidArgument(
                    "event name must be a non-empty string".into(),
                )
            })?;
        }
        Ok(())
    }

    /// Subscribe every binding on one connection
    fn apply(&self, conn: &Connection) -> Result<()> {
        for (event, handler) in &self.entries {
            let weak = conn.downgrade();
            let handler = handler.clone();
            conn.subscribe(event, move |data| {
                if let Some(conn) = weak.upgrade() {
                    handler(&conn, data);
                }
            })?;
        }
        Ok(())
    }
}

/// A connection accepted by the listener
#[derive(Debug, Clone)]
pub struct AcceptedConnection {
    pub connection: Connection,
    pub addr: SocketAddr,
    pub accepted_at: DateTime<Utc>,
}

/// Acceptor state shared across tasks
struct AcceptorState {
    connections: HashMap<Uuid, AcceptedConnection>,
    /// Every batch ever bound, applied in order to new connections
    bindings: Vec<EventBindings>,
    on_connection: Option<ConnectionHook>,
    guard: SendGuard,
}

/// Listening event socket
pub struct Acceptor {
    addr: SocketAddr,
    state: Arc<RwLock<AcceptorState>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Acceptor {
    /// Bind a listener and start accepting connections
    pub async fn bind(addr: SocketAddr, bindings: EventBindings) -> Result<Self> {
        Self::bind_with_guard(addr, bindings, SendGuard::default()).await
    }

    /// Like [`Acceptor::bind`] with a custom wait-for-open budget
    pub async fn bind_with_guard(
        addr: SocketAddr,
        bindings: EventBindings,
        guard: SendGuard,
    ) -> Result<Self> {
        bindings.validate()?;

        let listener = TcpListener::bind(addr).await?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, bindings = bindings.len(), "Acceptor listening");

        let (shutdown_tx, _) = broadcast::channel(1);

        let state = Arc::new(RwLock::new(AcceptorState {
            connections: HashMap::new(),
            bindings: vec![bindings],
            on_connection: None,
            guard,
        }));

        let state_clone = state.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(accept_loop(listener, state_clone, shutdown_rx));

        Ok(Acceptor {
            addr: bound_addr,
            state,
            shutdown_tx,
        })
    }

    /// Get the listener's bound address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bind more handlers onto every active connection and all future ones
    pub async fn bind_events(&self, bindings: EventBindings) -> Result<()> {
        bindings.validate()?;

        let mut state = self.state.write().await;
        for accepted in state.connections.values() {
            bindings.apply(&accepted.connection)?;
        }
        debug!(
            bindings = bindings.len(),
            connections = state.connections.len(),
            "Bound events on active connections"
        );
        state.bindings.push(bindings);
        Ok(())
    }

    /// Set the hook run for each newly accepted connection
    pub async fn on_connection<F>(&self, f: F)
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        self.state.write().await.on_connection = Some(Arc::new(f));
    }

    /// Snapshot of active connections
    pub async fn connections(&self) -> Vec<AcceptedConnection> {
        self.state.read().await.connections.values().cloned().collect()
    }

    pub async fn connection(&self, id: Uuid) -> Option<Connection> {
        self.state
            .read()
            .await
            .connections
            .get(&id)
            .map(|c| c.connection.clone())
    }

    /// Number of active connections
    pub async fn len(&self) -> usize {
        self.state.read().await.connections.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Emit to every open connection; returns how many were sent to
    pub async fn broadcast<D: Serialize + Sync + ?Sized>(
        &self,
        event: &str,
        data: &D,
    ) -> Result<usize> {
        self.broadcast_filtered(event, data, None).await
    }

    /// Emit to every open connection except one
    pub async fn broadcast_except<D: Serialize + Sync + ?Sized>(
        &self,
        event: &str,
        data: &D,
        except: Uuid,
    ) -> Result<usize> {
        self.broadcast_filtered(event, data, Some(except)).await
    }

    async fn broadcast_filtered<D: Serialize + Sync + ?Sized>(
        &self,
        event: &str,
        data: &D,
        except: Option<Uuid>,
    ) -> Result<usize> {
        eventsock_core::encode(event, data)?;

        let targets: Vec<Connection> = self
            .connections()
            .await
            .into_iter()
            .map(|c| c.connection)
            .filter(|c| c.is_open() && except != Some(c.id()))
            .collect();

        for conn in &targets {
            conn.emit(event, data).await?;
        }
        Ok(targets.len())
    }

    /// Stop accepting and close every active connection
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        for accepted in self.connections().await {
            accepted.connection.close(CLOSE_GOING_AWAY, "server shutting down");
        }
        info!("Acceptor shutdown initiated");
    }
}

/// Accept incoming connections
async fn accept_loop(
    listener: TcpListener,
    state: Arc<RwLock<AcceptorState>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(addr = %addr, "New connection");
                        let state = state.clone();
                        tokio::spawn(handle_connection(stream, addr, state));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Accept loop shutting down");
                break;
            }
        }
    }
}

/// Handle a single accepted socket from handshake to close
async fn handle_connection(stream: TcpStream, addr: SocketAddr, state: Arc<RwLock<AcceptorState>>) {
    let (ws_transport, outbound) = WsTransport::channel();

    let (conn, hook) = {
        let mut s = state.write().await;
        let conn = Connection::new(Box::new(ws_transport), Multiplexer::shared(), s.guard);
        for batch in &s.bindings {
            if let Err(e) = batch.apply(&conn) {
                warn!(conn_id = %conn.id(), error = %e, "Failed to apply event bindings");
            }
        }
        s.connections.insert(
            conn.id(),
            AcceptedConnection {
                connection: conn.clone(),
                addr,
                accepted_at: Utc::now(),
            },
        );
        (conn, s.on_connection.clone())
    };

    if let Some(hook) = hook {
        run_hook("connection", || hook(&conn));
    }

    let conn_id = conn.id();
    info!(addr = %addr, conn_id = %conn_id, "Peer accepted");

    let handshake = async move { accept_async(stream).await.map_err(Error::from) };
    transport::run(conn, handshake, outbound).await;

    state.write().await.connections.remove(&conn_id);
    info!(conn_id = %conn_id, "Peer disconnected");
}
