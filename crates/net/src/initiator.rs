//! WebSocket initiator - the connecting peer
//!
//! Subscriptions and hooks live on the initiator rather than on a single
//! connection, so they carry over when `open()` is called again after a
//! connection has closed.

use std::sync::Arc;

use eventsock_core::{
    CloseInfo, Connection, ConnectionState, EventHandler, Multiplexer, SendGuard,
    CLOSE_GOING_AWAY,
};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio_tungstenite::connect_async;
use tracing::{debug, info};
use url::Url;

use crate::address::{target_address, Defaults, InitiatorConfig};
use crate::error::{Error, Result};
use crate::transport::{self, WsTransport};

/// Connecting side of an event socket
pub struct Initiator {
    url: Url,
    multiplexer: Arc<Multiplexer>,
    guard: SendGuard,
    connection: Mutex<Option<Connection>>,
}

impl Initiator {
    /// Resolve the target address; connects immediately if `config.open`
    pub fn new(config: InitiatorConfig, defaults: &dyn Defaults) -> Result<Self> {
        Self::with_guard(config, defaults, SendGuard::default())
    }

    /// Like [`Initiator::new`] with a custom wait-for-open budget
    pub fn with_guard(
        config: InitiatorConfig,
        defaults: &dyn Defaults,
        guard: SendGuard,
    ) -> Result<Self> {
        let url = target_address(&config, defaults)?;

        let initiator = Self {
            url,
            multiplexer: Multiplexer::shared(),
            guard,
            connection: Mutex::new(None),
        };

        if config.open {
            initiator.open()?;
        }
        Ok(initiator)
    }

    /// Target address
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Start connecting
    ///
    /// Returns the current connection if it is not yet closed. Must be called
    /// from within a Tokio runtime.
    pub fn open(&self) -> Result<Connection> {
        let mut slot = self.connection.lock();
        if let Some(conn) = slot.as_ref() {
            if !conn.is_closed() {
                debug!(conn_id = %conn.id(), "Connection already active");
                return Ok(conn.clone());
            }
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::config("opening a connection requires a Tokio runtime"))?;

        let (ws_transport, outbound) = WsTransport::channel();
        let conn = Connection::new(Box::new(ws_transport), self.multiplexer.clone(), self.guard);
        info!(url = %self.url, conn_id = %conn.id(), "Connecting");

        let url = self.url.to_string();
        let handshake = async move {
            connect_async(url)
                .await
                .map(|(ws, _response)| ws)
                .map_err(Error::from)
        };
        runtime.spawn(transport::run(conn.clone(), handshake, outbound));

        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// Current connection, if `open()` has been called
    pub fn connection(&self) -> Option<Connection> {
        self.connection.lock().clone()
    }

    /// State of the current connection; `Closed` before the first `open()`
    pub fn state(&self) -> ConnectionState {
        self.connection
            .lock()
            .as_ref()
            .map_or(ConnectionState::Closed, Connection::state)
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    pub fn is_closed(&self) -> bool {
        self.state().is_closed()
    }

    /// Register a handler for an event; the returned handle unsubscribes it
    pub fn subscribe<F>(&self, event: &str, f: F) -> Result<EventHandler>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let handler: EventHandler = Arc::new(f);
        self.multiplexer.subscribe(event, handler.clone())?;
        Ok(handler)
    }

    pub fn unsubscribe(&self, event: &str, handler: &EventHandler) -> usize {
        self.multiplexer.unsubscribe(event, handler)
    }

    pub fn on_open<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.multiplexer.on_open(f);
    }

    pub fn on_close<F>(&self, f: F)
    where
        F: Fn(&CloseInfo) + Send + Sync + 'static,
    {
        self.multiplexer.on_close(f);
    }

    pub fn on_error<F>(&self, f: F)
    where
        F: Fn(&eventsock_core::Error) + Send + Sync + 'static,
    {
        self.multiplexer.on_error(f);
    }

    pub fn on_message<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.multiplexer.on_message(f);
    }

    /// Send an event to the remote peer
    ///
    /// Before the first `open()` this behaves like a closed connection: the
    /// event is validated and encoded, then dropped.
    pub async fn emit<D: Serialize + ?Sized>(&self, event: &str, data: &D) -> Result<()> {
        let conn = self.connection.lock().clone();
        match conn {
            Some(conn) => conn.emit(event, data).await?,
            None => {
                eventsock_core::encode(event, data)?;
                debug!(event = %event, "Dropping emit before open");
            }
        }
        Ok(())
    }

    /// Close the current connection
    pub fn close(&self, code: u16, reason: &str) {
        if let Some(conn) = self.connection.lock().as_ref() {
            conn.close(code, reason);
        }
    }
}

impl Drop for Initiator {
    fn drop(&mut self) {
        if let Some(conn) = self.connection.get_mut().as_ref() {
            conn.close(CLOSE_GOING_AWAY, "initiator dropped");
        }
    }
}
