//! A single logical event connection
//!
//! Binds a transport handle to the state machine, send guard and a
//! multiplexer. The transport reports lifecycle signals through the
//! `handle_*` methods; the application talks to `emit`, `subscribe`
//! and `close`.

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::envelope;
use crate::error::{Error, Result};
use crate::guard::{Readiness, SendGuard};
use crate::hooks::CloseInfo;
use crate::multiplexer::{Inbound, Multiplexer};
use crate::registry::EventHandler;
use crate::state::{ConnectionState, StateMachine};

/// Close code for a normal shutdown
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code for an endpoint going away
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Close code used when the transport vanished without a close frame
pub const CLOSE_ABNORMAL: u16 = 1006;

/// The raw transport behind a connection
///
/// Implementations queue work for an I/O task; neither method blocks.
pub trait Transport: Send + Sync + 'static {
    /// Transmit one text frame
    fn send(&self, text: String) -> Result<()>;

    /// Begin closing the underlying socket
    fn close(&self, code: u16, reason: &str);
}

struct Inner {
    id: Uuid,
    created_at: DateTime<Utc>,
    state: StateMachine,
    /// Released when the connection reaches `Closed`
    transport: Mutex<Option<Box<dyn Transport>>>,
    multiplexer: Arc<Multiplexer>,
    guard: SendGuard,
    close_info: Mutex<Option<CloseInfo>>,
}

/// Cheaply cloneable handle to one connection
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

/// Non-owning handle, for handlers that refer back to their connection
#[derive(Clone)]
pub struct WeakConnection {
    inner: Weak<Inner>,
}

impl WeakConnection {
    pub fn upgrade(&self) -> Option<Connection> {
        self.inner.upgrade().map(|inner| Connection { inner })
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Connection {
    /// Create a connection in `Connecting` around a freshly created transport
    pub fn new(
        transport: Box<dyn Transport>,
        multiplexer: Arc<Multiplexer>,
        guard: SendGuard,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                created_at: Utc::now(),
                state: StateMachine::new(),
                transport: Mutex::new(Some(transport)),
                multiplexer,
                guard,
                close_info: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.current()
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    pub fn is_closed(&self) -> bool {
        self.state().is_closed()
    }

    /// How the connection closed, once it has
    pub fn close_info(&self) -> Option<CloseInfo> {
        self.inner.close_info.lock().clone()
    }

    pub fn multiplexer(&self) -> &Arc<Multiplexer> {
        &self.inner.multiplexer
    }

    pub fn downgrade(&self) -> WeakConnection {
        WeakConnection {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Register a handler for an event; the returned handle unsubscribes it
    pub fn subscribe<F>(&self, event: &str, f: F) -> Result<EventHandler>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let handler: EventHandler = Arc::new(f);
        self.inner.multiplexer.subscribe(event, handler.clone())?;
        Ok(handler)
    }

    pub fn unsubscribe(&self, event: &str, handler: &EventHandler) -> usize {
        self.inner.multiplexer.unsubscribe(event, handler)
    }

    pub fn on_open<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.multiplexer.on_open(f);
    }

    pub fn on_close<F>(&self, f: F)
    where
        F: Fn(&CloseInfo) + Send + Sync + 'static,
    {
        self.inner.multiplexer.on_close(f);
    }

    pub fn on_error<F>(&self, f: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.inner.multiplexer.on_error(f);
    }

    pub fn on_message<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner.multiplexer.on_message(f);
    }

    /// Send an event to the remote peer
    ///
    /// Waits for the connection to open if it is still connecting. Sends on a
    /// closing or closed connection are dropped without error.
    pub async fn emit<D: Serialize + ?Sized>(&self, event: &str, data: &D) -> Result<()> {
        let text = envelope::encode(event, data)?;

        let mut state = self.inner.state.watch();
        match self.inner.guard.ready(&mut state).await? {
            Readiness::Send => {
                self.transmit(event, text);
                Ok(())
            }
            Readiness::Drop => {
                tracing::debug!(
                    conn_id = %self.inner.id,
                    event = %event,
                    state = %self.state(),
                    "Dropping emit on non-open connection"
                );
                Ok(())
            }
        }
    }

    fn transmit(&self, event: &str, text: String) {
        let result = match self.inner.transport.lock().as_ref() {
            Some(transport) => transport.send(text),
            None => {
                tracing::debug!(
                    conn_id = %self.inner.id,
                    event = %event,
                    "Transport released, dropping emit"
                );
                return;
            }
        };

        if let Err(e) = result {
            tracing::warn!(conn_id = %self.inner.id, event = %event, error = %e, "Send failed");
            self.inner.multiplexer.fire_error(&e);
        }
    }

    /// Ask the transport to close; `handle_close` completes the transition
    pub fn close(&self, code: u16, reason: &str) {
        if !self.inner.state.closing() {
            return;
        }
        tracing::debug!(conn_id = %self.inner.id, code, reason, "Closing connection");

        if let Some(transport) = self.inner.transport.lock().as_ref() {
            transport.close(code, reason);
        }
    }

    /// Transport reports the connection is established
    pub fn handle_open(&self) -> bool {
        if !self.inner.state.open() {
            return false;
        }
        tracing::info!(conn_id = %self.inner.id, "Connection open");
        self.inner.multiplexer.fire_open();
        true
    }

    /// Transport delivered a text message
    ///
    /// Ignored unless the connection is open.
    pub fn handle_message(&self, text: &str) -> Option<Inbound> {
        if !self.is_open() {
            tracing::debug!(
                conn_id = %self.inner.id,
                state = %self.state(),
                "Ignoring message on non-open connection"
            );
            return None;
        }
        Some(self.inner.multiplexer.deliver(text))
    }

    /// Transport reported an error; the state is left alone
    pub fn handle_error(&self, err: Error) {
        tracing::warn!(conn_id = %self.inner.id, error = %err, "Transport error");
        self.inner.multiplexer.fire_error(&err);
    }

    /// Transport reports the socket is closed
    pub fn handle_close(&self, code: u16, reason: &str) -> bool {
        if !self.inner.state.closed() {
            return false;
        }

        let info = CloseInfo::new(code, reason);
        *self.inner.close_info.lock() = Some(info.clone());
        let transport = self.inner.transport.lock().take();
        drop(transport);

        tracing::info!(conn_id = %self.inner.id, code, reason, "Connection closed");
        self.inner.multiplexer.fire_close(&info);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorded {
        sent: Vec<String>,
        closes: Vec<(u16, String)>,
    }

    /// Transport that records what it was asked to do
    #[derive(Clone, Default)]
    struct MockTransport {
        log: Arc<Mutex<Recorded>>,
        fail_sends: bool,
    }

    impl Transport for MockTransport {
        fn send(&self, text: String) -> Result<()> {
            if self.fail_sends {
                return Err(Error::Transport("broken pipe".into()));
            }
            self.log.lock().sent.push(text);
            Ok(())
        }

        fn close(&self, code: u16, reason: &str) {
            self.log.lock().closes.push((code, reason.to_string()));
        }
    }

    fn make_connection() -> (Connection, MockTransport) {
        let transport = MockTransport::default();
        let conn = Connection::new(
            Box::new(transport.clone()),
            Multiplexer::shared(),
            SendGuard::default(),
        );
        (conn, transport)
    }

    #[tokio::test]
    async fn test_emit_on_open_transmits_envelope() {
        let (conn, transport) = make_connection();
        conn.handle_open();

        conn.emit("chat", &json!({"text": "hi"})).await.unwrap();

        let sent = transport.log.lock().sent.clone();
        assert_eq!(sent, vec![r#"{"event":"chat","data":{"text":"hi"}}"#]);
    }

    #[tokio::test]
    async fn test_emit_rejects_empty_event() {
        let (conn, transport) = make_connection();
        conn.handle_open();

        let result = conn.emit("", &json!(1)).await;
        assert!(matches!(result, Err(Error::InvalidEventName(_))));
        assert!(transport.log.lock().sent.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_emit_waits_for_open() {
        let (conn, transport) = make_connection();
        let opener = conn.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(600)).await;
            opener.handle_open();
        });

        conn.emit("late", &json!(null)).await.unwrap();

        assert_eq!(transport.log.lock().sent.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emit_times_out_while_connecting() {
        let (conn, transport) = make_connection();

        let result = conn.emit("never", &json!(null)).await;

        assert!(matches!(result, Err(Error::ConnectionTimeout { .. })));
        assert!(transport.log.lock().sent.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_during_wait_fails_emit() {
        let (conn, transport) = make_connection();
        let closer = conn.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            closer.close(CLOSE_NORMAL, "bye");
        });

        let result = conn.emit("pending", &json!(1)).await;

        assert!(matches!(result, Err(Error::ConnectionClosed)));
        assert!(transport.log.lock().sent.is_empty());
        assert_eq!(transport.log.lock().closes, vec![(1000, "bye".to_string())]);
    }

    #[tokio::test]
    async fn test_emit_on_closed_is_silent_drop() {
        let (conn, transport) = make_connection();
        conn.handle_open();
        conn.handle_close(CLOSE_NORMAL, "done");

        conn.emit("chat", &json!("ignored")).await.unwrap();
        assert!(transport.log.lock().sent.is_empty());
    }

    #[tokio::test]
    async fn test_emit_while_closing_is_silent_drop() {
        let (conn, transport) = make_connection();
        conn.handle_open();
        conn.close(CLOSE_NORMAL, "leaving");
        assert_eq!(conn.state(), ConnectionState::Closing);

        conn.emit("chat", &json!("late")).await.unwrap();

        assert!(transport.log.lock().sent.is_empty());
        assert_eq!(transport.log.lock().closes, vec![(1000, "leaving".to_string())]);
    }

    #[tokio::test]
    async fn test_send_failure_goes_to_error_hook() {
        let transport = MockTransport {
            fail_sends: true,
            ..Default::default()
        };
        let conn = Connection::new(
            Box::new(transport),
            Multiplexer::shared(),
            SendGuard::default(),
        );
        let errors = Arc::new(Mutex::new(Vec::new()));
        let e = errors.clone();
        conn.on_error(move |err| e.lock().push(err.to_string()));
        conn.handle_open();

        conn.emit("chat", &json!(1)).await.unwrap();

        assert_eq!(errors.lock().len(), 1);
    }

    #[test]
    fn test_lifecycle_hooks_fire() {
        let (conn, _transport) = make_connection();
        let events = Arc::new(Mutex::new(Vec::new()));

        let e = events.clone();
        conn.on_open(move || e.lock().push("open".to_string()));
        let e = events.clone();
        conn.on_close(move |info| e.lock().push(format!("close:{}:{}", info.code, info.reason)));

        assert!(conn.handle_open());
        assert!(conn.handle_close(4000, "custom"));
        // Second close signal is ignored
        assert!(!conn.handle_close(1000, "again"));

        assert_eq!(*events.lock(), vec!["open", "close:4000:custom"]);
        assert_eq!(conn.close_info(), Some(CloseInfo::new(4000, "custom")));
    }

    #[test]
    fn test_open_reported_after_close_requested() {
        let (conn, transport) = make_connection();
        let opened = Arc::new(Mutex::new(0));
        let o = opened.clone();
        conn.on_open(move || *o.lock() += 1);

        conn.close(CLOSE_NORMAL, "early");
        assert!(conn.handle_open());

        assert_eq!(*opened.lock(), 1);
        assert!(conn.is_open());
        // The close request stays with the transport, which finishes it
        assert_eq!(transport.log.lock().closes, vec![(1000, "early".to_string())]);
        assert!(conn.handle_close(CLOSE_NORMAL, "early"));
        assert!(conn.is_closed());
    }

    #[test]
    fn test_no_reopen_after_close() {
        let (conn, _transport) = make_connection();
        conn.handle_close(CLOSE_ABNORMAL, "");
        assert!(!conn.handle_open());
        assert!(conn.is_closed());
    }

    #[test]
    fn test_messages_ignored_until_open() {
        let (conn, _transport) = make_connection();
        let hits = Arc::new(Mutex::new(0));
        let h = hits.clone();
        conn.subscribe("chat", move |_| *h.lock() += 1).unwrap();

        assert!(conn.handle_message(r#"{"event":"chat","data":1}"#).is_none());
        conn.handle_open();
        assert!(conn.handle_message(r#"{"event":"chat","data":1}"#).is_some());

        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn test_error_does_not_change_state() {
        let (conn, _transport) = make_connection();
        conn.handle_open();
        conn.handle_error(Error::Transport("hiccup".into()));
        assert!(conn.is_open());
    }

    #[test]
    fn test_close_releases_transport() {
        let (conn, transport) = make_connection();
        conn.handle_open();
        conn.close(CLOSE_NORMAL, "bye");
        assert_eq!(conn.state(), ConnectionState::Closing);

        conn.handle_close(CLOSE_NORMAL, "bye");
        assert!(conn.is_closed());
        // Only the test's clone remains
        assert_eq!(Arc::strong_count(&transport.log), 1);
    }

    #[test]
    fn test_weak_handle() {
        let (conn, _transport) = make_connection();
        let weak = conn.downgrade();
        assert_eq!(weak.upgrade().map(|c| c.id()), Some(conn.id()));
        drop(conn);
        assert!(weak.upgrade().is_none());
    }
}
