//! Connection state machine
//!
//! `Connecting -> Open -> Closing -> Closed`. `Closed` is terminal.
//! State lives in a watch channel so the send guard can wait for changes.

use tokio::sync::watch;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        self == ConnectionState::Open
    }

    pub fn is_closed(self) -> bool {
        self == ConnectionState::Closed
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Owner of a connection's state
pub struct StateMachine {
    tx: watch::Sender<ConnectionState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Start in `Connecting`
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Connecting);
        Self { tx }
    }

    pub fn current(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Receiver that observes every later transition
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Move to `Open` from any non-terminal state
    ///
    /// Returns true if the state changed. A close requested before the
    /// transport reported open is still pending in the transport, which
    /// completes it with `closed()`.
    pub fn open(&self) -> bool {
        self.transition(|s| match s {
            ConnectionState::Connecting | ConnectionState::Closing => Some(ConnectionState::Open),
            ConnectionState::Open | ConnectionState::Closed => None,
        })
    }

    /// Move to `Closing` from `Connecting` or `Open`
    pub fn closing(&self) -> bool {
        self.transition(|s| match s {
            ConnectionState::Connecting | ConnectionState::Open => Some(ConnectionState::Closing),
            ConnectionState::Closing | ConnectionState::Closed => None,
        })
    }

    /// Move to `Closed` from anywhere; idempotent
    pub fn closed(&self) -> bool {
        self.transition(|s| match s {
            ConnectionState::Closed => None,
            _ => Some(ConnectionState::Closed),
        })
    }

    fn transition(&self, next: impl Fn(ConnectionState) -> Option<ConnectionState>) -> bool {
        self.tx.send_if_modified(|state| match next(*state) {
            Some(new_state) => {
                tracing::trace!(from = %state, to = %new_state, "Connection state transition");
                *state = new_state;
                true
            }
            None => false,
        })
    }
}
