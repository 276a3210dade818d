//! eventsock core
//!
//! Transport-agnostic engine for exchanging named events over one duplex
//! connection.
//!
//! # Architecture
//!
//! - **Envelope**: `{"event": .., "data": ..}` JSON text codec
//! - **Multiplexer**: per-event handler lists plus single-slot lifecycle hooks
//! - **State machine**: `Connecting -> Open -> Closing -> Closed`
//! - **Send guard**: bounded wait for a connecting socket to open
//! - **Connection**: ties the above to a [`Transport`]
//!
//! # Usage
//!
//! ```ignore
//! let conn = Connection::new(Box::new(transport), Multiplexer::shared(), SendGuard::default());
//! conn.subscribe("chat", |data| println!("{data}"))?;
//! conn.emit("chat", &json!({"text": "hi"})).await?;
//! ```

pub mod connection;
pub mod envelope;
pub mod error;
pub mod guard;
pub mod hooks;
pub mod multiplexer;
pub mod registry;
pub mod state;

pub use connection::{
    Connection, Transport, WeakConnection, CLOSE_ABNORMAL, CLOSE_GOING_AWAY, CLOSE_NORMAL,
};
pub use envelope::{decode, encode, DecodeFailure, Envelope};
pub use error::{Error, Result};
pub use guard::{Readiness, SendGuard};
pub use hooks::{run_hook, CloseInfo, LifecycleHooks};
pub use multiplexer::{Inbound, Multiplexer};
pub use registry::{handler, EventHandler, Subscriptions};
pub use state::{ConnectionState, StateMachine};
