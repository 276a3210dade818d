//! eventsock network library
//!
//! Runs the eventsock protocol over WebSockets.
//!
//! # Architecture
//!
//! - **Acceptor**: listens, gives every accepted socket its own connection
//! - **Initiator**: connects out to an acceptor (or any peer speaking the protocol)
//! - **Transport**: one task per socket, bridging frames to the core connection
//!
//! # Usage
//!
//! ```ignore
//! // Acceptor answers pings on the connection they arrived on
//! let bindings = EventBindings::new().on("ping", |conn, data| {
//!     let conn = conn.clone();
//!     let data = data.clone();
//!     tokio::spawn(async move { conn.emit("pong", &data).await });
//! });
//! let acceptor = Acceptor::bind(addr, bindings).await?;
//!
//! // Initiator
//! let config = InitiatorConfig::with_url("ws://127.0.0.1:7331/");
//! let initiator = Initiator::new(config, &StaticDefaults::default())?;
//! initiator.subscribe("pong", |data| println!("{data}"))?;
//! initiator.open()?;
//! initiator.emit("ping", &json!({"n": 1})).await?;
//! ```

pub mod acceptor;
pub mod address;
pub mod error;
pub mod initiator;
mod transport;

pub use acceptor::{AcceptedConnection, Acceptor, ConnectionHandler, EventBindings};
pub use address::{target_address, Defaults, InitiatorConfig, StaticDefaults};
pub use error::{Error, Result};
pub use initiator::Initiator;

/// Default port for eventsock acceptors
pub const DEFAULT_PORT: u16 = 7331;
