//! Error types for the eventsock protocol engine

use std::time::Duration;

use thiserror::Error;

/// Errors raised by connection operations.
///
/// Inbound decode problems are not part of this enum; see
/// [`DecodeFailure`](crate::envelope::DecodeFailure).
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid event name: {0:?}")]
    InvalidEventName(String),

    #[error("Failed to encode envelope: {0}")]
    EncodeFailure(#[from] serde_json::Error),

    #[error("Connection did not open within {waited:?}")]
    ConnectionTimeout { waited: Duration },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, Error>;
