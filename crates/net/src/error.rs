//! Network error types

use std::io;

/// Network result type
pub type Result<T> = std::result::Result<T, Error>;

/// Network errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] eventsock_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

impl Error {
    /// Shorthand for a configuration error
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Core(eventsock_core::Error::InvalidConfiguration(msg.into()))
    }

    /// Flatten into the core error reported to `on_error` hooks
    pub(crate) fn into_core(self) -> eventsock_core::Error {
        match self {
            Error::Core(e) => e,
            other => eventsock_core::Error::Transport(other.to_string()),
        }
    }
}
