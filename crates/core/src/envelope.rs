//! Wire envelope encoding/decoding
//!
//! Every message on the wire is a UTF-8 JSON text frame of the form
//! `{"event": <string>, "data": <any>}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::{Error, Result};

/// A named event and its payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    /// Absent on the wire decodes as `null`
    #[serde(default)]
    pub data: Value,
}

/// Borrowed form used on the encode path so payloads are not cloned
#[derive(Serialize)]
struct EnvelopeRef<'a, D: ?Sized> {
    event: &'a str,
    data: &'a D,
}

/// Why an inbound message could not be turned into an [`Envelope`]
#[derive(Debug, Error)]
pub enum DecodeFailure {
    /// Not JSON at all
    #[error("malformed payload: {0}")]
    Malformed(serde_json::Error),

    /// Valid JSON, wrong shape
    #[error("not an envelope: {0}")]
    Shape(String),
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Check an event name before it is registered or sent
pub fn validate_event_name(event: &str) -> Result<()> {
    if event.is_empty() {
        return Err(Error::InvalidEventName(event.to_string()));
    }
    Ok(())
}

/// Encode an event and its payload as wire text
pub fn encode<D: Serialize + ?Sized>(event: &str, data: &D) -> Result<String> {
    validate_event_name(event)?;
    let text = serde_json::to_string(&EnvelopeRef { event, data })?;
    Ok(text)
}

/// Decode wire text into an envelope
pub fn decode(text: &str) -> std::result::Result<Envelope, DecodeFailure> {
    let value: Value = serde_json::from_str(text).map_err(DecodeFailure::Malformed)?;

    let envelope: Envelope =
        serde_json::from_value(value).map_err(|e| DecodeFailure::Shape(e.to_string()))?;

    if envelope.event.is_empty() {
        return Err(DecodeFailure::Shape("empty event name".into()));
    }

    Ok(envelope)
}
