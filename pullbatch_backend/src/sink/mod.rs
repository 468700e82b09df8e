//! Downstream destinations for pulled messages.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{error::SinkError, model::Message};

#[cfg(unix)]
mod socket;
mod stdout;

#[cfg(unix)]
pub use socket::{SocketSink, MAX_EVENT_SIZE};
pub use stdout::StdoutSink;

/// Location tag used when framing events for the analysis queue socket.
pub const DEFAULT_LOCATION: &str = "gcloud-pubsub";

#[async_trait]
pub trait Sink: Send + Sync {
    /// Accepts one message. An error leaves the message unacknowledged.
    async fn deliver(&self, message: &Message) -> Result<(), SinkError>;
}

/// Wraps the payload in an event envelope. JSON payloads are embedded as
/// JSON, anything else as a string.
pub fn render_event(message: &Message) -> Result<Value, SinkError> {
    let data = std::str::from_utf8(&message.payload).map_err(|_| SinkError::Encoding {
        message_id: message.id.clone(),
    })?;

    let data_json: Value = match serde_json::from_str(data) {
        Ok(val) => val,
        Err(_) => Value::String(data.to_string()),
    };

    Ok(json!({
        "integration": "gcp",
        "gcp": data_json,
    }))
}
