//! Live channel message protocol definitions.
//!
//! All messages are JSON objects of the form `{"type": ..., "payload": ...}`.

use crate::Record;
use serde::{Deserialize, Serialize};

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Handshake sent immediately after the socket opens.
    Authorization {
        /// Bearer token of the current session
        token: String,
    },
}

impl ClientMessage {
    /// Create the authorization handshake.
    pub fn authorization(token: impl Into<String>) -> Self {
        ClientMessage::Authorization {
            token: token.into(),
        }
    }
}

/// Messages pushed from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum LiveMessage {
    /// Another session created a record.
    Created(Record),
    /// Another session updated a record.
    Updated(Record),
    /// Another session deleted a record. The server may omit the payload.
    Deleted(Option<Record>),
}

impl LiveMessage {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            LiveMessage::Created(_) => "created",
            LiveMessage::Updated(_) => "updated",
            LiveMessage::Deleted(_) => "deleted",
        }
    }

    /// The record carried by the message, if any.
    pub fn record(&self) -> Option<&Record> {
        match self {
            LiveMessage::Created(record) | LiveMessage::Updated(record) => Some(record),
            LiveMessage::Deleted(record) => record.as_ref(),
        }
    }
}
