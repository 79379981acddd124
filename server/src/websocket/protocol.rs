//! WebSocket message protocol definitions.
//!
//! All messages are JSON-encoded and use snake_case for field names. The
//! documents themselves keep their camelCase wire shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tidepool_engine::AddOutcome;

use crate::state::Table;

/// Messages sent from client to server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start receiving snapshots of a table.
    Watch {
        table: Table,
        /// How many of the newest documents each snapshot holds
        #[serde(default)]
        count: Option<usize>,
        /// Request ID echoed on every snapshot of this watch
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Insert or merge documents.
    Add {
        table: Table,
        documents: Vec<Value>,
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Keep-alive ping.
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Current contents of a watched table.
    Snapshot {
        table: Table,
        documents: Vec<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Result of an add request.
    Ack {
        table: Table,
        #[serde(flatten)]
        outcome: AddOutcome,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Response to ping.
    Pong,

    /// Error message.
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

impl ServerMessage {
    /// Create an error message.
    pub fn error(message: impl Into<String>, request_id: Option<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            request_id,
        }
    }
}
