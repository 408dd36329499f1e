//! Wire frames exchanged over a relay connection.
//!
//! Everything is JSON with a `type` tag. Inbound chat frames carry a full
//! [`Message`] because the relay is a fan-out mechanism, not a second
//! source of truth: the payload was already persisted by the ingress
//! gateway before the client offered it for live delivery.

use serde::{Deserialize, Serialize};

use crate::messages::log::Message;

/// Frames a client may send while Active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Ephemeral; never persisted, never acknowledged.
    Typing { is_typing: bool },
    /// A persisted message offered for live fan-out.
    Chat { message: Message },
}

/// Frames the relay sends to connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Message {
        message: Message,
    },
    Typing {
        device_id: String,
        is_typing: bool,
    },
    /// Synthetic, system-authored, not persisted.
    UserJoined {
        device_id: String,
        username: String,
        user_color: String,
    },
    UserLeft {
        device_id: String,
        username: String,
        user_color: String,
    },
    /// Sent only to the offending connection; never closes it.
    Error {
        message: String,
    },
}
