//! Message types and handling.

use crate::error::{Error, Result};
use crate::protocol::MessageStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of the conversation a stored message is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Written by us.
    Sent,
    /// Written by the contact.
    Received,
}

impl Direction {
    /// Database string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Received => "received",
        }
    }

    /// Parse from the database string.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "sent" => Ok(Self::Sent),
            "received" => Ok(Self::Received),
            other => Err(Error::Storage(format!("unknown direction: {}", other))),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message as persisted: the packet stays encrypted at rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    /// Packet id, unique across the store.
    pub packet_id: String,
    /// The other party.
    pub contact_name: String,
    /// Sent or received.
    pub direction: Direction,
    /// Serialized packet JSON.
    pub encrypted_packet: String,
    /// When the message was stored.
    pub timestamp: DateTime<Utc>,
    /// Delivery status.
    pub status: MessageStatus,
    /// Byte length of `encrypted_packet`.
    pub size_bytes: i64,
}

impl StoredMessage {
    /// Create a record timestamped now.
    pub fn new(
        packet_id: impl Into<String>,
        contact_name: impl Into<String>,
        direction: Direction,
        encrypted_packet: impl Into<String>,
        status: MessageStatus,
    ) -> Self {
        let encrypted_packet = encrypted_packet.into();
        Self {
            packet_id: packet_id.into(),
            contact_name: contact_name.into(),
            direction,
            size_bytes: encrypted_packet.len() as i64,
            encrypted_packet,
            timestamp: Utc::now(),
            status,
        }
    }
}

/// A decrypted message ready for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Packet id.
    pub packet_id: String,
    /// The other party.
    pub contact_name: String,
    /// Sent or received.
    pub direction: Direction,
    /// Plaintext, or a `[decrypt error: …]` placeholder.
    pub text: String,
    /// When the message was stored.
    pub timestamp: DateTime<Utc>,
    /// Delivery status.
    pub status: MessageStatus,
}

impl ChatMessage {
    /// Pair a stored record with its rendered text.
    pub fn from_stored(stored: &StoredMessage, text: String) -> Self {
        Self {
            packet_id: stored.packet_id.clone(),
            contact_name: stored.contact_name.clone(),
            direction: stored.direction,
            text,
            timestamp: stored.timestamp,
            status: stored.status,
        }
    }
}

/// Inline text shown in place of a message that failed to decrypt.
pub fn decrypt_placeholder(err: &Error) -> String {
    format!("[decrypt error: {}]", err)
}
