//! Relay frame types.
//!
//! Every frame is a JSON text message tagged by `type`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Delivery status of a message.
///
/// Ordered: `Pending < Sent < Delivered < Read`. `Sent` and `Delivered`
/// are both reachable from `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Stored, not yet handed to a live peer.
    Pending,
    /// Handed off by the sender.
    Sent,
    /// Reached the receiver.
    Delivered,
    /// Seen by the receiver.
    Read,
}

impl MessageStatus {
    /// Database/wire string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }

    /// Parse from the database/wire string.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "read" => Ok(Self::Read),
            other => Err(Error::Protocol(format!("unknown status: {}", other))),
        }
    }

    /// Whether moving to `next` is a forward transition.
    pub fn advances_to(self, next: Self) -> bool {
        next > self
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A name/key pair announced by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    /// Contact name.
    pub name: String,
    /// Public key PEM.
    pub public_key: String,
}

/// Frames exchanged between clients and the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayMessage {
    /// First frame from a client.
    Auth {
        /// Identity name.
        name: String,
        /// Public key PEM.
        public_key: String,
    },
    /// A peer came online, or left when `public_key` is empty.
    Presence {
        /// Peer name.
        name: String,
        /// Public key PEM, empty on departure.
        public_key: String,
    },
    /// Every contact the relay knows.
    Roster {
        /// Known contacts.
        contacts: Vec<RosterEntry>,
    },
    /// Client asks the relay to route a packet.
    Send {
        /// Recipient name.
        to: String,
        /// Serialized packet JSON, opaque to the relay.
        packet: String,
        /// Client timestamp (RFC 3339).
        #[serde(default)]
        ts: String,
    },
    /// Relay hands a packet to its recipient.
    Deliver {
        /// Sender name.
        from: String,
        /// Serialized packet JSON.
        packet: String,
    },
    /// Receiver reports a status for a packet.
    Ack {
        /// Packet id.
        packet_id: String,
        /// New status.
        status: MessageStatus,
        /// Original sender to notify.
        #[serde(rename = "for", default, skip_serializing_if = "Option::is_none")]
        for_peer: Option<String>,
    },
    /// Relay reports a status change to the sender.
    Status {
        /// Packet id.
        packet_id: String,
        /// New status.
        status: MessageStatus,
    },
    /// Protocol error.
    Error {
        /// Human-readable description.
        message: String,
    },
}

impl RelayMessage {
    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a JSON text frame.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Protocol(format!("bad frame: {}", e)))
    }

    /// Shorthand for an error frame.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Frame type name, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::Presence { .. } => "presence",
            Self::Roster { .. } => "roster",
            Self::Send { .. } => "send",
            Self::Deliver { .. } => "deliver",
            Self::Ack { .. } => "ack",
            Self::Status { .. } => "status",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_ordering() {
        assert!(MessageStatus::Pending.advances_to(MessageStatus::Sent));
        assert!(MessageStatus::Pending.advances_to(MessageStatus::Delivered));
        assert!(MessageStatus::Sent.advances_to(MessageStatus::Read));
        assert!(!MessageStatus::Read.advances_to(MessageStatus::Delivered));
        assert!(!MessageStatus::Delivered.advances_to(MessageStatus::Delivered));
    }

    #[test]
    fn test_status_strings() {
        for status in [
            MessageStatus::Pending,
            MessageStatus::Sent,
            MessageStatus::Delivered,
            MessageStatus::Read,
        ] {
            assert_eq!(MessageStatus::parse(status.as_str()).expect("parse"), status);
        }
        assert!(MessageStatus::parse("lost").is_err());
    }

    #[test]
    fn test_ack_uses_for_key() {
        let ack = RelayMessage::Ack {
            packet_id: "p1".into(),
            status: MessageStatus::Delivered,
            for_peer: Some("alice".into()),
        };
        let json = ack.to_json().expect("serialize");
        assert_eq!(
            json,
            r#"{"type":"ack","packet_id":"p1","status":"delivered","for":"alice"}"#
        );
    }

    #[test]
    fn test_send_without_ts() {
        let frame = RelayMessage::from_json(r#"{"type":"send","to":"bob","packet":"{}"}"#)
            .expect("parse");
        assert_eq!(
            frame,
            RelayMessage::Send {
                to: "bob".into(),
                packet: "{}".into(),
                ts: String::new(),
            }
        );
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(matches!(
            RelayMessage::from_json(r#"{"type":"hello"}"#),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_roster_shape() {
        let roster = RelayMessage::Roster {
            contacts: vec![RosterEntry {
                name: "bob".into(),
                public_key: "PEM".into(),
            }],
        };
        assert_eq!(
            roster.to_json().expect("serialize"),
            r#"{"type":"roster","contacts":[{"name":"bob","public_key":"PEM"}]}"#
        );
    }
}
