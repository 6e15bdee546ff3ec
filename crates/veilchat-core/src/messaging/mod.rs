//! Messaging system for VeilChat.
//!
//! The client half of the system: a [`ChatClient`] per local identity that
//! encrypts, stores and routes messages, tracks delivery status and keeps
//! the relay connection alive.
//!
//! ## Delivery status
//!
//! Statuses only move forward: `pending → sent|delivered → read`. Frames
//! that would move a message backwards are ignored.

mod client;
mod connection;
mod message;
mod offline;
mod rate_limit;
mod tls;

pub use client::{ChatClient, ClientEvent, ConnectOptions};
pub use connection::{
    Backoff, ConnectionState, Supervisor, BACKOFF_INITIAL, BACKOFF_MAX, CONNECT_TIMEOUT,
};
pub use message::{decrypt_placeholder, ChatMessage, Direction, StoredMessage};
pub use offline::OfflineTimings;
pub use rate_limit::{RateLimiter, RATE_LIMIT, RATE_WINDOW};
pub use tls::insecure_connector;
