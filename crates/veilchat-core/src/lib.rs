//! # VeilChat Core Library
//!
//! End-to-end encrypted two-party messaging through an untrusted relay.
//!
//! ## Security Model
//!
//! - The relay routes opaque packets and never holds a private key
//! - Each message is sealed under a fresh symmetric key
//! - Private keys at rest are wrapped under a local master key
//! - Public keys are trusted on first use, as announced by the relay
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              Application                │
//! ├─────────────────────────────────────────┤
//! │  messaging  │  storage  │   identity    │
//! ├─────────────────────────────────────────┤
//! │           protocol (wire)               │
//! ├─────────────────────────────────────────┤
//! │                crypto                   │
//! └─────────────────────────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod logging;
pub mod messaging;
pub mod protocol;
pub mod storage;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
