//! Error types for VeilChat.
//!
//! Crypto failures are split into the three integrity checks a packet goes
//! through so callers can tell a wrong key from a tampered packet. Their
//! messages stay generic.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for VeilChat operations.
#[derive(Error, Debug)]
pub enum Error {
    /// No wrapped copy of the message key could be unwrapped with the given private key.
    #[error("unable to unwrap message key")]
    DecryptionFailure,

    /// Ciphertext digest does not match the digest carried in the packet.
    #[error("message tampering detected")]
    TamperDetected,

    /// AEAD tag verification failed.
    #[error("message authentication failed")]
    AuthenticationFailure,

    /// A message with this packet id is already stored.
    #[error("duplicate packet")]
    DuplicatePacket,

    /// Another live connection already holds this name.
    #[error("name already connected")]
    NameInUse,

    /// No contact with this name.
    #[error("contact not found: {0}")]
    ContactNotFound(String),

    /// Per-contact send window is full.
    #[error("rate limit exceeded")]
    RateLimitExceeded,

    /// The relay connection dropped.
    #[error("connection lost")]
    ConnectionLost,

    /// Backup file to restore from does not exist.
    #[error("backup file not found: {}", .0.display())]
    RestoreFileMissing(PathBuf),

    /// Key material could not be parsed or used.
    #[error("invalid key material")]
    InvalidKey(String),

    /// Other cryptographic operation failed.
    #[error("cryptographic operation failed")]
    Crypto(String),

    /// Relay protocol violation.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Encoding/decoding error.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Storage operation failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Local identity is missing or unusable.
    #[error("identity error: {0}")]
    Identity(String),
}

/// Result type alias using VeilChat's Error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error came from one of the packet integrity checks.
    ///
    /// The receive pipeline renders these inline instead of propagating them.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Error::DecryptionFailure | Error::TamperDetected | Error::AuthenticationFailure
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Encoding(e.to_string())
    }
}
