//! Local persistent storage for VeilChat.
//!
//! A single SQLite file holds contacts and messages. Messages are kept as the
//! encrypted packet JSON, never as plaintext; the only private key stored is
//! the local identity's, wrapped under the master key.
//!
//! ## Side files
//!
//! - Backups: full online copies under the backup directory
//! - Contacts mirror: a JSON list of names and public keys, rewritten after
//!   every contact change

mod database;
mod schema;

pub use database::{Contact, ContactRecord, Database, DatabaseConfig};

/// Default database filename.
pub const DEFAULT_DB_NAME: &str = "veilchat.db";

/// Default backup directory name.
pub const DEFAULT_BACKUP_DIR: &str = "backups";
