//! Database operations.

use super::schema::{CREATE_SCHEMA, SCHEMA_VERSION};
use crate::error::{Error, Result};
use crate::logging::RedactedBytes;
use crate::messaging::{Direction, StoredMessage};
use crate::protocol::MessageStatus;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, DatabaseName, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the database file.
    pub path: PathBuf,
    /// Whether to use in-memory database (for testing).
    pub in_memory: bool,
    /// Directory receiving backup copies.
    pub backup_dir: PathBuf,
    /// Contacts JSON mirror, rewritten after every contact change.
    pub contacts_json: Option<PathBuf>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(super::DEFAULT_DB_NAME),
            in_memory: false,
            backup_dir: PathBuf::from(super::DEFAULT_BACKUP_DIR),
            contacts_json: None,
        }
    }
}

impl DatabaseConfig {
    /// In-memory store for tests; backups still go to `backup_dir`.
    pub fn in_memory(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            in_memory: true,
            backup_dir: backup_dir.into(),
            ..Self::default()
        }
    }
}

/// A contact row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    /// Unique name.
    pub name: String,
    /// Public key PEM.
    pub public_key: String,
    /// Wrapped private key; only the local identity has one.
    pub private_key_encrypted: Option<Vec<u8>>,
    /// First time the name was stored.
    pub created_at: DateTime<Utc>,
    /// Last upsert.
    pub last_seen: Option<DateTime<Utc>>,
}

impl Contact {
    /// Whether this row is a locally controlled identity.
    pub fn has_private_key(&self) -> bool {
        self.private_key_encrypted.is_some()
    }
}

/// Entry of the contacts JSON mirror. Private keys never appear here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    /// Contact name.
    pub name: String,
    /// Public key PEM.
    pub public_key: String,
    /// RFC 3339 creation time.
    #[serde(default)]
    pub created_at: Option<String>,
    /// RFC 3339 last-seen time.
    #[serde(default)]
    pub last_seen: Option<String>,
}

impl From<&Contact> for ContactRecord {
    fn from(contact: &Contact) -> Self {
        Self {
            name: contact.name.clone(),
            public_key: contact.public_key.clone(),
            created_at: Some(format_ts(&contact.created_at)),
            last_seen: contact.last_seen.as_ref().map(format_ts),
        }
    }
}

/// Database handle.
pub struct Database {
    conn: Connection,
    config: DatabaseConfig,
}

impl Database {
    /// Open or create a database.
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        let conn = if config.in_memory {
            Connection::open_in_memory()
        } else {
            // Create parent directories if needed
            if let Some(parent) = config.path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::Storage(format!("failed to create directory: {}", e)))?;
            }

            Connection::open_with_flags(
                &config.path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
        }
        .map_err(|e| Error::Storage(format!("failed to open database: {}", e)))?;

        conn.execute_batch(
            r#"
            PRAGMA journal_mode = DELETE;
            PRAGMA secure_delete = ON;
            PRAGMA temp_store = MEMORY;
            "#,
        )
        .map_err(|e| Error::Storage(format!("failed to set pragmas: {}", e)))?;

        let db = Self {
            conn,
            config: config.clone(),
        };
        db.init_schema()?;

        tracing::debug!(path = %config.path.display(), in_memory = config.in_memory, "Opened database");
        Ok(db)
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(&CREATE_SCHEMA.replace('?', &SCHEMA_VERSION.to_string()))
            .map_err(|e| Error::Storage(format!("failed to create schema: {}", e)))?;
        Ok(())
    }

    /// Insert or update a contact.
    ///
    /// An update without a private key keeps the stored one. `created_at`
    /// survives updates; `last_seen` is refreshed.
    ///
    /// # Errors
    /// [`Error::Identity`] if `name` is a local identity and the update
    /// carries a different public key without a private key. Such a key only
    /// changes through regeneration.
    pub fn add_contact(
        &self,
        name: &str,
        public_key: &str,
        private_key_encrypted: Option<&[u8]>,
    ) -> Result<()> {
        if private_key_encrypted.is_none() && self.is_foreign_key_for_identity(name, public_key)? {
            return Err(Error::Identity(format!(
                "{} is a local identity; its key changes only through regeneration",
                name
            )));
        }

        let now = format_ts(&Utc::now());
        self.conn
            .execute(
                r#"
                INSERT INTO contacts (name, public_key, private_key_encrypted, created_at, last_seen)
                VALUES (?1, ?2, ?3, ?4, ?4)
                ON CONFLICT(name) DO UPDATE SET
                    public_key = excluded.public_key,
                    private_key_encrypted = COALESCE(excluded.private_key_encrypted, contacts.private_key_encrypted),
                    last_seen = excluded.last_seen
                "#,
                params![name, public_key, private_key_encrypted, now],
            )
            .map_err(|e| Error::Storage(format!("failed to add contact: {}", e)))?;

        tracing::debug!(
            contact = name,
            wrapped_key = ?private_key_encrypted.map(RedactedBytes),
            "Upserted contact"
        );
        self.write_contacts_mirror()
    }

    /// Whether `name` holds a private key under a public key other than `public_key`.
    fn is_foreign_key_for_identity(&self, name: &str, public_key: &str) -> Result<bool> {
        Ok(match self.get_contact(name)? {
            Some(existing) if existing.has_private_key() => {
                existing.public_key.trim() != public_key.trim()
            }
            _ => false,
        })
    }

    /// Get a contact by name.
    pub fn get_contact(&self, name: &str) -> Result<Option<Contact>> {
        self.conn
            .query_row(
                "SELECT name, public_key, private_key_encrypted, created_at, last_seen
                 FROM contacts WHERE name = ?",
                params![name],
                row_to_contact,
            )
            .optional()
            .map_err(Error::from)
    }

    /// All contacts, ordered by name.
    pub fn list_contacts(&self) -> Result<Vec<Contact>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, public_key, private_key_encrypted, created_at, last_seen
             FROM contacts ORDER BY name",
        )?;
        let contacts = stmt
            .query_map([], row_to_contact)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(contacts)
    }

    /// Delete a contact and all of its messages.
    ///
    /// Returns `false` if no such contact existed.
    pub fn delete_contact(&mut self, name: &str) -> Result<bool> {
        let tx = self.conn.transaction()?;
        let messages = tx.execute("DELETE FROM messages WHERE contact_name = ?", params![name])?;
        let contacts = tx.execute("DELETE FROM contacts WHERE name = ?", params![name])?;
        tx.commit()?;

        if contacts == 0 {
            return Ok(false);
        }
        tracing::info!(contact = name, messages, "Deleted contact");
        self.write_contacts_mirror()?;
        Ok(true)
    }

    /// Store a message.
    ///
    /// A packet id that is already stored is logged and skipped; returns
    /// whether a row was inserted.
    pub fn add_message(&self, message: &StoredMessage) -> Result<bool> {
        match self.insert_message(message) {
            Ok(()) => Ok(true),
            Err(Error::DuplicatePacket) => {
                tracing::warn!(
                    packet_id = %crate::logging::ShortId(&message.packet_id),
                    "Duplicate packet, skipping"
                );
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn insert_message(&self, message: &StoredMessage) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO messages
                (packet_id, contact_name, direction, encrypted_packet, timestamp, status, size_bytes)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
                params![
                    message.packet_id,
                    message.contact_name,
                    message.direction.as_str(),
                    message.encrypted_packet,
                    format_ts(&message.timestamp),
                    message.status.as_str(),
                    message.size_bytes,
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(ref err, _)
                    if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
                {
                    Error::DuplicatePacket
                }
                e => Error::Storage(format!("failed to store message: {}", e)),
            })?;
        Ok(())
    }

    /// Messages with a contact in insertion order.
    ///
    /// `filter` is a substring match over the stored encrypted packet.
    pub fn get_history(&self, contact_name: &str, filter: Option<&str>) -> Result<Vec<StoredMessage>> {
        let pattern = filter.map(|f| format!("%{}%", f));
        let mut stmt = self.conn.prepare(
            r#"
            SELECT packet_id, contact_name, direction, encrypted_packet, timestamp, status, size_bytes
            FROM messages
            WHERE contact_name = ?1 AND (?2 IS NULL OR encrypted_packet LIKE ?2)
            ORDER BY id
            "#,
        )?;
        let messages = stmt
            .query_map(params![contact_name, pattern], row_to_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    /// Look up one message by packet id.
    pub fn get_message(&self, packet_id: &str) -> Result<Option<StoredMessage>> {
        self.conn
            .query_row(
                "SELECT packet_id, contact_name, direction, encrypted_packet, timestamp, status, size_bytes
                 FROM messages WHERE packet_id = ?",
                params![packet_id],
                row_to_message,
            )
            .optional()
            .map_err(Error::from)
    }

    /// Set a message's status unconditionally.
    ///
    /// Returns `false` for an unknown packet id.
    pub fn update_message_status(&self, packet_id: &str, status: MessageStatus) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE messages SET status = ? WHERE packet_id = ?",
                params![status.as_str(), packet_id],
            )
            .map_err(|e| Error::Storage(format!("failed to update status: {}", e)))?;
        Ok(changed > 0)
    }

    /// Total number of stored messages.
    pub fn count_messages(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Delete every message with a contact, keeping the contact.
    pub fn clear_history(&self, contact_name: &str) -> Result<usize> {
        let deleted = self
            .conn
            .execute("DELETE FROM messages WHERE contact_name = ?", params![contact_name])?;
        tracing::info!(contact = contact_name, deleted, "Cleared history");
        Ok(deleted)
    }

    /// Copy the whole store into the backup directory.
    ///
    /// The file is named `<stem>_<UTC yyyymmddHHMMSSmmm>.db`.
    pub fn backup(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.config.backup_dir)?;

        let stem = self
            .config
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("veilchat");
        let stamp = Utc::now().format("%Y%m%d%H%M%S%3f");

        let mut dest = self.config.backup_dir.join(format!("{}_{}.db", stem, stamp));
        let mut n = 1;
        while dest.exists() {
            dest = self
                .config
                .backup_dir
                .join(format!("{}_{}_{}.db", stem, stamp, n));
            n += 1;
        }

        self.conn
            .backup(DatabaseName::Main, &dest, None)
            .map_err(|e| Error::Storage(format!("backup failed: {}", e)))?;

        tracing::info!(path = %dest.display(), "Database backup created");
        Ok(dest)
    }

    /// Replace the live store with a backup. Nothing is merged.
    pub fn restore(&mut self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(Error::RestoreFileMissing(path.to_path_buf()));
        }

        self.conn
            .restore(DatabaseName::Main, path, None::<fn(rusqlite::backup::Progress)>)
            .map_err(|e| Error::Storage(format!("restore failed: {}", e)))?;
        self.init_schema()?;

        tracing::info!(path = %path.display(), "Database restored");
        self.write_contacts_mirror()
    }

    /// Merge a contacts JSON mirror back in as public-key-only contacts.
    ///
    /// Entries that would replace a local identity's key are skipped.
    /// Returns the number of entries imported.
    pub fn import_contacts_json(&self, path: &Path) -> Result<usize> {
        let text = std::fs::read_to_string(path)?;
        let records: Vec<ContactRecord> = serde_json::from_str(&text)?;

        let mut imported = 0;
        for record in &records {
            if self.is_foreign_key_for_identity(&record.name, &record.public_key)? {
                tracing::warn!(contact = %record.name, "Skipping import over local identity");
                continue;
            }
            self.add_contact(&record.name, &record.public_key, None)?;
            imported += 1;
        }
        tracing::info!(path = %path.display(), count = imported, "Imported contacts");
        Ok(imported)
    }

    /// Rewrite the contacts JSON mirror, if one is configured.
    fn write_contacts_mirror(&self) -> Result<()> {
        let Some(path) = &self.config.contacts_json else {
            return Ok(());
        };

        let records: Vec<ContactRecord> =
            self.list_contacts()?.iter().map(ContactRecord::from).collect();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&records)?)?;
        Ok(())
    }
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn conversion_err(idx: usize, e: Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn row_to_contact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contact> {
    let created_at: String = row.get(3)?;
    let last_seen: Option<String> = row.get(4)?;
    Ok(Contact {
        name: row.get(0)?,
        public_key: row.get(1)?,
        private_key_encrypted: row.get(2)?,
        created_at: parse_ts(3, &created_at)?,
        last_seen: last_seen.as_deref().map(|s| parse_ts(4, s)).transpose()?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let direction: String = row.get(2)?;
    let timestamp: String = row.get(4)?;
    let status: String = row.get(5)?;
    Ok(StoredMessage {
        packet_id: row.get(0)?,
        contact_name: row.get(1)?,
        direction: Direction::parse(&direction).map_err(|e| conversion_err(2, e))?,
        encrypted_packet: row.get(3)?,
        timestamp: parse_ts(4, &timestamp)?,
        status: MessageStatus::parse(&status).map_err(|e| conversion_err(5, e))?,
        size_bytes: row.get(6)?,
    })
}
