//! Database schema definitions.

/// Schema version for migrations.
pub const SCHEMA_VERSION: u32 = 1;

/// SQL to create the database schema.
///
/// `messages.contact_name` carries no foreign key: the relay stores packets
/// addressed to names it has never seen authenticate.
pub const CREATE_SCHEMA: &str = r#"
-- One row per name; only the local identity has a wrapped private key
CREATE TABLE IF NOT EXISTS contacts (
    name TEXT PRIMARY KEY,
    public_key TEXT NOT NULL,
    private_key_encrypted BLOB,
    created_at TEXT NOT NULL,
    last_seen TEXT
);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    packet_id TEXT NOT NULL UNIQUE,
    contact_name TEXT NOT NULL,
    direction TEXT NOT NULL CHECK (direction IN ('sent', 'received')),
    encrypted_packet TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    size_bytes INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_contact ON messages(contact_name);

-- Settings table
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Schema version
INSERT OR REPLACE INTO settings (key, value) VALUES ('schema_version', '?');
"#;
