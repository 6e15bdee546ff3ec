//! Local identity management for VeilChat.
//!
//! The local identity is the single contact row that carries a wrapped
//! private key. It is created on first run and persists until the user
//! regenerates it; the old key is then superseded with no trace.
//!
//! ```ignore
//! use veilchat_core::identity::ensure_identity;
//! let me = ensure_identity(&db, &master_key, "me")?;
//! println!("Fingerprint: {}", format_fingerprint(&me.fingerprint()?));
//! ```

use crate::crypto::{generate_identity, MasterKey, PrivateKey, PublicKey};
use crate::error::{Error, Result};
use crate::logging::{RedactedBytes, ShortId};
use crate::storage::Database;
use std::fmt;

/// The local keypair and the name it is registered under.
#[derive(Clone)]
pub struct LocalIdentity {
    name: String,
    public_key: PublicKey,
    private_key: PrivateKey,
}

impl LocalIdentity {
    /// Identity name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Public key.
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Private key.
    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    /// Public key PEM, as announced to the relay.
    pub fn public_pem(&self) -> Result<String> {
        self.public_key.to_pem()
    }

    /// SHA-256 fingerprint of the public key.
    pub fn fingerprint(&self) -> Result<String> {
        self.public_key.fingerprint()
    }
}

impl fmt::Debug for LocalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalIdentity")
            .field("name", &self.name)
            .field("public_key", &self.public_key)
            .field("private_key", &self.private_key)
            .finish()
    }
}

/// Load the local identity `name`, creating it if needed.
///
/// A row without a private key (for example one learned from a roster
/// before first run) is replaced by a fresh keypair.
pub fn ensure_identity(db: &Database, master_key: &MasterKey, name: &str) -> Result<LocalIdentity> {
    if let Some(contact) = db.get_contact(name)? {
        if let Some(blob) = &contact.private_key_encrypted {
            let private_key = master_key.unwrap_private_key(blob)?;
            let public_key = private_key.public_key();
            if public_key.to_pem()?.trim() != contact.public_key.trim() {
                return Err(Error::Identity(format!(
                    "stored public key for {} does not match its private key",
                    name
                )));
            }
            tracing::info!(name, "Loaded existing identity");
            return Ok(LocalIdentity {
                name: name.to_string(),
                public_key,
                private_key,
            });
        }
    }

    regenerate(db, master_key, name)
}

/// Generate and store a fresh keypair for `name`, superseding any old one.
pub fn regenerate(db: &Database, master_key: &MasterKey, name: &str) -> Result<LocalIdentity> {
    let (public_key, private_key) = generate_identity()?;
    let wrapped = master_key.wrap_private_key(&private_key)?;
    db.add_contact(name, &public_key.to_pem()?, Some(&wrapped))?;

    let fingerprint = public_key.fingerprint()?;
    tracing::info!(
        name,
        fingerprint = %ShortId(&fingerprint),
        wrapped = %RedactedBytes(&wrapped),
        "Generated new identity"
    );

    Ok(LocalIdentity {
        name: name.to_string(),
        public_key,
        private_key,
    })
}

/// Format a fingerprint for human-readable display.
///
/// Splits into groups of 4 characters for easier verbal comparison.
pub fn format_fingerprint(fingerprint: &str) -> String {
    fingerprint
        .as_bytes()
        .chunks(4)
        .map(|chunk| std::str::from_utf8(chunk).unwrap_or(""))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DatabaseConfig;

    fn open_db(dir: &std::path::Path) -> Database {
        Database::open(&DatabaseConfig::in_memory(dir.join("backups"))).expect("open")
    }

    #[test]
    fn test_debug_hides_private_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = open_db(dir.path());
        let identity = ensure_identity(&db, &MasterKey::generate(), "me").expect("identity");

        let shown = format!("{:?}", identity);
        assert!(shown.contains("PrivateKey([REDACTED])"), "{}", shown);
        assert!(!shown.contains("PRIVATE KEY"));
    }

    #[test]
    fn test_ensure_identity_is_stable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = open_db(dir.path());
        let master = MasterKey::generate();

        let first = ensure_identity(&db, &master, "me").expect("create");
        let second = ensure_identity(&db, &master, "me").expect("load");
        assert_eq!(first.public_key(), second.public_key());
        assert!(db.get_contact("me").expect("get").expect("row").has_private_key());
    }

    #[test]
    fn test_public_only_row_gets_keypair() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = open_db(dir.path());
        let master = MasterKey::generate();
        db.add_contact("me", "stale pem", None).expect("add");

        let me = ensure_identity(&db, &master, "me").expect("ensure");
        let row = db.get_contact("me").expect("get").expect("row");
        assert_eq!(row.public_key, me.public_pem().expect("pem"));
        assert!(row.has_private_key());
    }

    #[test]
    fn test_regenerate_supersedes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = open_db(dir.path());
        let master = MasterKey::generate();

        let old = ensure_identity(&db, &master, "me").expect("create");
        let new = regenerate(&db, &master, "me").expect("regenerate");
        assert_ne!(old.public_key(), new.public_key());

        let loaded = ensure_identity(&db, &master, "me").expect("load");
        assert_eq!(loaded.public_key(), new.public_key());
    }

    #[test]
    fn test_wrong_master_key_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = open_db(dir.path());
        ensure_identity(&db, &MasterKey::generate(), "me").expect("create");

        assert!(matches!(
            ensure_identity(&db, &MasterKey::generate(), "me"),
            Err(Error::Identity(_))
        ));
    }

    #[test]
    fn test_fingerprint_formatting() {
        let fp = "a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2";
        let formatted = format_fingerprint(fp);
        assert_eq!(formatted.split(' ').count(), 16);
    }
}
