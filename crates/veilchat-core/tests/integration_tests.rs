//! Integration tests for VeilChat end-to-end scenarios.
//!
//! These tests verify the complete message flow from encryption
//! through storage, backup and decryption.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::Path;
use std::time::{Duration, Instant};

use veilchat_core::crypto::{decrypt_packet, encrypt_packet, generate_identity, MasterKey};
use veilchat_core::identity::ensure_identity;
use veilchat_core::messaging::{Direction, RateLimiter, StoredMessage};
use veilchat_core::protocol::{MessageStatus, Packet};
use veilchat_core::storage::{Database, DatabaseConfig};
use veilchat_core::Error;

fn file_db(dir: &Path) -> (Database, DatabaseConfig) {
    let config = DatabaseConfig {
        path: dir.join("veilchat.db"),
        in_memory: false,
        backup_dir: dir.join("backups"),
        contacts_json: Some(dir.join("contacts.json")),
    };
    (Database::open(&config).expect("open db"), config)
}

/// A packet survives serialization and decrypts for both parties only.
#[test]
fn test_e2e_packet_flow() {
    let (alice_pub, alice_priv) = generate_identity().expect("alice");
    let (bob_pub, bob_priv) = generate_identity().expect("bob");
    let (_, eve_priv) = generate_identity().expect("eve");

    let packet = encrypt_packet(&bob_pub, "Hello, Bob! This is a secret message.", Some(&alice_pub))
        .expect("encrypt");
    let wire = packet.to_json().expect("serialize");
    let received = Packet::from_json(&wire).expect("parse");

    assert_eq!(
        decrypt_packet(&received, &bob_priv).expect("bob decrypts"),
        "Hello, Bob! This is a secret message."
    );
    assert_eq!(
        decrypt_packet(&received, &alice_priv).expect("alice reads own history"),
        "Hello, Bob! This is a secret message."
    );
    assert!(matches!(
        decrypt_packet(&received, &eve_priv),
        Err(Error::DecryptionFailure)
    ));
}

/// Editing the ciphertext on the wire is caught by the digest check.
#[test]
fn test_tampered_wire_packet() {
    let (bob_pub, bob_priv) = generate_identity().expect("bob");
    let packet = encrypt_packet(&bob_pub, "transfer 10 coins", None).expect("encrypt");

    let mut ciphertext = packet.ciphertext.clone();
    ciphertext[3] ^= 0x01;
    let mut value = serde_json::to_value(&packet).expect("json");
    value["ciphertext"] = STANDARD.encode(&ciphertext).into();

    let forged = Packet::from_json(&value.to_string()).expect("parse");
    assert!(matches!(
        decrypt_packet(&forged, &bob_priv),
        Err(Error::TamperDetected)
    ));
}

/// Storing the same packet twice leaves one row.
#[test]
fn test_idempotent_storage() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (db, _) = file_db(dir.path());
    let (bob_pub, _) = generate_identity().expect("bob");
    let packet = encrypt_packet(&bob_pub, "once", None).expect("encrypt");
    let json = packet.to_json().expect("serialize");

    let msg = StoredMessage::new(&packet.packet_id, "bob", Direction::Sent, json, MessageStatus::Sent);
    assert!(db.add_message(&msg).expect("first insert"));
    assert!(!db.add_message(&msg).expect("second insert"));
    assert_eq!(db.get_history("bob", None).expect("history").len(), 1);
}

/// Restoring a backup brings back exactly the backed-up state.
#[test]
fn test_backup_restore_roundtrip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut db, config) = file_db(dir.path());
    let master = MasterKey::load_or_create(&dir.path().join("master.key")).expect("master");
    let me = ensure_identity(&db, &master, "me").expect("identity");

    db.add_contact("bob", "BOB-PEM", None).expect("bob");
    db.add_message(&StoredMessage::new("p1", "bob", Direction::Sent, "{}", MessageStatus::Sent))
        .expect("p1");

    let backup = db.backup().expect("backup");
    assert!(backup.starts_with(&config.backup_dir));
    let file_name = backup.file_name().and_then(|n| n.to_str()).expect("name");
    assert!(file_name.starts_with("veilchat_"));
    assert!(file_name.ends_with(".db"));

    db.add_contact("carol", "CAROL-PEM", None).expect("carol");
    db.add_message(&StoredMessage::new("p2", "bob", Direction::Sent, "{}", MessageStatus::Sent))
        .expect("p2");
    db.update_message_status("p1", MessageStatus::Read).expect("status");

    db.restore(&backup).expect("restore");

    let names: Vec<String> = db
        .list_contacts()
        .expect("contacts")
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["bob", "me"]);
    let history = db.get_history("bob", None).expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, MessageStatus::Sent);

    let mirror = std::fs::read_to_string(dir.path().join("contacts.json")).expect("mirror");
    assert!(!mirror.contains("carol"));

    let reloaded = ensure_identity(&db, &master, "me").expect("identity survives");
    assert_eq!(reloaded.public_key(), me.public_key());
}

/// Data written through one handle is visible after reopening the file.
#[test]
fn test_identity_persists_across_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let key_path = dir.path().join("master.key");

    let first = {
        let (db, _) = file_db(dir.path());
        let master = MasterKey::load_or_create(&key_path).expect("master");
        ensure_identity(&db, &master, "me").expect("create")
    };

    let (db, _) = file_db(dir.path());
    let master = MasterKey::load_or_create(&key_path).expect("master");
    let second = ensure_identity(&db, &master, "me").expect("load");
    assert_eq!(first.public_key(), second.public_key());
}

/// Five sends per minute, the sixth rejected until the window slides.
#[test]
fn test_rate_limit_window() {
    let mut limiter = RateLimiter::default();
    let t0 = Instant::now();

    for i in 0..5 {
        limiter
            .check("bob", t0 + Duration::from_secs(i))
            .expect("allowed");
    }
    assert!(matches!(
        limiter.check("bob", t0 + Duration::from_secs(10)),
        Err(Error::RateLimitExceeded)
    ));
    limiter
        .check("bob", t0 + Duration::from_secs(61))
        .expect("allowed after 61 s");
}

/// Restoring from a path that does not exist leaves the store untouched.
#[test]
fn test_restore_missing_backup() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut db, _) = file_db(dir.path());
    db.add_contact("bob", "PEM", None).expect("bob");

    let missing = dir.path().join("backups").join("gone.db");
    assert!(matches!(db.restore(&missing), Err(Error::RestoreFileMissing(_))));
    assert!(db.get_contact("bob").expect("get").is_some());
}

/// A mirror that names the local identity cannot swap out its key.
#[test]
fn test_imported_mirror_leaves_identity_usable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (db, _) = file_db(dir.path());
    let master = MasterKey::load_or_create(&dir.path().join("master.key")).expect("master");
    let me = ensure_identity(&db, &master, "me").expect("identity");

    let (other_pub, _) = generate_identity().expect("other");
    let mirror = serde_json::json!([
        { "name": "me", "public_key": other_pub.to_pem().expect("pem") },
    ]);
    let path = dir.path().join("foreign.json");
    std::fs::write(&path, mirror.to_string()).expect("write");

    assert_eq!(db.import_contacts_json(&path).expect("import"), 0);
    assert!(matches!(
        db.add_contact("me", &other_pub.to_pem().expect("pem"), None),
        Err(Error::Identity(_))
    ));

    let reloaded = ensure_identity(&db, &master, "me").expect("identity still loads");
    assert_eq!(reloaded.public_key(), me.public_key());
}
