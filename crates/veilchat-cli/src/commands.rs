//! CLI command implementations.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use veilchat_core::{
    config::ChatConfig,
    crypto::{generate_identity, MasterKey, PublicKey},
    identity::{ensure_identity, format_fingerprint},
    messaging::{ChatClient, ChatMessage, ClientEvent, ConnectOptions, Direction},
    storage::{Contact, Database},
    Error,
};

/// Open the store and master key under the data directory.
fn open_store(config: &ChatConfig) -> Result<(Database, MasterKey)> {
    let master = MasterKey::load_or_create(&config.master_key_path())
        .context("Failed to load master key")?;
    let db = Database::open(&config.database_config())
        .with_context(|| format!("Failed to open store {}", config.db_path().display()))?;
    Ok((db, master))
}

/// Build a client for the configured identity, creating it on first run.
async fn open_client(config: &ChatConfig) -> Result<ChatClient> {
    let (db, master) = open_store(config)?;
    ChatClient::open(Arc::new(Mutex::new(db)), master, &config.identity)
        .await
        .context("Failed to load identity")
}

fn contact_fingerprint(contact: &Contact) -> String {
    PublicKey::from_pem(&contact.public_key)
        .and_then(|key| key.fingerprint())
        .map(|fp| format_fingerprint(&fp))
        .unwrap_or_else(|_| "<invalid key>".to_string())
}

fn format_message(message: &ChatMessage) -> String {
    let time = message
        .timestamp
        .with_timezone(&chrono::Local)
        .format("%H:%M:%S");
    let arrow = match message.direction {
        Direction::Sent => "→",
        Direction::Received => "←",
    };
    format!(
        "[{}] {} {} {} ({})",
        time, arrow, message.contact_name, message.text, message.status
    )
}

// ============================================================================
// Interactive shell
// ============================================================================

/// One line of shell input.
#[derive(Debug, PartialEq, Eq)]
enum ShellCommand {
    To(String),
    History(Option<String>),
    Contacts,
    Quit,
    Message(String),
    Empty,
    Unknown(String),
}

fn parse_line(line: &str) -> ShellCommand {
    let line = line.trim();
    if line.is_empty() {
        return ShellCommand::Empty;
    }
    if !line.starts_with('/') {
        return ShellCommand::Message(line.to_string());
    }

    let (cmd, rest) = match line.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (line, ""),
    };
    match cmd {
        "/to" if !rest.is_empty() => ShellCommand::To(rest.to_string()),
        "/history" if rest.is_empty() => ShellCommand::History(None),
        "/history" => ShellCommand::History(Some(rest.to_string())),
        "/contacts" => ShellCommand::Contacts,
        "/quit" | "/exit" => ShellCommand::Quit,
        _ => ShellCommand::Unknown(cmd.to_string()),
    }
}

fn print_event(event: ClientEvent) {
    match event {
        ClientEvent::MessageReceived(message) => println!("{}", format_message(&message)),
        ClientEvent::StatusChanged { packet_id, status } => {
            let short: String = packet_id.chars().take(8).collect();
            println!("  · {} {}", short, status);
        }
        ClientEvent::ContactUpdated { name } => println!("  · {} is online", name),
        ClientEvent::PeerOffline { name } => println!("  · {} went offline", name),
        ClientEvent::BackupCreated { path } => println!("  · Backup written to {}", path.display()),
        ClientEvent::Error { message } => eprintln!("[ERROR] {}", message),
    }
}

/// Run the interactive chat shell.
pub async fn chat(config: &ChatConfig, connect: bool) -> Result<()> {
    let client = open_client(config).await?;
    let identity = client.identity().await;

    println!("\nVeilChat as {}", identity.name());
    println!("  Fingerprint: {}", format_fingerprint(&identity.fingerprint()?));

    let mut events = client.subscribe();
    if connect {
        let url = config.relay_url();
        let options = ConnectOptions {
            accept_invalid_certs: config.insecure,
            ..ConnectOptions::default()
        };
        client.connect_with_options(url.clone(), options).await?;
        println!("  Relay:       {}", url);
    } else {
        println!("  Relay:       offline (delivery is simulated)");
    }
    println!("\nCommands: /to <name>, /history [search], /contacts, /quit");

    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Display fell behind");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut current: Option<String> = None;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read input")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        match parse_line(&line) {
            ShellCommand::Empty => {}
            ShellCommand::Quit => break,
            ShellCommand::To(name) => {
                if client.database().lock().await.get_contact(&name)?.is_none() {
                    println!("Unknown contact: {}", name);
                } else {
                    println!("Now talking to {}", name);
                    current = Some(name);
                }
            }
            ShellCommand::Contacts => {
                for contact in client.contacts().await? {
                    println!("  {}  {}", contact.name, contact_fingerprint(&contact));
                }
            }
            ShellCommand::History(search) => match &current {
                Some(name) => {
                    for message in client.history(name, search.as_deref()).await? {
                        println!("{}", format_message(&message));
                    }
                }
                None => println!("Pick a contact first with /to <name>"),
            },
            ShellCommand::Message(text) => match &current {
                Some(name) => match client.send_message(name, &text).await {
                    Ok(_) => {}
                    Err(Error::RateLimitExceeded) => {
                        println!("Slow down: at most 5 messages per minute to {}", name)
                    }
                    Err(e) => eprintln!("[ERROR] {}", e),
                },
                None => println!("Pick a contact first with /to <name>"),
            },
            ShellCommand::Unknown(cmd) => println!("Unknown command: {}", cmd),
        }
    }

    println!("\nShutting down...");
    client.shutdown().await;
    printer.abort();
    Ok(())
}

// ============================================================================
// One-shot commands
// ============================================================================

/// Add a contact from a PEM file, or with a freshly generated key.
pub async fn add_contact(config: &ChatConfig, name: &str, public_key: Option<&Path>) -> Result<()> {
    if name.trim().is_empty() {
        bail!("Contact name cannot be empty");
    }

    let (db, _) = open_store(config)?;
    if db.get_contact(name)?.is_some_and(|c| c.has_private_key()) {
        bail!("{} is a local identity; use generate-keys to replace its key", name);
    }
    let pem = match public_key {
        Some(path) => {
            let pem = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            PublicKey::from_pem(&pem).context("Not a valid public key")?;
            pem
        }
        None => {
            // Only the public half is kept; the private half is discarded.
            let (public, _) = generate_identity().context("Failed to generate key")?;
            public.to_pem()?
        }
    };

    db.add_contact(name, &pem, None)
        .context("Failed to store contact")?;

    let contact = db.get_contact(name)?.context("Contact missing after insert")?;
    println!("Contact added: {}", name);
    println!("  Fingerprint: {}", contact_fingerprint(&contact));
    Ok(())
}

/// List contacts.
pub async fn list_contacts(config: &ChatConfig) -> Result<()> {
    let (db, _) = open_store(config)?;
    let contacts = db.list_contacts()?;

    if contacts.is_empty() {
        println!("No contacts.");
        return Ok(());
    }

    println!("\nContacts:");
    for contact in contacts {
        let marker = if contact.has_private_key() { " (you)" } else { "" };
        println!("  {}{}", contact.name, marker);
        println!("    Fingerprint: {}", contact_fingerprint(&contact));
        if let Some(seen) = contact.last_seen {
            println!("    Last seen:   {}", seen.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M"));
        }
    }
    Ok(())
}

/// Delete a contact and its history.
pub async fn delete_contact(config: &ChatConfig, name: &str) -> Result<()> {
    if name == config.identity {
        bail!("Refusing to delete the local identity; use generate-keys to replace it");
    }

    let (mut db, _) = open_store(config)?;
    if db.delete_contact(name)? {
        println!("Contact deleted: {}", name);
    } else {
        println!("No such contact: {}", name);
    }
    Ok(())
}

/// Show decrypted history with a contact.
pub async fn show_history(config: &ChatConfig, name: &str, search: Option<&str>) -> Result<()> {
    let client = open_client(config).await?;
    let messages = client.history(name, search).await?;

    match search {
        Some(s) => println!("Chat history with {} matching \"{}\":", name, s),
        None => println!("Chat history with {}:", name),
    }
    if messages.is_empty() {
        println!("  (no messages)");
    }
    for message in &messages {
        println!("{}", format_message(message));
    }
    Ok(())
}

/// Delete all messages exchanged with a contact.
pub async fn clear_history(config: &ChatConfig, name: &str) -> Result<()> {
    let (db, _) = open_store(config)?;
    let removed = db.clear_history(name)?;
    println!("Removed {} messages with {}", removed, name);
    Ok(())
}

/// Replace the local keypair.
pub async fn generate_keys(config: &ChatConfig) -> Result<()> {
    let client = open_client(config).await?;
    let old = client.identity().await.fingerprint()?;
    let fresh = client.regenerate_identity().await.context("Failed to generate keys")?;

    println!("New keypair generated for {}", fresh.name());
    println!("  Old fingerprint: {}", format_fingerprint(&old));
    println!("  New fingerprint: {}", format_fingerprint(&fresh.fingerprint()?));
    println!("\nMessages encrypted to the old key can no longer be read.");
    Ok(())
}

/// Write a timestamped copy of the store.
pub async fn backup(config: &ChatConfig) -> Result<()> {
    let (db, _) = open_store(config)?;
    let path = db.backup().context("Backup failed")?;
    println!("Backup written to {}", path.display());
    Ok(())
}

/// Replace the store with a backup.
pub async fn restore(config: &ChatConfig, path: &Path) -> Result<()> {
    let (mut db, master) = open_store(config)?;
    db.restore(path).context("Restore failed")?;

    // The backup may predate the local identity.
    let identity = ensure_identity(&db, &master, &config.identity)?;
    println!("Restored from {}", path.display());
    println!("  Identity: {} ({})", identity.name(), format_fingerprint(&identity.fingerprint()?));
    Ok(())
}

/// Merge contacts from a JSON mirror file.
pub async fn import_contacts(config: &ChatConfig, path: &Path) -> Result<()> {
    let (db, _) = open_store(config)?;
    let count = db
        .import_contacts_json(path)
        .with_context(|| format!("Failed to import {}", path.display()))?;
    println!("Imported {} contacts", count);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_text_is_message() {
        assert_eq!(parse_line("  hello there "), ShellCommand::Message("hello there".into()));
        assert_eq!(parse_line("   "), ShellCommand::Empty);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_line("/to bob"), ShellCommand::To("bob".into()));
        assert_eq!(parse_line("/history"), ShellCommand::History(None));
        assert_eq!(
            parse_line("/history lunch plans"),
            ShellCommand::History(Some("lunch plans".into()))
        );
        assert_eq!(parse_line("/contacts"), ShellCommand::Contacts);
        assert_eq!(parse_line("/quit"), ShellCommand::Quit);
    }

    #[test]
    fn test_parse_unknown_and_incomplete() {
        assert_eq!(parse_line("/to"), ShellCommand::Unknown("/to".into()));
        assert_eq!(parse_line("/dance"), ShellCommand::Unknown("/dance".into()));
    }
}
