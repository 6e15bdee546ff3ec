//! Client session orchestrator.
//!
//! [`ChatClient`] owns the local identity and ties the store, the crypto
//! engine and the relay connection together:
//!
//! - Outgoing frames go through an unbounded channel to the supervisor task
//! - Incoming frames are handled on a dedicated task
//! - Everything the UI needs to show is broadcast as a [`ClientEvent`]
//!
//! When no relay connection is up, sends fall back to a local simulation
//! (see [`OfflineTimings`]).

use super::connection::{Backoff, ConnectionState, Supervisor};
use super::message::{decrypt_placeholder, ChatMessage, Direction, StoredMessage};
use super::offline::OfflineTimings;
use super::rate_limit::RateLimiter;
use super::tls::insecure_connector;
use crate::crypto::{decrypt_packet, encrypt_packet, MasterKey, PublicKey};
use crate::error::{Error, Result};
use crate::identity::{self, LocalIdentity};
use crate::logging::ShortId;
use crate::protocol::{peek_packet_id, MessageStatus, Packet, RelayMessage, RosterEntry};
use crate::storage::{Contact, Database};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How [`ChatClient::connect_with_options`] reaches the relay.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Reconnect delays.
    pub backoff: Backoff,
    /// Skip certificate checks on `wss://` URLs, for self-signed relays.
    pub accept_invalid_certs: bool,
}

/// Events emitted by the client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A message arrived, already decrypted (or a placeholder).
    MessageReceived(ChatMessage),
    /// A stored message moved forward.
    StatusChanged {
        /// Packet id.
        packet_id: String,
        /// New status.
        status: MessageStatus,
    },
    /// A contact was learned or refreshed from the relay.
    ContactUpdated {
        /// Contact name.
        name: String,
    },
    /// A peer left the relay.
    PeerOffline {
        /// Peer name.
        name: String,
    },
    /// An automatic backup was written.
    BackupCreated {
        /// Backup file.
        path: PathBuf,
    },
    /// Relay or local error worth showing.
    Error {
        /// Description.
        message: String,
    },
}

/// Channel ends handed to the supervisor on [`ChatClient::connect`].
struct PendingConnection {
    outbound_rx: mpsc::UnboundedReceiver<RelayMessage>,
    state_tx: watch::Sender<ConnectionState>,
}

pub(super) struct Inner {
    pub(super) db: Arc<Mutex<Database>>,
    master_key: MasterKey,
    pub(super) identity: RwLock<LocalIdentity>,
    limiter: Mutex<RateLimiter>,
    pub(super) offline: OfflineTimings,
    outbound_tx: mpsc::UnboundedSender<RelayMessage>,
    pending: Mutex<Option<PendingConnection>>,
    state_rx: watch::Receiver<ConnectionState>,
    pub(super) event_tx: broadcast::Sender<ClientEvent>,
    auth_tx: watch::Sender<RelayMessage>,
    stop_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Chat session for one local identity.
#[derive(Clone)]
pub struct ChatClient {
    pub(super) inner: Arc<Inner>,
}

impl ChatClient {
    /// Load or create the identity `name` and build an unconnected client.
    pub async fn open(db: Arc<Mutex<Database>>, master_key: MasterKey, name: &str) -> Result<Self> {
        Self::with_offline_timings(db, master_key, name, OfflineTimings::default()).await
    }

    /// Like [`ChatClient::open`] with custom offline simulation delays.
    pub async fn with_offline_timings(
        db: Arc<Mutex<Database>>,
        master_key: MasterKey,
        name: &str,
        offline: OfflineTimings,
    ) -> Result<Self> {
        let identity = {
            let db = db.lock().await;
            identity::ensure_identity(&db, &master_key, name)?
        };
        let auth = auth_frame(&identity)?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (auth_tx, _) = watch::channel(auth);
        let (stop_tx, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(Inner {
                db,
                master_key,
                identity: RwLock::new(identity),
                limiter: Mutex::new(RateLimiter::default()),
                offline,
                outbound_tx,
                pending: Mutex::new(Some(PendingConnection {
                    outbound_rx,
                    state_tx,
                })),
                state_rx,
                event_tx,
                auth_tx,
                stop_tx,
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Subscribe to client events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Observe the relay connection state.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_rx.clone()
    }

    /// Whether the relay connection is currently up.
    pub fn is_connected(&self) -> bool {
        *self.inner.state_rx.borrow() == ConnectionState::Connected
    }

    /// Snapshot of the local identity.
    pub async fn identity(&self) -> LocalIdentity {
        self.inner.identity.read().await.clone()
    }

    /// Shared store handle.
    pub fn database(&self) -> Arc<Mutex<Database>> {
        self.inner.db.clone()
    }

    /// Start the connection supervisor and the inbound handler.
    ///
    /// Can only be called once per client.
    pub async fn connect(&self, url: impl Into<String>) -> Result<()> {
        self.connect_with_options(url, ConnectOptions::default()).await
    }

    /// Like [`ChatClient::connect`] with custom reconnect delays.
    pub async fn connect_with_backoff(&self, url: impl Into<String>, backoff: Backoff) -> Result<()> {
        let options = ConnectOptions {
            backoff,
            ..ConnectOptions::default()
        };
        self.connect_with_options(url, options).await
    }

    /// Like [`ChatClient::connect`] with explicit options.
    pub async fn connect_with_options(&self, url: impl Into<String>, options: ConnectOptions) -> Result<()> {
        let pending = self
            .inner
            .pending
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::Protocol("client already started".into()))?;

        let url = url.into();
        if options.accept_invalid_certs && url.starts_with("wss://") {
            warn!(%url, "Relay certificate will not be verified");
        }
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
        let supervisor = Supervisor {
            url,
            auth: self.inner.auth_tx.subscribe(),
            outbound: pending.outbound_rx,
            inbound: inbound_tx,
            state: pending.state_tx,
            stop: self.inner.stop_tx.subscribe(),
            backoff: options.backoff,
            connector: options.accept_invalid_certs.then(insecure_connector),
        };

        let client = self.clone();
        let handler = tokio::spawn(async move {
            while let Some(frame) = inbound_rx.recv().await {
                let kind = frame.kind();
                if let Err(e) = client.handle_frame(frame).await {
                    warn!(frame = kind, error = %e, "Failed to handle relay frame");
                }
            }
            debug!("Inbound handler stopped");
        });

        let mut tasks = self.inner.tasks.lock().await;
        tasks.push(tokio::spawn(supervisor.run()));
        tasks.push(handler);
        Ok(())
    }

    /// Stop the reconnect loop and wait for background tasks.
    ///
    /// Offline simulation timers are detached and may still fire.
    pub async fn shutdown(&self) {
        self.inner.stop_tx.send_replace(true);
        let tasks = std::mem::take(&mut *self.inner.tasks.lock().await);
        for task in tasks {
            let _ = task.await;
        }
        info!("Client stopped");
    }

    /// All known contacts.
    pub async fn contacts(&self) -> Result<Vec<Contact>> {
        self.inner.db.lock().await.list_contacts()
    }

    /// Encrypt and send `text` to `to`, returning the packet id.
    ///
    /// # Errors
    /// - [`Error::ContactNotFound`] for an unknown name
    /// - [`Error::RateLimitExceeded`] past five sends per minute to `to`
    pub async fn send_message(&self, to: &str, text: &str) -> Result<String> {
        let contact = self
            .inner
            .db
            .lock()
            .await
            .get_contact(to)?
            .ok_or_else(|| Error::ContactNotFound(to.to_string()))?;

        self.inner.limiter.lock().await.check(to, Instant::now())?;

        let receiver = PublicKey::from_pem(&contact.public_key)?;
        let identity = self.identity().await;
        let packet = encrypt_packet(&receiver, text, Some(identity.public_key()))?;
        let packet_json = packet.to_json()?;

        let stored = StoredMessage::new(
            packet.packet_id.clone(),
            to,
            Direction::Sent,
            packet_json.clone(),
            MessageStatus::Sent,
        );
        self.inner.db.lock().await.add_message(&stored)?;
        debug!(to, packet_id = %ShortId(&packet.packet_id), size = stored.size_bytes, "Stored outgoing message");

        if self.is_connected() {
            let frame = RelayMessage::Send {
                to: to.to_string(),
                packet: packet_json,
                ts: chrono::Utc::now().to_rfc3339(),
            };
            self.inner
                .outbound_tx
                .send(frame)
                .map_err(|_| Error::ConnectionLost)?;
        } else {
            self.simulate_offline(contact, text.to_string(), packet.packet_id.clone());
            self.auto_backup().await;
        }

        Ok(packet.packet_id)
    }

    /// Decrypted conversation with `contact`, oldest first.
    ///
    /// `search` filters case-insensitively on the plaintext.
    pub async fn history(&self, contact: &str, search: Option<&str>) -> Result<Vec<ChatMessage>> {
        let stored = self.inner.db.lock().await.get_history(contact, None)?;
        let identity = self.identity().await;
        let needle = search.map(str::to_lowercase);

        Ok(stored
            .iter()
            .map(|m| ChatMessage::from_stored(m, render(&m.encrypted_packet, &identity)))
            .filter(|m| match &needle {
                Some(n) => m.text.to_lowercase().contains(n),
                None => true,
            })
            .collect())
    }

    /// Replace the local keypair.
    ///
    /// The relay learns the new key on the next connection.
    pub async fn regenerate_identity(&self) -> Result<LocalIdentity> {
        let mut current = self.inner.identity.write().await;
        let fresh = {
            let db = self.inner.db.lock().await;
            identity::regenerate(&db, &self.inner.master_key, current.name())?
        };
        self.inner.auth_tx.send_replace(auth_frame(&fresh)?);
        *current = fresh.clone();
        Ok(fresh)
    }

    /// Apply a status if it moves the message forward.
    ///
    /// Returns whether the stored status changed.
    pub async fn apply_status(&self, packet_id: &str, status: MessageStatus) -> Result<bool> {
        let db = self.inner.db.lock().await;
        let Some(message) = db.get_message(packet_id)? else {
            debug!(packet_id = %ShortId(packet_id), "Status for unknown packet");
            return Ok(false);
        };
        if !message.status.advances_to(status) {
            return Ok(false);
        }
        db.update_message_status(packet_id, status)?;
        drop(db);

        debug!(packet_id = %ShortId(packet_id), %status, "Status advanced");
        let _ = self.inner.event_tx.send(ClientEvent::StatusChanged {
            packet_id: packet_id.to_string(),
            status,
        });
        Ok(true)
    }

    /// Handle one frame from the relay.
    pub(super) async fn handle_frame(&self, frame: RelayMessage) -> Result<()> {
        match frame {
            RelayMessage::Deliver { from, packet } => self.on_deliver(from, packet).await,
            RelayMessage::Presence { name, public_key } if public_key.is_empty() => {
                info!(peer = %name, "Peer went offline");
                let _ = self.inner.event_tx.send(ClientEvent::PeerOffline { name });
                Ok(())
            }
            RelayMessage::Presence { name, public_key } => {
                self.learn_contacts(vec![RosterEntry { name, public_key }]).await
            }
            RelayMessage::Roster { contacts } => self.learn_contacts(contacts).await,
            RelayMessage::Status { packet_id, status } => {
                self.apply_status(&packet_id, status).await.map(|_| ())
            }
            RelayMessage::Error { message } => {
                warn!(%message, "Relay reported an error");
                let _ = self.inner.event_tx.send(ClientEvent::Error { message });
                Ok(())
            }
            other => {
                debug!(frame = other.kind(), "Ignoring unexpected frame");
                Ok(())
            }
        }
    }

    async fn on_deliver(&self, from: String, packet: String) -> Result<()> {
        let packet_id = peek_packet_id(&packet)?;
        let stored = StoredMessage::new(
            packet_id.clone(),
            from.clone(),
            Direction::Received,
            packet,
            MessageStatus::Delivered,
        );
        let inserted = self.inner.db.lock().await.add_message(&stored)?;

        let _ = self.inner.outbound_tx.send(RelayMessage::Ack {
            packet_id: packet_id.clone(),
            status: MessageStatus::Delivered,
            for_peer: Some(from.clone()),
        });

        if !inserted {
            return Ok(());
        }

        let identity = self.identity().await;
        let text = render(&stored.encrypted_packet, &identity);
        info!(from = %from, packet_id = %ShortId(&packet_id), "Message received");
        let _ = self
            .inner
            .event_tx
            .send(ClientEvent::MessageReceived(ChatMessage::from_stored(&stored, text)));
        Ok(())
    }

    /// Upsert announced keys, skipping our own name.
    async fn learn_contacts(&self, entries: Vec<RosterEntry>) -> Result<()> {
        let own = self.identity().await.name().to_string();
        let db = self.inner.db.lock().await;
        for entry in entries {
            if entry.name.is_empty() || entry.public_key.is_empty() || entry.name == own {
                continue;
            }
            db.add_contact(&entry.name, &entry.public_key, None)?;
            debug!(contact = %entry.name, "Learned contact key");
            let _ = self
                .inner
                .event_tx
                .send(ClientEvent::ContactUpdated { name: entry.name });
        }
        Ok(())
    }

    /// Back up the store when the message count hits a multiple of ten.
    async fn auto_backup(&self) {
        let db = self.inner.db.lock().await;
        let result = db.count_messages().and_then(|count| {
            if count > 0 && count % 10 == 0 {
                db.backup().map(Some)
            } else {
                Ok(None)
            }
        });
        drop(db);

        match result {
            Ok(Some(path)) => {
                let _ = self.inner.event_tx.send(ClientEvent::BackupCreated { path });
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Automatic backup failed");
                let _ = self.inner.event_tx.send(ClientEvent::Error {
                    message: format!("automatic backup failed: {}", e),
                });
            }
        }
    }
}

fn auth_frame(identity: &LocalIdentity) -> Result<RelayMessage> {
    Ok(RelayMessage::Auth {
        name: identity.name().to_string(),
        public_key: identity.public_pem()?,
    })
}

/// Plaintext of a stored packet, or an inline placeholder.
pub(super) fn render(packet_json: &str, identity: &LocalIdentity) -> String {
    Packet::from_json(packet_json)
        .and_then(|packet| decrypt_packet(&packet, identity.private_key()))
        .unwrap_or_else(|e| decrypt_placeholder(&e))
}
