//! VeilChat relay.
//!
//! Routes opaque encrypted packets between authenticated peers over
//! WebSocket and keeps its own record of contacts and message status.
//!
//! ## Relay Properties
//!
//! - Relays never decrypt content; only `packet_id` is read
//! - One live connection per name; later claimants are refused
//! - No store-and-forward: packets for offline peers stay `pending`
//! - Plain HTTP gets a banner at `/` and 426 elsewhere
//! - A message is `delivered` once it is queued on the recipient's live
//!   connection; a write that later fails does not roll the status back

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use veilchat_core::logging::ShortId;
use veilchat_core::messaging::{Direction, StoredMessage};
use veilchat_core::protocol::{peek_packet_id, MessageStatus, RelayMessage, RosterEntry};
use veilchat_core::storage::{Database, DatabaseConfig};
use veilchat_core::{Error, Result};

pub mod tls;

pub use tls::{TlsConfigError, TlsMode};

/// Relay store file name inside the data directory.
pub const RELAY_DB_NAME: &str = "relay.db";

/// Body served to plain HTTP requests on `/`.
pub const BANNER: &str =
    "VeilChat relay. Connect with a WebSocket client to exchange encrypted packets.\n";

/// Body served to plain HTTP requests elsewhere.
pub const UPGRADE_REQUIRED: &str = "This endpoint only speaks WebSocket.\n";

/// Store configuration for a relay rooted at `data_dir`.
pub fn relay_database_config(data_dir: &Path) -> DatabaseConfig {
    DatabaseConfig {
        path: data_dir.join(RELAY_DB_NAME),
        in_memory: false,
        backup_dir: data_dir.join(veilchat_core::storage::DEFAULT_BACKUP_DIR),
        contacts_json: None,
    }
}

struct Peer {
    id: u64,
    tx: mpsc::UnboundedSender<RelayMessage>,
}

/// Live connections by name.
#[derive(Default)]
pub struct ConnectionRegistry {
    peers: HashMap<String, Peer>,
    next_id: u64,
}

impl ConnectionRegistry {
    /// Claim `name` for a connection.
    ///
    /// Returns a connection id, or [`Error::NameInUse`] if the name is live.
    pub fn register(&mut self, name: &str, tx: mpsc::UnboundedSender<RelayMessage>) -> Result<u64> {
        if self.peers.contains_key(name) {
            return Err(Error::NameInUse);
        }
        self.next_id += 1;
        let id = self.next_id;
        self.peers.insert(name.to_string(), Peer { id, tx });
        Ok(id)
    }

    /// Release `name` if it is still held by connection `id`.
    pub fn unregister(&mut self, name: &str, id: u64) -> bool {
        match self.peers.get(name) {
            Some(peer) if peer.id == id => {
                self.peers.remove(name);
                true
            }
            _ => false,
        }
    }

    /// Queue a frame for `name`. Returns `false` if the name is not live.
    pub fn send_to(&self, name: &str, frame: RelayMessage) -> bool {
        match self.peers.get(name) {
            Some(peer) => peer.tx.send(frame).is_ok(),
            None => false,
        }
    }

    /// Queue a frame for every live peer except `except`.
    pub fn broadcast_except(&self, except: &str, frame: &RelayMessage) {
        for (name, peer) in &self.peers {
            if name != except && peer.tx.send(frame.clone()).is_err() {
                debug!(peer = %name, "Peer writer already gone");
            }
        }
    }

    /// Whether `name` is live.
    pub fn is_connected(&self, name: &str) -> bool {
        self.peers.contains_key(name)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no one is connected.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Shared relay state handed to every handler.
#[derive(Clone)]
pub struct RelayState {
    registry: Arc<Mutex<ConnectionRegistry>>,
    db: Arc<Mutex<Database>>,
}

impl RelayState {
    /// Wrap an opened store.
    pub fn new(db: Database) -> Self {
        Self {
            registry: Arc::new(Mutex::new(ConnectionRegistry::default())),
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Open the store at `config`.
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        Ok(Self::new(Database::open(config)?))
    }

    /// Shared store handle.
    pub fn database(&self) -> Arc<Mutex<Database>> {
        self.db.clone()
    }

    /// Whether `name` currently holds a connection.
    pub async fn is_connected(&self, name: &str) -> bool {
        self.registry.lock().await.is_connected(name)
    }

    /// Record the peer, announce it and send it the roster.
    async fn on_auth(&self, name: &str, public_key: &str) -> Result<()> {
        let contacts = {
            let db = self.db.lock().await;
            db.add_contact(name, public_key, None)?;
            db.list_contacts()?
        };

        let registry = self.registry.lock().await;
        registry.broadcast_except(
            name,
            &RelayMessage::Presence {
                name: name.to_string(),
                public_key: public_key.to_string(),
            },
        );
        registry.send_to(
            name,
            RelayMessage::Roster {
                contacts: contacts
                    .into_iter()
                    .map(|c| RosterEntry {
                        name: c.name,
                        public_key: c.public_key,
                    })
                    .collect(),
            },
        );
        Ok(())
    }

    /// Handle one frame from an authenticated peer.
    async fn on_frame(&self, from: &str, frame: RelayMessage) -> Result<()> {
        match frame {
            RelayMessage::Send { to, packet, .. } => self.route(from, to, packet).await,
            RelayMessage::Ack {
                packet_id,
                status,
                for_peer,
            } => {
                self.db.lock().await.update_message_status(&packet_id, status)?;
                if let Some(sender) = for_peer {
                    let forwarded = self
                        .registry
                        .lock()
                        .await
                        .send_to(&sender, RelayMessage::Status { packet_id, status });
                    if !forwarded {
                        debug!(%sender, "Ack target not connected");
                    }
                }
                Ok(())
            }
            other => {
                debug!(peer = %from, frame = other.kind(), "Ignoring unexpected frame");
                Ok(())
            }
        }
    }

    async fn route(&self, from: &str, to: String, packet: String) -> Result<()> {
        let packet_id = peek_packet_id(&packet)?;
        let stored = StoredMessage::new(
            packet_id.clone(),
            to.clone(),
            Direction::Sent,
            packet.clone(),
            MessageStatus::Pending,
        );
        self.db.lock().await.add_message(&stored)?;

        let delivered = self.registry.lock().await.send_to(
            &to,
            RelayMessage::Deliver {
                from: from.to_string(),
                packet,
            },
        );
        if !delivered {
            info!(%to, packet_id = %ShortId(&packet_id), "Recipient offline, left pending");
            return Ok(());
        }

        self.db
            .lock()
            .await
            .update_message_status(&packet_id, MessageStatus::Delivered)?;
        self.registry.lock().await.send_to(
            from,
            RelayMessage::Status {
                packet_id: packet_id.clone(),
                status: MessageStatus::Delivered,
            },
        );
        debug!(%from, %to, packet_id = %ShortId(&packet_id), "Forwarded packet");
        Ok(())
    }

    async fn on_disconnect(&self, name: &str, id: u64) {
        let mut registry = self.registry.lock().await;
        if !registry.unregister(name, id) {
            return;
        }
        registry.broadcast_except(
            name,
            &RelayMessage::Presence {
                name: name.to_string(),
                public_key: String::new(),
            },
        );
        info!(peer = %name, live = registry.len(), "Peer disconnected");
    }
}

/// Build the relay router.
pub fn app(state: RelayState) -> Router {
    Router::new()
        .route("/", any(root))
        .fallback(fallback)
        .with_state(state)
}

/// Bind `addr` and serve until the listener fails.
pub async fn serve(addr: &str, state: RelayState, tls: &TlsMode) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_listener(listener, state, tls).await
}

/// Serve on an already bound listener, over TLS when `tls` says so.
pub async fn serve_listener(
    listener: tokio::net::TcpListener,
    state: RelayState,
    tls: &TlsMode,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    match tls.to_rustls_config().await? {
        None => {
            info!(%addr, "Relay listening");
            axum::serve(listener, app(state)).await?;
        }
        Some(config) => {
            info!(%addr, "Relay listening (wss)");
            axum_server::from_tcp_rustls(listener.into_std()?, config)
                .serve(app(state).into_make_service())
                .await?;
        }
    }
    Ok(())
}

async fn root(
    State(state): State<RelayState>,
    ws: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match ws {
        Ok(ws) => upgrade(ws, state),
        Err(_) => (StatusCode::OK, BANNER).into_response(),
    }
}

async fn fallback(
    State(state): State<RelayState>,
    ws: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match ws {
        Ok(ws) => upgrade(ws, state),
        Err(_) => (StatusCode::UPGRADE_REQUIRED, UPGRADE_REQUIRED).into_response(),
    }
}

fn upgrade(ws: WebSocketUpgrade, state: RelayState) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Send a single error frame and close. Used before a peer is registered.
async fn refuse(mut socket: WebSocket, message: &str) {
    if let Ok(json) = RelayMessage::error(message).to_json() {
        let _ = socket.send(Message::Text(json)).await;
    }
    let _ = socket.send(Message::Close(None)).await;
}

async fn handle_socket(mut socket: WebSocket, state: RelayState) {
    let (name, public_key) = match socket.recv().await {
        Some(Ok(Message::Text(text))) => match RelayMessage::from_json(&text) {
            Ok(RelayMessage::Auth { name, public_key })
                if !name.trim().is_empty() && !public_key.trim().is_empty() =>
            {
                (name, public_key)
            }
            _ => return refuse(socket, "auth required").await,
        },
        _ => return refuse(socket, "auth required").await,
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<RelayMessage>();
    let id = match state.registry.lock().await.register(&name, tx) {
        Ok(id) => id,
        Err(_) => {
            warn!(peer = %name, "Refusing second connection for live name");
            return refuse(socket, "name already connected").await;
        }
    };
    info!(peer = %name, "Peer authenticated");

    let (mut sink, mut stream) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let json = match frame.to_json() {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "Dropping unencodable frame");
                    continue;
                }
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    if let Err(e) = state.on_auth(&name, &public_key).await {
        // Without a roster the client would wait out its admission timeout.
        warn!(peer = %name, error = %e, "Failed to record peer");
        {
            let mut registry = state.registry.lock().await;
            registry.send_to(&name, RelayMessage::error("relay store unavailable"));
            registry.unregister(&name, id);
        }
        let _ = writer.await;
        return;
    }

    while let Some(incoming) = stream.next().await {
        match incoming {
            Ok(Message::Text(text)) => match RelayMessage::from_json(&text) {
                Ok(frame) => {
                    if let Err(e) = state.on_frame(&name, frame).await {
                        warn!(peer = %name, error = %e, "Failed to handle frame");
                    }
                }
                Err(e) => warn!(peer = %name, error = %e, "Skipping malformed frame"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(peer = %name, error = %e, "Socket error");
                break;
            }
        }
    }

    state.on_disconnect(&name, id).await;
    let _ = writer.await;
}

/// Resolve the relay data directory the same way the client does.
pub fn data_dir(flag: Option<&str>) -> PathBuf {
    veilchat_core::config::resolve_data_dir(flag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_rejects_live_name() {
        let mut registry = ConnectionRegistry::default();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        let id = registry.register("alice", tx1).expect("first");
        assert!(matches!(registry.register("alice", tx2), Err(Error::NameInUse)));
        assert!(registry.is_connected("alice"));

        assert!(!registry.unregister("alice", id + 1));
        assert!(registry.unregister("alice", id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_broadcast_skips_origin() {
        let mut registry = ConnectionRegistry::default();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        registry.register("alice", tx_a).expect("alice");
        registry.register("bob", tx_b).expect("bob");

        registry.broadcast_except("alice", &RelayMessage::error("x"));
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().expect("bob gets it"), RelayMessage::error("x"));
    }

    #[test]
    fn test_send_to_offline_peer() {
        let registry = ConnectionRegistry::default();
        assert!(!registry.send_to("ghost", RelayMessage::error("x")));
    }
}
