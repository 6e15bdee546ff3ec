//! Local stand-in for a relay round trip.
//!
//! Without a relay connection a sent message is walked through
//! `delivered` and `read` on timers, and the contact "answers" with an
//! encrypted echo. The timers are detached tasks.

use super::client::{render, ChatClient, ClientEvent};
use super::message::{ChatMessage, Direction, StoredMessage};
use crate::crypto::{encrypt_packet, PublicKey};
use crate::error::Result;
use crate::logging::ShortId;
use crate::protocol::MessageStatus;
use crate::storage::Contact;
use std::time::Duration;
use tracing::{debug, warn};

/// Delays used by the offline simulation.
#[derive(Debug, Clone, Copy)]
pub struct OfflineTimings {
    /// Send to `delivered`.
    pub delivered_after: Duration,
    /// `delivered` to `read`.
    pub read_after: Duration,
    /// Send to the echo reply.
    pub reply_after: Duration,
}

impl Default for OfflineTimings {
    fn default() -> Self {
        Self {
            delivered_after: Duration::from_millis(600),
            read_after: Duration::from_millis(1000),
            reply_after: Duration::from_millis(800),
        }
    }
}

impl ChatClient {
    pub(super) fn simulate_offline(&self, contact: Contact, text: String, packet_id: String) {
        let timings = self.inner.offline;

        let client = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timings.delivered_after).await;
            if let Err(e) = client.apply_status(&packet_id, MessageStatus::Delivered).await {
                warn!(error = %e, "Offline delivery update failed");
                return;
            }
            tokio::time::sleep(timings.read_after).await;
            if let Err(e) = client.apply_status(&packet_id, MessageStatus::Read).await {
                warn!(error = %e, "Offline read update failed");
            }
        });

        let client = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timings.reply_after).await;
            if let Err(e) = client.echo_reply(&contact, &text).await {
                warn!(contact = %contact.name, error = %e, "Offline echo failed");
            }
        });
    }

    /// Store and emit `Echo: <text>` as if `contact` had sent it.
    async fn echo_reply(&self, contact: &Contact, text: &str) -> Result<()> {
        let identity = self.identity().await;
        let contact_key = PublicKey::from_pem(&contact.public_key)?;
        let reply = format!("Echo: {}", text);
        let packet = encrypt_packet(identity.public_key(), &reply, Some(&contact_key))?;

        let stored = StoredMessage::new(
            packet.packet_id.clone(),
            contact.name.clone(),
            Direction::Received,
            packet.to_json()?,
            MessageStatus::Delivered,
        );
        self.inner.db.lock().await.add_message(&stored)?;
        debug!(contact = %contact.name, packet_id = %ShortId(&packet.packet_id), "Stored offline echo");

        let text = render(&stored.encrypted_packet, &identity);
        let _ = self
            .inner
            .event_tx
            .send(ClientEvent::MessageReceived(ChatMessage::from_stored(&stored, text)));
        Ok(())
    }
}
