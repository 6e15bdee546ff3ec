//! Hybrid packet encryption.
//!
//! A fresh ChaCha20-Poly1305 key per message, wrapped with RSA-OAEP for the
//! receiver and optionally the sender. Decryption checks, in order: key
//! unwrap, ciphertext digest, AEAD tag.

use super::aead::{self, Nonce};
use super::keys::{PrivateKey, PublicKey};
use super::{constant_time_eq, random_bytes, sha256_hex, KEY_SIZE};
use crate::error::{Error, Result};
use crate::protocol::Packet;
use zeroize::Zeroizing;

/// Encrypt `plaintext` for `receiver`.
///
/// When `sender` is given the message key is also wrapped for it and its PEM
/// is recorded in the packet, so the sender can read its own history.
pub fn encrypt_packet(
    receiver: &PublicKey,
    plaintext: &str,
    sender: Option<&PublicKey>,
) -> Result<Packet> {
    let key = Zeroizing::new(random_bytes::<KEY_SIZE>());
    let nonce = Nonce::random();
    let ciphertext = aead::encrypt(&key, &nonce, plaintext.as_bytes())?;

    let enc_key = receiver.wrap(key.as_slice())?;
    let (enc_key_sender, sender_pub) = match sender {
        Some(sender) => (
            Some(sender.wrap(key.as_slice())?),
            Some(sender.to_pem()?.into_bytes()),
        ),
        None => (None, None),
    };

    Ok(Packet {
        packet_id: hex::encode(random_bytes::<16>()),
        enc_key,
        enc_key_sender,
        nonce: nonce.as_bytes().to_vec(),
        sha256: sha256_hex(&ciphertext),
        ciphertext,
        sender_pub,
    })
}

/// Decrypt a packet with `private_key`.
///
/// # Errors
/// - [`Error::DecryptionFailure`] when neither wrapped key opens
/// - [`Error::TamperDetected`] when the ciphertext digest does not match
/// - [`Error::AuthenticationFailure`] when the AEAD tag is invalid
pub fn decrypt_packet(packet: &Packet, private_key: &PrivateKey) -> Result<String> {
    let key = unwrap_message_key(packet, private_key)?;

    let digest = sha256_hex(&packet.ciphertext);
    if !constant_time_eq(digest.as_bytes(), packet.sha256.to_ascii_lowercase().as_bytes()) {
        return Err(Error::TamperDetected);
    }

    let nonce = Nonce::from_slice(&packet.nonce).map_err(|_| Error::AuthenticationFailure)?;
    let plaintext = aead::decrypt(&key, &nonce, &packet.ciphertext)?;

    String::from_utf8(plaintext.to_vec())
        .map_err(|_| Error::Encoding("plaintext is not UTF-8".into()))
}

fn unwrap_message_key(
    packet: &Packet,
    private_key: &PrivateKey,
) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
    let secret = private_key.unwrap_secret(&packet.enc_key).or_else(|_| {
        packet
            .enc_key_sender
            .as_deref()
            .ok_or(Error::DecryptionFailure)
            .and_then(|wrapped| private_key.unwrap_secret(wrapped))
    })?;

    let key: [u8; KEY_SIZE] = secret
        .as_slice()
        .try_into()
        .map_err(|_| Error::DecryptionFailure)?;
    Ok(Zeroizing::new(key))
}
