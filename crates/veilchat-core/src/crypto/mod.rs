//! Cryptographic primitives for VeilChat.
//!
//! Every message is sealed with a hybrid construction:
//!
//! - **ChaCha20-Poly1305**: body encryption under a fresh per-message key
//! - **RSA-OAEP/SHA-256**: wrapping that key for the receiver (and sender)
//! - **SHA-256**: ciphertext digest checked before decryption
//!
//! Private keys at rest are sealed with ChaCha20-Poly1305 under a local
//! master key. Key material is zeroized on drop.
//!
//! ## Forbidden
//!
//! - Custom cryptography
//! - Logging key material

mod aead;
mod hybrid;
mod keys;
mod master;

pub use aead::{decrypt, encrypt, open, seal, Nonce, NONCE_SIZE, TAG_SIZE};
pub use hybrid::{decrypt_packet, encrypt_packet};
pub use keys::{generate_identity, PrivateKey, PublicKey, RSA_KEY_BITS, RSA_PUBLIC_EXPONENT};
pub use master::MasterKey;

use sha2::{Digest, Sha256};

/// Key size for ChaCha20-Poly1305.
pub const KEY_SIZE: usize = 32;

/// Generate cryptographically secure random bytes.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut bytes);
    bytes
}

/// Lowercase hex SHA-256 digest.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Constant-time comparison of byte slices.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
