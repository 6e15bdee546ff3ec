//! Authenticated encryption using ChaCha20-Poly1305.
//!
//! Used twice: for message bodies under a per-message key, and for wrapping
//! private keys at rest under the master key. The 16-byte tag is appended
//! to the ciphertext.

use super::KEY_SIZE;
use crate::error::{Error, Result};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce as ChaNonce,
};
use rand::RngCore;
use zeroize::Zeroizing;

/// Size of nonce in bytes (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Size of authentication tag in bytes (128 bits).
pub const TAG_SIZE: usize = 16;

/// A nonce for AEAD encryption.
///
/// Every message key is fresh, so a random nonce never repeats under a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    /// Create a new random nonce.
    pub fn random() -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Parse from a slice, failing on wrong length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; NONCE_SIZE] = bytes
            .try_into()
            .map_err(|_| Error::Encoding(format!("nonce must be {} bytes", NONCE_SIZE)))?;
        Ok(Self(arr))
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}

impl From<[u8; NONCE_SIZE]> for Nonce {
    fn from(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }
}

/// Encrypt plaintext, returning `ciphertext || tag`.
pub fn encrypt(key: &[u8; KEY_SIZE], nonce: &Nonce, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .encrypt(ChaNonce::from_slice(nonce.as_bytes()), plaintext)
        .map_err(|_| Error::Crypto("encryption failed".into()))
}

/// Decrypt `ciphertext || tag`.
///
/// A bad tag, a wrong key or a wrong nonce all surface as
/// [`Error::AuthenticationFailure`].
pub fn decrypt(
    key: &[u8; KEY_SIZE],
    nonce: &Nonce,
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let plaintext = cipher
        .decrypt(ChaNonce::from_slice(nonce.as_bytes()), ciphertext)
        .map_err(|_| Error::AuthenticationFailure)?;
    Ok(Zeroizing::new(plaintext))
}

/// Encrypt with a random nonce, prepending it to output.
///
/// Output format: `nonce (12 bytes) || ciphertext || tag (16 bytes)`
pub fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    let nonce = Nonce::random();
    let ciphertext = encrypt(key, &nonce, plaintext)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(nonce.as_bytes());
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

/// Reverse of [`seal`].
pub fn open(key: &[u8; KEY_SIZE], data: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if data.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::AuthenticationFailure);
    }
    let nonce = Nonce::from_slice(&data[..NONCE_SIZE])?;
    decrypt(key, &nonce, &data[NONCE_SIZE..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let key = [42u8; KEY_SIZE];
        let nonce = Nonce::random();
        let plaintext = b"Hello, Bob!";

        let ciphertext = encrypt(&key, &nonce, plaintext).expect("encrypt");
        assert_eq!(ciphertext.len(), plaintext.len() + TAG_SIZE);

        let decrypted = decrypt(&key, &nonce, &ciphertext).expect("decrypt");
        assert_eq!(&*decrypted, plaintext);
    }

    #[test]
    fn test_wrong_key_is_authentication_failure() {
        let nonce = Nonce::random();
        let ciphertext = encrypt(&[1u8; KEY_SIZE], &nonce, b"secret").expect("encrypt");

        let err = decrypt(&[2u8; KEY_SIZE], &nonce, &ciphertext).unwrap_err();
        assert!(matches!(err, Error::AuthenticationFailure));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = [42u8; KEY_SIZE];
        let nonce = Nonce::random();

        let mut ciphertext = encrypt(&key, &nonce, b"secret").expect("encrypt");
        ciphertext[0] ^= 0x01;

        assert!(matches!(
            decrypt(&key, &nonce, &ciphertext),
            Err(Error::AuthenticationFailure)
        ));
    }

    #[test]
    fn test_seal_open() {
        let key = [7u8; KEY_SIZE];
        let sealed = seal(&key, b"private key pem").expect("seal");
        assert_eq!(sealed.len(), NONCE_SIZE + 15 + TAG_SIZE);

        let opened = open(&key, &sealed).expect("open");
        assert_eq!(&*opened, b"private key pem");
    }

    #[test]
    fn test_open_rejects_short_input() {
        let key = [7u8; KEY_SIZE];
        assert!(open(&key, &[0u8; NONCE_SIZE]).is_err());
    }

    #[test]
    fn test_nonce_from_slice_length() {
        assert!(Nonce::from_slice(&[0u8; NONCE_SIZE]).is_ok());
        assert!(Nonce::from_slice(&[0u8; 8]).is_err());
    }
}
