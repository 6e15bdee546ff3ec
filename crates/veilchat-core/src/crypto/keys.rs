//! RSA identity keys.
//!
//! Each identity is a 2048-bit RSA keypair with public exponent 65537.
//! Keys travel as PEM: SubjectPublicKeyInfo for public keys, PKCS#8 for
//! private keys. The only asymmetric operation is wrapping a 32-byte message
//! key with OAEP/SHA-256.

use crate::error::{Error, Result};
use crate::logging::Redacted;
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{BigUint, Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroizing;

/// Modulus size in bits.
pub const RSA_KEY_BITS: usize = 2048;

/// Public exponent.
pub const RSA_PUBLIC_EXPONENT: u32 = 65537;

/// An RSA public key.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(RsaPublicKey);

impl PublicKey {
    /// Parse an SPKI PEM document.
    pub fn from_pem(pem: &str) -> Result<Self> {
        RsaPublicKey::from_public_key_pem(pem.trim())
            .map(Self)
            .map_err(|e| Error::InvalidKey(e.to_string()))
    }

    /// Encode as an SPKI PEM document.
    pub fn to_pem(&self) -> Result<String> {
        self.0
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| Error::InvalidKey(e.to_string()))
    }

    /// Wrap a short secret with RSA-OAEP/SHA-256.
    pub fn wrap(&self, secret: &[u8]) -> Result<Vec<u8>> {
        self.0
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), secret)
            .map_err(|e| Error::Crypto(format!("key wrap failed: {}", e)))
    }

    /// SHA-256 over the DER encoding, hex encoded.
    pub fn fingerprint(&self) -> Result<String> {
        let der = self
            .0
            .to_public_key_der()
            .map_err(|e| Error::InvalidKey(e.to_string()))?;
        Ok(hex::encode(Sha256::digest(der.as_bytes())))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fingerprint() {
            Ok(fp) => write!(f, "PublicKey({}...)", &fp[..16]),
            Err(_) => write!(f, "PublicKey(<unencodable>)"),
        }
    }
}

/// An RSA private key.
///
/// The underlying key material is zeroized on drop by the `rsa` crate.
#[derive(Clone)]
pub struct PrivateKey(RsaPrivateKey);

impl PrivateKey {
    /// Parse a PKCS#8 PEM document.
    pub fn from_pem(pem: &str) -> Result<Self> {
        RsaPrivateKey::from_pkcs8_pem(pem.trim())
            .map(Self)
            .map_err(|e| Error::InvalidKey(e.to_string()))
    }

    /// Encode as a PKCS#8 PEM document.
    ///
    /// # Security
    /// The result must be wrapped before it touches disk.
    pub fn to_pem(&self) -> Result<Zeroizing<String>> {
        self.0
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| Error::InvalidKey(e.to_string()))
    }

    /// The matching public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.to_public_key())
    }

    /// Unwrap a secret produced by [`PublicKey::wrap`].
    ///
    /// Any failure, including a key mismatch, is [`Error::DecryptionFailure`].
    pub fn unwrap_secret(&self, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        self.0
            .decrypt(Oaep::new::<Sha256>(), wrapped)
            .map(Zeroizing::new)
            .map_err(|_| Error::DecryptionFailure)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PrivateKey").field(&Redacted(())).finish()
    }
}

/// Generate a fresh identity keypair.
pub fn generate_identity() -> Result<(PublicKey, PrivateKey)> {
    let exponent = BigUint::from(RSA_PUBLIC_EXPONENT);
    let private = RsaPrivateKey::new_with_exp(&mut OsRng, RSA_KEY_BITS, &exponent)
        .map_err(|e| Error::Crypto(format!("key generation failed: {}", e)))?;
    let private = PrivateKey(private);
    Ok((private.public_key(), private))
}
