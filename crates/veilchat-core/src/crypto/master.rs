//! At-rest protection for identity private keys.
//!
//! A random 256-bit master key is created on first use and kept in its own
//! file. It is never derived from a passphrase: losing the file makes every
//! wrapped private key permanently unrecoverable.

use super::aead::{open, seal};
use super::keys::PrivateKey;
use super::{random_bytes, KEY_SIZE};
use crate::error::{Error, Result};
use crate::logging::Redacted;
use std::fmt;
use std::path::Path;
use zeroize::Zeroizing;

/// Local symmetric key used solely to wrap private keys.
pub struct MasterKey(Zeroizing<[u8; KEY_SIZE]>);

impl MasterKey {
    /// Generate a fresh master key without persisting it.
    pub fn generate() -> Self {
        Self(Zeroizing::new(random_bytes()))
    }

    /// Load the master key from `path`, creating it if the file is absent.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let text = Zeroizing::new(std::fs::read_to_string(path)?);
            let bytes = Zeroizing::new(
                hex::decode(text.trim())
                    .map_err(|_| Error::InvalidKey("master key file is not hex".into()))?,
            );
            let key: [u8; KEY_SIZE] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| Error::InvalidKey("master key has wrong length".into()))?;
            return Ok(Self(Zeroizing::new(key)));
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let key = Self::generate();
        std::fs::write(path, Zeroizing::new(hex::encode(*key.0)))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
        tracing::info!(path = %path.display(), "Created master key");
        Ok(key)
    }

    /// Wrap a private key for storage.
    pub fn wrap_private_key(&self, private_key: &PrivateKey) -> Result<Vec<u8>> {
        let pem = private_key.to_pem()?;
        seal(&self.0, pem.as_bytes())
    }

    /// Recover a private key wrapped by [`MasterKey::wrap_private_key`].
    pub fn unwrap_private_key(&self, blob: &[u8]) -> Result<PrivateKey> {
        let pem = open(&self.0, blob)
            .map_err(|_| Error::Identity("private key does not open under this master key".into()))?;
        let pem = std::str::from_utf8(&pem)
            .map_err(|_| Error::InvalidKey("wrapped private key is not PEM".into()))?;
        PrivateKey::from_pem(pem)
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MasterKey").field(&Redacted(())).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_identity;

    #[test]
    fn test_debug_is_redacted() {
        assert_eq!(format!("{:?}", MasterKey::generate()), "MasterKey([REDACTED])");
    }

    #[test]
    fn test_load_or_create_is_stable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("keys").join("master.key");

        let first = MasterKey::load_or_create(&path).expect("create");
        assert!(path.exists());
        let second = MasterKey::load_or_create(&path).expect("load");
        assert_eq!(*first.0, *second.0);
    }

    #[test]
    fn test_wrap_unwrap_private_key() {
        let master = MasterKey::generate();
        let (public, private) = generate_identity().expect("generate");

        let blob = master.wrap_private_key(&private).expect("wrap");
        let restored = master.unwrap_private_key(&blob).expect("unwrap");
        assert_eq!(restored.public_key(), public);
    }

    #[test]
    fn test_unwrap_with_lost_master_key_fails() {
        let (_, private) = generate_identity().expect("generate");
        let blob = MasterKey::generate().wrap_private_key(&private).expect("wrap");

        assert!(MasterKey::generate().unwrap_private_key(&blob).is_err());
    }

    #[test]
    fn test_corrupt_master_key_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("master.key");
        std::fs::write(&path, "zz").expect("write");

        assert!(matches!(
            MasterKey::load_or_create(&path),
            Err(Error::InvalidKey(_))
        ));
    }
}
