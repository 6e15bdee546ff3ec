//! TLS configuration for the relay listener.

use axum_server::tls_rustls::RustlsConfig;
use std::path::PathBuf;
use tracing::info;

/// How the relay listener is secured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsMode {
    /// Plain `ws://`.
    #[default]
    Disabled,
    /// `wss://` with a PEM certificate chain and private key.
    Custom {
        /// Certificate chain file.
        cert_path: PathBuf,
        /// Private key file.
        key_path: PathBuf,
    },
}

impl TlsMode {
    /// Build from optional `--certfile`/`--keyfile` values.
    pub fn from_paths(cert: Option<PathBuf>, key: Option<PathBuf>) -> Result<Self, TlsConfigError> {
        match (cert, key) {
            (None, None) => Ok(TlsMode::Disabled),
            (Some(cert_path), Some(key_path)) => Ok(TlsMode::Custom { cert_path, key_path }),
            _ => Err(TlsConfigError::Incomplete),
        }
    }

    /// Load the rustls server config, or `None` when TLS is disabled.
    pub async fn to_rustls_config(&self) -> Result<Option<RustlsConfig>, TlsConfigError> {
        match self {
            TlsMode::Disabled => Ok(None),
            TlsMode::Custom { cert_path, key_path } => {
                let cert = std::fs::read(cert_path).map_err(|e| {
                    TlsConfigError::FileRead(format!("Failed to read cert {}: {}", cert_path.display(), e))
                })?;
                let key = std::fs::read(key_path).map_err(|e| {
                    TlsConfigError::FileRead(format!("Failed to read key {}: {}", key_path.display(), e))
                })?;
                let config = RustlsConfig::from_pem(cert, key)
                    .await
                    .map_err(|e| TlsConfigError::Invalid(e.to_string()))?;

                info!(
                    cert = %cert_path.display(),
                    key = %key_path.display(),
                    "TLS enabled"
                );
                Ok(Some(config))
            }
        }
    }
}

/// TLS configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum TlsConfigError {
    #[error("--certfile and --keyfile must be given together")]
    Incomplete,

    #[error("File read error: {0}")]
    FileRead(String),

    #[error("Invalid certificate or key: {0}")]
    Invalid(String),
}
