//! Paths and connection defaults.
//!
//! Everything lives under one data directory, chosen by `--data-dir`, else
//! `VEILCHAT_DATA_DIR`, else `~/.veilchat`.

use crate::storage::{DatabaseConfig, DEFAULT_BACKUP_DIR, DEFAULT_DB_NAME};
use std::path::{Path, PathBuf};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "VEILCHAT_DATA_DIR";

/// Data directory used when nothing else is configured.
pub const DEFAULT_DATA_DIR: &str = "~/.veilchat";

/// Default relay host.
pub const DEFAULT_HOST: &str = "localhost";

/// Default local identity name.
pub const DEFAULT_IDENTITY: &str = "me";

/// Master key file name.
pub const MASTER_KEY_FILE: &str = "master.key";

/// Contacts mirror file name.
pub const CONTACTS_JSON_FILE: &str = "contacts.json";

/// Log file name.
pub const LOG_FILE: &str = "veilchat.log";

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// Root of all persisted state.
    pub data_dir: PathBuf,
    /// Relay host.
    pub host: String,
    /// Relay port.
    pub port: u16,
    /// Local identity name.
    pub identity: String,
    /// Reach the relay over `wss://`.
    pub tls: bool,
    /// Accept any relay certificate.
    pub insecure: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new(resolve_data_dir(None))
    }
}

impl ChatConfig {
    /// Defaults rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            host: DEFAULT_HOST.to_string(),
            port: crate::protocol::DEFAULT_PORT,
            identity: DEFAULT_IDENTITY.to_string(),
            tls: false,
            insecure: false,
        }
    }

    /// Store file.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DEFAULT_DB_NAME)
    }

    /// Master key file.
    pub fn master_key_path(&self) -> PathBuf {
        self.data_dir.join(MASTER_KEY_FILE)
    }

    /// Contacts JSON mirror.
    pub fn contacts_json_path(&self) -> PathBuf {
        self.data_dir.join(CONTACTS_JSON_FILE)
    }

    /// Backup directory.
    pub fn backup_dir(&self) -> PathBuf {
        self.data_dir.join(DEFAULT_BACKUP_DIR)
    }

    /// Log file.
    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join(LOG_FILE)
    }

    /// Relay WebSocket URL.
    pub fn relay_url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        format!("{}://{}:{}/", scheme, self.host, self.port)
    }

    /// Store configuration for this data directory.
    pub fn database_config(&self) -> DatabaseConfig {
        DatabaseConfig {
            path: self.db_path(),
            in_memory: false,
            backup_dir: self.backup_dir(),
            contacts_json: Some(self.contacts_json_path()),
        }
    }
}

/// Pick the data directory: explicit flag, environment, then default.
///
/// A leading `~` is expanded.
pub fn resolve_data_dir(flag: Option<&str>) -> PathBuf {
    let env = std::env::var(DATA_DIR_ENV).ok().filter(|v| !v.is_empty());
    let raw = flag.map(str::to_string).or(env).unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
    expand(&raw)
}

fn expand(raw: &str) -> PathBuf {
    Path::new(shellexpand::tilde(raw).as_ref()).to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_under_data_dir() {
        let config = ChatConfig::new("/tmp/vc");
        assert_eq!(config.db_path(), PathBuf::from("/tmp/vc/veilchat.db"));
        assert_eq!(config.master_key_path(), PathBuf::from("/tmp/vc/master.key"));
        assert_eq!(config.contacts_json_path(), PathBuf::from("/tmp/vc/contacts.json"));
        assert_eq!(config.backup_dir(), PathBuf::from("/tmp/vc/backups"));
        assert_eq!(config.log_path(), PathBuf::from("/tmp/vc/veilchat.log"));
    }

    #[test]
    fn test_defaults() {
        let config = ChatConfig::new("/tmp/vc");
        assert_eq!(config.relay_url(), "ws://localhost:8765/");
        assert_eq!(config.identity, "me");
    }

    #[test]
    fn test_tls_switches_scheme() {
        let mut config = ChatConfig::new("/tmp/vc");
        config.tls = true;
        config.host = "relay.example".into();
        assert_eq!(config.relay_url(), "wss://relay.example:8765/");
    }

    #[test]
    fn test_flag_wins() {
        assert_eq!(resolve_data_dir(Some("/srv/chat")), PathBuf::from("/srv/chat"));
    }

    #[test]
    fn test_tilde_expanded() {
        assert!(!resolve_data_dir(Some("~/x")).to_string_lossy().starts_with('~'));
    }
}
