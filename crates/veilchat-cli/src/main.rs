//! VeilChat Command-Line Interface
//!
//! A terminal chat client for end-to-end encrypted messaging through a relay.
//! The local identity is generated on first run.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use veilchat_core::config::{resolve_data_dir, ChatConfig, DEFAULT_HOST, DEFAULT_IDENTITY};

mod commands;

/// VeilChat - End-to-end encrypted chat over a WebSocket relay
#[derive(Parser)]
#[command(name = "veilchat")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Data directory path
    #[arg(short, long, env = "VEILCHAT_DATA_DIR")]
    data_dir: Option<String>,

    /// Local identity name
    #[arg(short, long, default_value = DEFAULT_IDENTITY)]
    name: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the interactive chat shell
    Chat {
        /// Connect to the relay instead of simulating delivery
        #[arg(short, long)]
        connect: bool,

        /// Relay host
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,

        /// Relay port
        #[arg(long, default_value_t = veilchat_core::protocol::DEFAULT_PORT)]
        port: u16,

        /// Connect over wss://
        #[arg(long)]
        wss: bool,

        /// Accept a self-signed relay certificate
        #[arg(long, requires = "wss")]
        insecure: bool,
    },

    /// Add a contact
    AddContact {
        /// Contact name
        name: String,

        /// PEM file with the contact's public key; a fresh key is generated if omitted
        #[arg(long)]
        public_key: Option<PathBuf>,
    },

    /// List contacts
    Contacts,

    /// Delete a contact and its history
    DeleteContact {
        /// Contact name
        name: String,
    },

    /// Show chat history with a contact
    History {
        /// Contact name
        name: String,

        /// Only show messages containing this text
        search: Option<String>,
    },

    /// Delete all messages exchanged with a contact
    ClearHistory {
        /// Contact name
        name: String,
    },

    /// Replace the local keypair
    GenerateKeys,

    /// Write a timestamped copy of the store
    Backup,

    /// Replace the store with a backup
    Restore {
        /// Backup file
        path: PathBuf,
    },

    /// Merge contacts from a JSON mirror file
    ImportContacts {
        /// JSON file
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ChatConfig::new(resolve_data_dir(cli.data_dir.as_deref()));
    config.identity = cli.name;
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create data directory {}", config.data_dir.display()))?;

    // Logs go to a file so the chat display stays clean
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(config.log_path())
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(log_file))
        .init();

    let command = cli.command.unwrap_or(Commands::Chat {
        connect: false,
        host: DEFAULT_HOST.to_string(),
        port: veilchat_core::protocol::DEFAULT_PORT,
        wss: false,
        insecure: false,
    });

    match command {
        Commands::Chat {
            connect,
            host,
            port,
            wss,
            insecure,
        } => {
            config.host = host;
            config.port = port;
            config.tls = wss;
            config.insecure = insecure;
            commands::chat(&config, connect).await?;
        }
        Commands::AddContact { name, public_key } => {
            commands::add_contact(&config, &name, public_key.as_deref()).await?;
        }
        Commands::Contacts => {
            commands::list_contacts(&config).await?;
        }
        Commands::DeleteContact { name } => {
            commands::delete_contact(&config, &name).await?;
        }
        Commands::History { name, search } => {
            commands::show_history(&config, &name, search.as_deref()).await?;
        }
        Commands::ClearHistory { name } => {
            commands::clear_history(&config, &name).await?;
        }
        Commands::GenerateKeys => {
            commands::generate_keys(&config).await?;
        }
        Commands::Backup => {
            commands::backup(&config).await?;
        }
        Commands::Restore { path } => {
            commands::restore(&config, &path).await?;
        }
        Commands::ImportContacts { path } => {
            commands::import_contacts(&config, &path).await?;
        }
    }

    Ok(())
}
