//! VeilChat Relay Server
//!
//! Forwards opaque encrypted packets between authenticated peers.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use veilchat_relay::{data_dir, relay_database_config, serve, RelayState, TlsMode};

/// VeilChat Relay - WebSocket packet broker
#[derive(Parser)]
#[command(name = "veilchat-relay")]
#[command(author, version, about)]
struct Args {
    /// Listen address
    #[arg(short, long, default_value = "0.0.0.0:8765")]
    listen: String,

    /// Directory holding the relay store
    #[arg(long, env = "VEILCHAT_DATA_DIR")]
    data_dir: Option<String>,

    /// PEM certificate chain; serves wss:// together with --keyfile
    #[arg(long, requires = "keyfile")]
    certfile: Option<PathBuf>,

    /// PEM private key for --certfile
    #[arg(long, requires = "certfile")]
    keyfile: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let dir = data_dir(args.data_dir.as_deref());
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create data directory {}", dir.display()))?;

    let tls = TlsMode::from_paths(args.certfile, args.keyfile)?;
    let config = relay_database_config(&dir);
    let state = RelayState::open(&config)
        .with_context(|| format!("failed to open relay store {}", config.path.display()))?;

    tracing::info!(
        address = %args.listen,
        store = %config.path.display(),
        tls = !matches!(tls, TlsMode::Disabled),
        "VeilChat relay started"
    );

    serve(&args.listen, state, &tls).await
}
