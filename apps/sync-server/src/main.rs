//! Real-time file synchronization server
//! Clients connect over WebSocket, identify with a user id and exchange JSON frames

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use sync_engine::{
    Collaborators, DirectoryWorkspace, GitVersionControl, MemoryStore, MemoryVersionControl,
    SyncConfig, SyncCoordinator, VersionControl,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod connection;
mod protocol;

#[derive(Parser, Debug)]
#[command(name = "sync-server")]
#[command(about = "Shares a directory between users editing it in real time")]
#[command(version)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "SYNC_ADDR", default_value = "127.0.0.1:8765")]
    addr: SocketAddr,

    /// Directory holding the shared files
    #[arg(long, env = "SYNC_ROOT", default_value = ".")]
    root: PathBuf,

    /// JSON coordinator settings
    #[arg(long, env = "SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Commit each user's changes to a branch of a git repository at the root
    #[arg(long, env = "SYNC_GIT")]
    git: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "sync_server=info,sync_engine=info")]
    log: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log)),
        )
        .init();

    let config = match &args.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };

    let version_control: Arc<dyn VersionControl> = if args.git {
        info!("Committing to git repository at {}", args.root.display());
        Arc::new(
            GitVersionControl::open_or_init(&args.root)?
                .with_email_domain(config.commit_email_domain.clone()),
        )
    } else {
        Arc::new(MemoryVersionControl::new())
    };

    let collaborators = Collaborators::new(
        Arc::new(MemoryStore::new()),
        version_control,
        Arc::new(DirectoryWorkspace::new(&args.root)),
    );
    let coordinator = Arc::new(SyncCoordinator::new(config, collaborators)?);

    let listener = TcpListener::bind(args.addr).await?;
    info!(
        "Sync server listening on ws://{} for {}",
        args.addr,
        args.root.display()
    );

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    info!("New connection from: {}", addr);
                    tokio::spawn(connection::handle_connection(stream, addr, coordinator.clone()));
                }
                Err(e) => error!("Failed to accept connection: {}", e),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    match Arc::try_unwrap(coordinator) {
        Ok(coordinator) => coordinator.shutdown().await,
        Err(_) => warn!("Connections still open, not waiting for queued operations"),
    }

    Ok(())
}
