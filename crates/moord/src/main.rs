//! moord: the Moorage metadata store daemon.
//!
//! Opens the redb-backed metadata store and serves it over gRPC. Every
//! other control-plane process reaches the store through
//! `moorage_metastore::StoreClient`.
//!
//! # Usage
//!
//! ```text
//! moord serve --listen 0.0.0.0:27030 --data-dir /var/lib/moorage
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use moorage_metastore::{DbStore, StoreServer};

#[derive(Parser)]
#[command(name = "moord", about = "Moorage metadata store daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the metadata store over gRPC.
    Serve {
        /// Address to listen on.
        #[arg(long, default_value = "0.0.0.0:27030")]
        listen: SocketAddr,

        /// Data directory for the metadata database.
        #[arg(long, default_value = "/var/lib/moorage")]
        data_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,moord=debug,moorage_metastore=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { listen, data_dir } => serve(listen, data_dir).await,
    }
}

async fn serve(listen: SocketAddr, data_dir: PathBuf) -> anyhow::Result<()> {
    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("metastore.redb");
    let store = DbStore::open(&db_path)
        .map_err(|e| anyhow::anyhow!("open metadata store at {}: {e}", db_path.display()))?;
    info!(path = ?db_path, "metadata store opened");

    let service = StoreServer::new(Arc::new(store)).into_service();
    info!(%listen, "metadata gRPC server starting");
    tonic::transport::Server::builder()
        .add_service(service)
        .serve(listen)
        .await?;
    Ok(())
}
