//! IPTV Manager
//! Playlist and subscriber backend: imports M3U sources into a shared channel
//! catalogue and serves per-user playlists to player apps.

// Use mimalloc for faster memory allocation (Linux, macOS)
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod config;
mod error;
mod fetcher;
mod importer;
mod logging;
mod m3u_parser;
mod m3u_writer;
mod models;
mod server;
mod store;

use config::AppConfig;
use server::AppState;
use store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("failed to load configuration")?;
    logging::init_logging(&config.log_level);

    let addr = config.socket_addr()?;
    let store = Store::open(&config.db_path)
        .with_context(|| format!("failed to open database {}", config.db_path.display()))?;

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let state = AppState::new(store, config, shutdown);
    server::run_server(state, addr).await.context("server failed")?;

    info!("Stopped");
    Ok(())
}

/// Cancel `token` on the first SIGINT (Ctrl+C) or SIGTERM
async fn cancel_on_signal(token: CancellationToken) {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!("Ctrl+C received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
    }
    token.cancel();
}
