//! sealed-sync-relay binary entry point.
//!
//! Usage:
//! ```bash
//! sealed-sync-relay --config relay.toml
//! ```

use sealed_sync_relay::config::Config;
use sealed_sync_relay::error::RelayError;
use sealed_sync_relay::server::SyncRelay;
use sealed_sync_relay::storage::SqliteStorage;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// How often idle rate-limiter entries are evicted.
const LIMITER_SHRINK_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), RelayError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = get_config_path();
    let config = if path.exists() {
        Config::from_file(&path)?
    } else {
        tracing::warn!(path = %path.display(), "config file not found, using defaults");
        Config::default()
    };

    let storage = SqliteStorage::new(&config.storage.database).await?;
    let listener = TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.server.bind_address,
        database = %config.storage.database.display(),
        "starting relay"
    );

    let relay = Arc::new(SyncRelay::new(config, storage));

    let shrinker = {
        let relay = Arc::clone(&relay);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(LIMITER_SHRINK_INTERVAL);
            loop {
                interval.tick().await;
                relay.rate_limits().shrink();
            }
        })
    };

    let result = tokio::select! {
        result = Arc::clone(&relay).serve(listener) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
            Ok(())
        }
    };

    shrinker.abort();
    relay.storage().close().await;
    result
}

fn get_config_path() -> PathBuf {
    std::env::args()
        .skip_while(|arg| arg != "--config")
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("relay.toml"))
}
