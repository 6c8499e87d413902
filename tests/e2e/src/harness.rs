//! Test relay lifecycle and shared helpers.
//!
//! [`TestRelay`] runs a [`SyncRelay`] on an ephemeral loopback port for the
//! duration of a test and hands out [`RelayTransport`] clients for it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sync_relay::config::Config;
use sync_relay::error::StorageError;
use sync_relay::server::SyncRelay;
use sync_relay::storage::SqliteStorage;
use tempfile::TempDir;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

use crate::relay_transport::RelayTransport;

/// Errors starting a test relay.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Relay storage could not be opened.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Listener could not be bound.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Install a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`, defaulting to warnings only.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

/// A relay serving on `127.0.0.1` until dropped.
pub struct TestRelay {
    addr: SocketAddr,
    relay: Arc<SyncRelay>,
    server: JoinHandle<()>,
    // Keeps the database file alive
    _dir: Option<TempDir>,
}

impl TestRelay {
    /// Relay backed by an in-memory database.
    pub async fn start() -> Result<Self, HarnessError> {
        Self::start_with(Config::default(), SqliteStorage::in_memory().await?, None).await
    }

    /// Relay backed by a database file in a fresh temporary directory.
    pub async fn start_on_disk() -> Result<Self, HarnessError> {
        let dir = tempfile::tempdir()?;
        let storage = SqliteStorage::new(&dir.path().join("relay.db")).await?;
        Self::start_with(Config::default(), storage, Some(dir)).await
    }

    /// Relay with an explicit configuration.
    pub async fn start_with_config(config: Config) -> Result<Self, HarnessError> {
        Self::start_with(config, SqliteStorage::in_memory().await?, None).await
    }

    async fn start_with(
        config: Config,
        storage: SqliteStorage,
        dir: Option<TempDir>,
    ) -> Result<Self, HarnessError> {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let relay = Arc::new(SyncRelay::new(config, storage));

        let server = {
            let relay = Arc::clone(&relay);
            tokio::spawn(async move {
                if let Err(e) = relay.serve(listener).await {
                    tracing::error!(error = %e, "test relay stopped");
                }
            })
        };

        Ok(Self {
            addr,
            relay,
            server,
            _dir: dir,
        })
    }

    /// Address the relay listens on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The relay itself, for inspecting storage and metrics.
    pub fn relay(&self) -> &Arc<SyncRelay> {
        &self.relay
    }

    /// A new, unconnected client.
    pub fn client(&self) -> RelayTransport {
        RelayTransport::new(self.addr)
    }
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Poll `check` every 10ms until it holds or `timeout` passes.
///
/// Returns whether the condition was reached.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
