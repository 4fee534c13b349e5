//! Store client handle.
//!
//! The [`StoreClient`] is built once, explicitly, around a transport and
//! shared (usually behind an `Arc`) with every component that reads or
//! writes networks. It is the only path to the store; there is no global
//! connection. [`StoreClient::close`] ends its lifetime: subscriptions stop
//! and later writes fail with [`crate::MutationError::Closed`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::backend::RemoteStore;
use crate::config::StoreConfig;

pub struct StoreClient {
    pub(crate) backend: Arc<dyn RemoteStore>,
    pub(crate) config: StoreConfig,
    closed: AtomicBool,
    /// Flips to `true` on close; every subscription pump watches it.
    pub(crate) shutdown: watch::Sender<bool>,
    pub(crate) active_subscriptions: Arc<AtomicUsize>,
}

impl StoreClient {
    pub fn connect(backend: Arc<dyn RemoteStore>, config: StoreConfig) -> Self {
        let (shutdown, _) = watch::channel(false);

        info!(
            app_id = %config.app_id,
            read_error_policy = ?config.read_error_policy,
            "Store client connected"
        );

        Self {
            backend,
            config,
            closed: AtomicBool::new(false),
            shutdown,
            active_subscriptions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the client and the transport it owns. Calling it again is a
    /// no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.send_replace(true);
        self.backend.close().await;
        info!(app_id = %self.config.app_id, "Store client closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryStore;

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let client = StoreClient::connect(store.clone(), StoreConfig::default());
        assert!(!client.is_closed());

        client.close().await;
        client.close().await;

        assert!(client.is_closed());
        assert!(*client.shutdown.borrow());
        assert!(!store.status().connected);
    }
}
