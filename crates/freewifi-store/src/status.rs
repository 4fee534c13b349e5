//! Read-only diagnostics.

use std::sync::atomic::Ordering;

use serde::Serialize;
use uuid::Uuid;

use crate::client::StoreClient;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStatus {
    pub app_id: Uuid,
    /// Client open and transport connected.
    pub initialized: bool,
    pub closed: bool,
    pub can_read: bool,
    pub can_write: bool,
    pub active_subscriptions: usize,
    /// Latest store revision the transport knows of.
    pub revision: u64,
}

impl StoreClient {
    pub fn status(&self) -> StoreStatus {
        let backend = self.backend.status();
        let closed = self.is_closed();
        let initialized = !closed && backend.connected;

        StoreStatus {
            app_id: self.config.app_id,
            initialized,
            closed,
            can_read: initialized && backend.readable,
            can_write: initialized && backend.writable,
            active_subscriptions: self.active_subscriptions.load(Ordering::SeqCst),
            revision: backend.revision,
        }
    }
}
