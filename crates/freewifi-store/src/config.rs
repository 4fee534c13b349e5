//! Store client configuration.

use freewifi_shared::constants::{DEFAULT_APP_ID, DEFAULT_FEED_CAPACITY};
use uuid::Uuid;

/// What a subscription does when the store reports a read error.
///
/// Either way the subscription stays open and keeps delivering once reads
/// succeed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadErrorPolicy {
    /// Log the error and deliver an empty snapshot for that tick.
    #[default]
    DeliverEmpty,
    /// Deliver the error as an `Err` item.
    Surface,
}

impl ReadErrorPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "empty" | "deliver-empty" => Some(Self::DeliverEmpty),
            "surface" | "error" => Some(Self::Surface),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Application the records belong to on the remote store.
    pub app_id: Uuid,
    pub read_error_policy: ReadErrorPolicy,
    /// Snapshots buffered per subscription before the pump waits for the
    /// consumer.
    pub feed_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            app_id: Uuid::parse_str(DEFAULT_APP_ID).unwrap_or_else(|_| Uuid::nil()),
            read_error_policy: ReadErrorPolicy::default(),
            feed_capacity: DEFAULT_FEED_CAPACITY,
        }
    }
}
