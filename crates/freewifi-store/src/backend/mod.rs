//! Transport to the remote real-time store.
//!
//! The store owns record identity and lifetime. A transport exposes exactly
//! what the client layer needs: atomic transactions, standing queries that
//! push the full result set on every change, and a status check.

pub mod instant;
pub mod memory;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::TransportError;

/// One record as held by the store: an id and a schemaless attribute map.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: Uuid,
    pub attrs: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TxStep {
    /// Insert a new record. Fails the whole transaction if `id` exists.
    Create {
        collection: String,
        id: Uuid,
        attrs: Map<String, Value>,
    },
}

/// Steps applied all together or not at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transaction {
    pub steps: Vec<TxStep>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        mut self,
        collection: impl Into<String>,
        id: Uuid,
        attrs: Map<String, Value>,
    ) -> Self {
        self.steps.push(TxStep::Create {
            collection: collection.into(),
            id,
            attrs,
        });
        self
    }
}

/// Acknowledgement of a committed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    /// Store revision the transaction produced.
    pub revision: u64,
}

/// A standing query over one whole collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub collection: String,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
        }
    }
}

/// One push from a standing query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResponse {
    /// Store revision the result reflects. Never decreases on a healthy feed.
    pub revision: u64,
    pub result: Result<Vec<StoredRecord>, String>,
}

/// Receiving end of a standing query. Dropping it releases the query.
pub type QueryFeed = mpsc::Receiver<QueryResponse>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendStatus {
    pub connected: bool,
    pub readable: bool,
    pub writable: bool,
    pub revision: u64,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Apply every step of `tx` atomically.
    async fn transact(&self, tx: Transaction) -> Result<TxReceipt, TransportError>;

    /// Open a standing query. The first response carries the current result
    /// set; each later one follows a change.
    async fn subscribe_query(&self, query: Query) -> Result<QueryFeed, TransportError>;

    fn status(&self) -> BackendStatus;

    /// Stop serving. Open feeds end and later calls fail with
    /// [`TransportError::Closed`].
    async fn close(&self);
}
