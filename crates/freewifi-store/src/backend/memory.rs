//! In-process real-time store.
//!
//! Keeps every collection in memory, bumps a revision counter on each
//! committed transaction and pushes the full result set of every standing
//! query after each change. Nothing survives a restart: the server uses it
//! only when asked to, for local runs. Tests use it directly, together with
//! its fault switches, to exercise the failure paths of the client layer.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use freewifi_shared::constants::DEFAULT_FEED_CAPACITY;
use freewifi_shared::schema::CollectionDef;
use serde_json::{Map, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    BackendStatus, Query, QueryFeed, QueryResponse, RemoteStore, StoredRecord, Transaction,
    TxReceipt, TxStep,
};
use crate::error::TransportError;

type Collection = BTreeMap<Uuid, Map<String, Value>>;

#[derive(Default)]
struct State {
    revision: u64,
    collections: HashMap<String, Collection>,
}

#[derive(Default)]
struct Faults {
    next_write: Option<String>,
    reads: Option<String>,
}

/// State shared with the standing-query tasks.
struct Shared {
    state: RwLock<State>,
    /// Mirror of `State::revision` readable without the lock.
    revision: AtomicU64,
    changes: broadcast::Sender<u64>,
    shutdown: broadcast::Sender<()>,
    faults: Mutex<Faults>,
    closed: AtomicBool,
    writable: AtomicBool,
    open_feeds: AtomicUsize,
}

impl Shared {
    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn read(&self, query: &Query) -> QueryResponse {
        let state = self.state.read().await;
        let revision = state.revision;

        let read_fault = self.faults().reads.clone();
        if let Some(reason) = read_fault {
            return QueryResponse {
                revision,
                result: Err(reason),
            };
        }

        let records = state
            .collections
            .get(&query.collection)
            .map(|collection| {
                collection
                    .iter()
                    .map(|(id, attrs)| StoredRecord {
                        id: *id,
                        attrs: attrs.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        QueryResponse {
            revision,
            result: Ok(records),
        }
    }

    /// Wake every standing query without changing data.
    fn poke(&self) {
        let _ = self.changes.send(self.revision.load(Ordering::SeqCst));
    }
}

pub struct MemoryStore {
    shared: Arc<Shared>,
    schemas: HashMap<&'static str, &'static CollectionDef>,
    feed_capacity: usize,
    write_latency: Duration,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        let (shutdown, _) = broadcast::channel(1);

        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(State::default()),
                revision: AtomicU64::new(0),
                changes,
                shutdown,
                faults: Mutex::new(Faults::default()),
                closed: AtomicBool::new(false),
                writable: AtomicBool::new(true),
                open_feeds: AtomicUsize::new(0),
            }),
            schemas: HashMap::new(),
            feed_capacity: DEFAULT_FEED_CAPACITY,
            write_latency: Duration::ZERO,
        }
    }

    /// Enforce `schema` on every create into its collection. Collections
    /// without a registered schema accept any attributes.
    pub fn with_schema(mut self, schema: &'static CollectionDef) -> Self {
        self.schemas.insert(schema.name, schema);
        self
    }

    pub fn with_feed_capacity(mut self, capacity: usize) -> Self {
        self.feed_capacity = capacity.max(1);
        self
    }

    /// Delay applied before each transaction, as a slow link would.
    pub fn with_write_latency(mut self, latency: Duration) -> Self {
        self.write_latency = latency;
        self
    }

    // -- fault switches --

    /// Fail the next transaction as if the network dropped it.
    pub fn fail_next_write(&self, reason: impl Into<String>) {
        self.shared.faults().next_write = Some(reason.into());
    }

    /// Make every read fail until [`Self::restore_reads`]. Standing queries
    /// are woken so they observe the failure right away.
    pub fn fail_reads(&self, reason: impl Into<String>) {
        self.shared.faults().reads = Some(reason.into());
        self.shared.poke();
    }

    pub fn restore_reads(&self) {
        self.shared.faults().reads = None;
        self.shared.poke();
    }

    pub fn set_writable(&self, writable: bool) {
        self.shared.writable.store(writable, Ordering::SeqCst);
    }

    // -- inspection --

    /// Number of standing queries currently being served.
    pub fn open_feeds(&self) -> usize {
        self.shared.open_feeds.load(Ordering::SeqCst)
    }

    pub async fn count(&self, collection: &str) -> usize {
        let state = self.shared.state.read().await;
        state.collections.get(collection).map_or(0, |c| c.len())
    }

    pub async fn get(&self, collection: &str, id: Uuid) -> Option<Map<String, Value>> {
        let state = self.shared.state.read().await;
        state.collections.get(collection)?.get(&id).cloned()
    }

    /// Load records as-is, bypassing schema checks. Used to seed data written
    /// by older clients.
    pub async fn import(&self, collection: &str, records: Vec<StoredRecord>) -> u64 {
        let mut state = self.shared.state.write().await;
        let target = state.collections.entry(collection.to_string()).or_default();
        for record in records {
            target.insert(record.id, record.attrs);
        }
        state.revision += 1;
        let revision = state.revision;
        self.shared.revision.store(revision, Ordering::SeqCst);
        drop(state);

        let _ = self.shared.changes.send(revision);
        revision
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    /// Check every step against current state before anything is applied.
    fn check(&self, state: &State, tx: &Transaction) -> Result<(), TransportError> {
        if tx.steps.is_empty() {
            return Err(TransportError::Rejected("empty transaction".into()));
        }

        let mut seen = HashSet::new();
        for step in &tx.steps {
            let TxStep::Create {
                collection,
                id,
                attrs,
            } = step;

            if let Some(schema) = self.schemas.get(collection.as_str()) {
                schema
                    .check(attrs)
                    .map_err(|e| TransportError::Rejected(e.to_string()))?;
            }

            let exists = state
                .collections
                .get(collection)
                .is_some_and(|c| c.contains_key(id));
            if exists || !seen.insert((collection.as_str(), *id)) {
                return Err(TransportError::Conflict {
                    collection: collection.clone(),
                    id: *id,
                });
            }
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn transact(&self, tx: Transaction) -> Result<TxReceipt, TransportError> {
        self.ensure_open()?;

        if !self.write_latency.is_zero() {
            tokio::time::sleep(self.write_latency).await;
            self.ensure_open()?;
        }

        if !self.shared.writable.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("store is read-only".into()));
        }

        let write_fault = self.shared.faults().next_write.take();
        if let Some(reason) = write_fault {
            warn!(reason = %reason, "Dropping transaction (injected fault)");
            return Err(TransportError::Unavailable(reason));
        }

        let mut state = self.shared.state.write().await;
        self.check(&state, &tx)?;

        for step in tx.steps {
            let TxStep::Create {
                collection,
                id,
                attrs,
            } = step;
            state.collections.entry(collection).or_default().insert(id, attrs);
        }

        state.revision += 1;
        let revision = state.revision;
        self.shared.revision.store(revision, Ordering::SeqCst);
        drop(state);

        debug!(revision, "Transaction committed");
        let _ = self.shared.changes.send(revision);

        Ok(TxReceipt { revision })
    }

    async fn subscribe_query(&self, query: Query) -> Result<QueryFeed, TransportError> {
        self.ensure_open()?;

        let (tx, rx) = mpsc::channel(self.feed_capacity);
        let mut changes = self.shared.changes.subscribe();
        let mut shutdown = self.shared.shutdown.subscribe();
        // close() may have run between the first check and the subscribes
        self.ensure_open()?;

        let shared = Arc::clone(&self.shared);
        shared.open_feeds.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            debug!(collection = %query.collection, "Standing query opened");

            loop {
                let response = shared.read(&query).await;
                tokio::select! {
                    sent = tx.send(response) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                    _ = shutdown.recv() => break,
                }

                tokio::select! {
                    _ = tx.closed() => break,
                    _ = shutdown.recv() => break,
                    change = changes.recv() => match change {
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(skipped, "Standing query lagged, re-reading");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }

            shared.open_feeds.fetch_sub(1, Ordering::SeqCst);
            debug!(collection = %query.collection, "Standing query released");
        });

        Ok(rx)
    }

    fn status(&self) -> BackendStatus {
        let connected = !self.shared.closed.load(Ordering::SeqCst);
        BackendStatus {
            connected,
            readable: connected && self.shared.faults().reads.is_none(),
            writable: connected && self.shared.writable.load(Ordering::SeqCst),
            revision: self.shared.revision.load(Ordering::SeqCst),
        }
    }

    async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shared.shutdown.send(());
        info!("Memory store closed");
    }
}
