//! Live query over the `networks` collection.
//!
//! [`StoreClient::subscribe`] opens a standing query and returns a
//! [`NetworkSubscription`], a `Stream` of full-collection [`Snapshot`]s. The
//! first item is the current membership; each later item follows a change
//! in the store. A pump task per subscription sits between the transport
//! feed and the consumer. It drops responses older than what was already
//! delivered and applies the configured [`ReadErrorPolicy`].
//!
//! Cancelling through [`Unsubscribe`] (or dropping the subscription) stops
//! delivery at once and releases the standing query, whether or not the
//! consumer is currently polling.

use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::task::{Context, Poll};

use freewifi_shared::{Network, NetworkId, NETWORKS};
use futures::Stream;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{Query, QueryFeed, QueryResponse, StoredRecord};
use crate::client::StoreClient;
use crate::config::ReadErrorPolicy;
use crate::error::SubscriptionError;

/// Complete membership of the collection at one store revision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub revision: u64,
    /// Oldest first.
    pub networks: Vec<Network>,
}

impl Snapshot {
    pub fn empty(revision: u64) -> Self {
        Self {
            revision,
            networks: Vec::new(),
        }
    }

    /// Decode stored records. Unusable attribute values read as their
    /// schema default; only a record without a usable `ssid` is skipped.
    pub fn from_records(revision: u64, records: Vec<StoredRecord>) -> Self {
        let mut networks: Vec<Network> = records
            .into_iter()
            .filter_map(|record| match Network::decode(NetworkId(record.id), &record.attrs) {
                Ok((network, replaced)) => {
                    if !replaced.is_empty() {
                        warn!(
                            id = %record.id,
                            attributes = ?replaced,
                            "Network record has unusable values, reading defaults"
                        );
                    }
                    Some(network)
                }
                Err(e) => {
                    warn!(id = %record.id, error = %e, "Skipping undecodable network record");
                    None
                }
            })
            .collect();
        networks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        Self { revision, networks }
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    pub fn get(&self, id: NetworkId) -> Option<&Network> {
        self.networks.iter().find(|n| n.id == id)
    }
}

/// Cancellation handle for a subscription. Cheap to clone; every clone
/// cancels the same subscription.
#[derive(Debug, Clone)]
pub struct Unsubscribe {
    id: Uuid,
    cancel: Arc<watch::Sender<bool>>,
}

impl Unsubscribe {
    /// Stop delivery and release the standing query. Further calls are
    /// no-ops.
    pub fn unsubscribe(&self) {
        if !self.cancel.send_replace(true) {
            info!(subscription = %self.id, "Unsubscribed from networks");
        }
    }

    pub fn is_unsubscribed(&self) -> bool {
        *self.cancel.borrow()
    }
}

/// Stream of network snapshots. Ends only when cancelled, when the client
/// closes, or when the transport drops the query.
///
/// With [`ReadErrorPolicy::DeliverEmpty`] read errors show up as empty
/// snapshots and the stream never yields `Err`; with
/// [`ReadErrorPolicy::Surface`] they arrive as
/// `Err(SubscriptionError::Read)` and the stream carries on.
#[derive(Debug)]
pub struct NetworkSubscription {
    snapshots: mpsc::Receiver<Result<Snapshot, SubscriptionError>>,
    handle: Unsubscribe,
}

impl NetworkSubscription {
    pub fn id(&self) -> Uuid {
        self.handle.id
    }

    pub fn unsubscribe_handle(&self) -> Unsubscribe {
        self.handle.clone()
    }

    pub fn unsubscribe(&self) {
        self.handle.unsubscribe();
    }
}

impl Stream for NetworkSubscription {
    type Item = Result<Snapshot, SubscriptionError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.handle.is_unsubscribed() {
            return Poll::Ready(None);
        }
        self.snapshots.poll_recv(cx)
    }
}

impl Drop for NetworkSubscription {
    fn drop(&mut self) {
        self.handle.unsubscribe();
    }
}

impl StoreClient {
    /// Open a live query over every network.
    pub async fn subscribe(&self) -> Result<NetworkSubscription, SubscriptionError> {
        if self.is_closed() {
            return Err(SubscriptionError::Closed);
        }

        let feed = self
            .backend
            .subscribe_query(Query::collection(NETWORKS.name))
            .await?;

        let id = Uuid::new_v4();
        let (out, snapshots) = mpsc::channel(self.config.feed_capacity.max(1));
        let (cancel, cancel_rx) = watch::channel(false);

        let pump = Pump {
            id,
            feed,
            out,
            cancel: cancel_rx,
            shutdown: self.shutdown.subscribe(),
            policy: self.config.read_error_policy,
            last_revision: None,
            degraded: false,
        };

        let active = Arc::clone(&self.active_subscriptions);
        active.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            pump.run().await;
            active.fetch_sub(1, Ordering::SeqCst);
        });

        info!(subscription = %id, "Subscribed to networks");

        Ok(NetworkSubscription {
            snapshots,
            handle: Unsubscribe {
                id,
                cancel: Arc::new(cancel),
            },
        })
    }
}

/// Moves responses from the transport feed to the subscriber.
struct Pump {
    id: Uuid,
    feed: QueryFeed,
    out: mpsc::Sender<Result<Snapshot, SubscriptionError>>,
    cancel: watch::Receiver<bool>,
    shutdown: watch::Receiver<bool>,
    policy: ReadErrorPolicy,
    /// Revision of the last snapshot delivered from real data.
    last_revision: Option<u64>,
    /// An error tick was delivered since the last real snapshot.
    degraded: bool,
}

impl Pump {
    async fn run(mut self) {
        loop {
            if *self.cancel.borrow() || *self.shutdown.borrow() {
                break;
            }

            let response = tokio::select! {
                _ = cancelled(&mut self.cancel) => break,
                _ = closed(&mut self.shutdown) => break,
                response = self.feed.recv() => match response {
                    Some(response) => response,
                    None => {
                        debug!(subscription = %self.id, "Standing query ended by store");
                        break;
                    }
                },
            };

            let Some(item) = self.process(response) else {
                continue;
            };

            tokio::select! {
                _ = cancelled(&mut self.cancel) => break,
                _ = closed(&mut self.shutdown) => break,
                sent = self.out.send(item) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }

        // feed drops here, releasing the standing query
        debug!(subscription = %self.id, "Subscription pump stopped");
    }

    fn process(&mut self, response: QueryResponse) -> Option<Result<Snapshot, SubscriptionError>> {
        let revision = response.revision;

        match response.result {
            Ok(records) => {
                if let Some(last) = self.last_revision {
                    if revision < last || (revision == last && !self.degraded) {
                        debug!(
                            subscription = %self.id,
                            revision,
                            last,
                            "Dropping stale or repeated snapshot"
                        );
                        return None;
                    }
                }
                self.last_revision = Some(revision);
                self.degraded = false;

                let snapshot = Snapshot::from_records(revision, records);
                debug!(
                    subscription = %self.id,
                    revision,
                    networks = snapshot.len(),
                    "Delivering snapshot"
                );
                Some(Ok(snapshot))
            }
            Err(reason) => {
                warn!(subscription = %self.id, error = %reason, "Error fetching networks");
                self.degraded = true;

                match self.policy {
                    ReadErrorPolicy::DeliverEmpty => Some(Ok(Snapshot::empty(
                        revision.max(self.last_revision.unwrap_or(0)),
                    ))),
                    ReadErrorPolicy::Surface => Some(Err(SubscriptionError::Read(reason))),
                }
            }
        }
    }
}

/// Resolves once the subscription is cancelled or its handle is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|cancelled| *cancelled).await;
}

/// Resolves once the client is closed. A client dropped without `close`
/// leaves its subscriptions running.
async fn closed(shutdown: &mut watch::Receiver<bool>) {
    let signalled = shutdown.wait_for(|closed| *closed).await.is_ok();
    if !signalled {
        std::future::pending::<()>().await;
    }
}
