//! HTTP transport to a hosted InstantDB app.
//!
//! Writes go through the admin `transact` endpoint and reads through the
//! admin `query` endpoint, both scoped to the configured app id. The HTTP
//! API has no push channel, so standing queries poll: each feed re-reads its
//! collection every `poll_interval`, and right after any write made through
//! this transport, and pushes the result set whenever it differs from the
//! last one pushed.
//!
//! Revisions are local to the process: a counter bumped on every committed
//! write and every time a feed observes a changed result set.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use freewifi_shared::constants::{
    DEFAULT_FEED_CAPACITY, DEFAULT_INSTANT_API_URI, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_REQUEST_TIMEOUT_SECS,
};
use freewifi_shared::schema::CollectionDef;
use reqwest::StatusCode;
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    BackendStatus, Query, QueryFeed, QueryResponse, RemoteStore, StoredRecord, Transaction,
    TxReceipt, TxStep,
};
use crate::error::TransportError;

/// Admin token for the hosted app. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct AdminToken(String);

impl AdminToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Debug for AdminToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AdminToken(***)")
    }
}

#[derive(Debug, Clone)]
pub struct InstantConfig {
    /// Base URL of the HTTP API, without the `/admin` suffix.
    pub api_uri: String,
    pub app_id: Uuid,
    /// Sent as a bearer token when present. Apps whose permissions let
    /// anyone create and read networks work without one.
    pub admin_token: Option<AdminToken>,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

impl InstantConfig {
    pub fn new(app_id: Uuid) -> Self {
        Self {
            api_uri: DEFAULT_INSTANT_API_URI.to_string(),
            app_id,
            admin_token: None,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

struct Shared {
    http: reqwest::Client,
    config: InstantConfig,
    revision: AtomicU64,
    readable: AtomicBool,
    writable: AtomicBool,
    closed: AtomicBool,
    /// Revision of the last committed write; polling feeds re-read when it
    /// moves.
    writes: watch::Sender<u64>,
    shutdown: watch::Sender<bool>,
}

impl Shared {
    fn url(&self, endpoint: &str) -> String {
        format!(
            "{}/admin/{}",
            self.config.api_uri.trim_end_matches('/'),
            endpoint
        )
    }

    async fn post(&self, endpoint: &str, body: Value) -> Result<Value, TransportError> {
        let mut request = self
            .http
            .post(self.url(endpoint))
            .header("app-id", self.config.app_id.to_string())
            .json(&body);
        if let Some(token) = &self.config.admin_token {
            request = request.bearer_auth(&token.0);
        }

        let response = request.send().await.map_err(|e| self.request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| TransportError::Unavailable(format!("invalid response body: {e}")))
    }

    fn request_error(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.config.request_timeout)
        } else {
            TransportError::Unavailable(err.to_string())
        }
    }

    async fn fetch(&self, collection: &str) -> Result<Vec<StoredRecord>, TransportError> {
        let body = self
            .post("query", json!({ "query": { collection: {} } }))
            .await?;
        parse_records(&body, collection)
    }

    async fn exists(&self, collection: &str, id: Uuid) -> Result<bool, TransportError> {
        let query = json!({
            "query": { collection: { "$": { "where": { "id": id.to_string() } } } }
        });
        let body = self.post("query", query).await?;
        Ok(!parse_records(&body, collection)?.is_empty())
    }

    fn current_revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Map a non-success HTTP status to a transport error.
fn status_error(status: StatusCode, body: &str) -> TransportError {
    let detail = if body.trim().is_empty() {
        status.to_string()
    } else {
        format!("{status}: {}", body.trim())
    };

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        TransportError::Unavailable(detail)
    } else {
        TransportError::Rejected(detail)
    }
}

/// Pull the rows of `collection` out of a query response, sorted by id.
/// Rows without a valid id are skipped.
fn parse_records(body: &Value, collection: &str) -> Result<Vec<StoredRecord>, TransportError> {
    let rows = body
        .get(collection)
        .and_then(Value::as_array)
        .ok_or_else(|| {
            TransportError::Unavailable(format!("query response has no '{collection}' rows"))
        })?;

    let mut records: Vec<StoredRecord> = rows
        .iter()
        .filter_map(|row| {
            let mut attrs = row.as_object()?.clone();
            let raw_id = attrs.remove("id");
            match raw_id.as_ref().and_then(Value::as_str).map(Uuid::parse_str) {
                Some(Ok(id)) => Some(StoredRecord { id, attrs }),
                _ => {
                    warn!(collection, id = ?raw_id, "Skipping row without a valid id");
                    None
                }
            }
        })
        .collect();
    records.sort_by_key(|r| r.id);
    Ok(records)
}

/// Request body for a transaction: one `update` step per created record.
fn transact_body(tx: &Transaction) -> Value {
    let steps: Vec<Value> = tx
        .steps
        .iter()
        .map(|step| {
            let TxStep::Create {
                collection,
                id,
                attrs,
            } = step;
            json!(["update", collection, id.to_string(), Value::Object(attrs.clone())])
        })
        .collect();
    json!({ "steps": steps })
}

/// Resolves once the transport is closed.
async fn closing(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}

/// Transport to a hosted InstantDB app over its admin HTTP API.
pub struct InstantStore {
    shared: Arc<Shared>,
    schemas: HashMap<&'static str, &'static CollectionDef>,
    feed_capacity: usize,
}

impl InstantStore {
    pub fn new(config: InstantConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::Unavailable(format!("HTTP client setup failed: {e}")))?;
        let (shutdown, _) = watch::channel(false);
        let (writes, _) = watch::channel(0);

        info!(
            api_uri = %config.api_uri,
            app_id = %config.app_id,
            authenticated = config.admin_token.is_some(),
            poll_interval_ms = config.poll_interval.as_millis() as u64,
            "Instant store configured"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                http,
                config,
                revision: AtomicU64::new(0),
                readable: AtomicBool::new(true),
                writable: AtomicBool::new(true),
                closed: AtomicBool::new(false),
                writes,
                shutdown,
            }),
            schemas: HashMap::new(),
            feed_capacity: DEFAULT_FEED_CAPACITY,
        })
    }

    /// Check creates into `schema`'s collection before sending them.
    pub fn with_schema(mut self, schema: &'static CollectionDef) -> Self {
        self.schemas.insert(schema.name, schema);
        self
    }

    pub fn with_feed_capacity(mut self, capacity: usize) -> Self {
        self.feed_capacity = capacity.max(1);
        self
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    /// Refuse ids that already exist: the hosted `update` step would
    /// otherwise merge into the existing record.
    async fn check(&self, tx: &Transaction) -> Result<(), TransportError> {
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

            if !seen.insert((collection.as_str(), *id))
                || self.shared.exists(collection, *id).await?
            {
                return Err(TransportError::Conflict {
                    collection: collection.clone(),
                    id: *id,
                });
            }
        }
        Ok(())
    }

    fn note_write(&self, result: &Result<Value, TransportError>) {
        match result {
            Ok(_) => self.shared.writable.store(true, Ordering::SeqCst),
            Err(TransportError::Unavailable(_) | TransportError::Timeout(_)) => {
                self.shared.writable.store(false, Ordering::SeqCst)
            }
            Err(_) => {}
        }
    }
}

#[async_trait]
impl RemoteStore for InstantStore {
    async fn transact(&self, tx: Transaction) -> Result<TxReceipt, TransportError> {
        self.ensure_open()?;
        self.check(&tx).await?;

        let result = self.shared.post("transact", transact_body(&tx)).await;
        self.note_write(&result);
        result?;

        let revision = self.shared.next_revision();
        debug!(revision, steps = tx.steps.len(), "Transaction committed");
        self.shared.writes.send_replace(revision);

        Ok(TxReceipt { revision })
    }

    async fn subscribe_query(&self, query: Query) -> Result<QueryFeed, TransportError> {
        self.ensure_open()?;

        let (tx, rx) = mpsc::channel(self.feed_capacity);
        let shared = Arc::clone(&self.shared);
        let mut shutdown = shared.shutdown.subscribe();
        let mut writes = shared.writes.subscribe();

        tokio::spawn(async move {
            debug!(collection = %query.collection, "Polling query opened");

            let mut last: Option<Vec<StoredRecord>> = None;
            let mut failing = false;

            loop {
                let response = match shared.fetch(&query.collection).await {
                    Ok(records) => {
                        shared.readable.store(true, Ordering::SeqCst);
                        let changed = last.as_ref() != Some(&records);
                        if changed || failing {
                            let revision = if changed {
                                shared.next_revision()
                            } else {
                                shared.current_revision()
                            };
                            failing = false;
                            last = Some(records.clone());
                            Some(QueryResponse {
                                revision,
                                result: Ok(records),
                            })
                        } else {
                            None
                        }
                    }
                    Err(e) => {
                        shared.readable.store(false, Ordering::SeqCst);
                        warn!(collection = %query.collection, error = %e, "Polling query failed");
                        // one error per outage
                        let report = !failing;
                        failing = true;
                        report.then(|| QueryResponse {
                            revision: shared.current_revision(),
                            result: Err(e.to_string()),
                        })
                    }
                };

                if let Some(response) = response {
                    tokio::select! {
                        sent = tx.send(response) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                        _ = closing(&mut shutdown) => break,
                    }
                }

                tokio::select! {
                    _ = tx.closed() => break,
                    _ = closing(&mut shutdown) => break,
                    _ = writes.changed() => {}
                    _ = tokio::time::sleep(shared.config.poll_interval) => {}
                }
            }

            debug!(collection = %query.collection, "Polling query released");
        });

        Ok(rx)
    }

    fn status(&self) -> BackendStatus {
        let connected = !self.shared.closed.load(Ordering::SeqCst);
        BackendStatus {
            connected,
            readable: connected && self.shared.readable.load(Ordering::SeqCst),
            writable: connected && self.shared.writable.load(Ordering::SeqCst),
            revision: self.shared.current_revision(),
        }
    }

    async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.shutdown.send_replace(true);
        info!(app_id = %self.shared.config.app_id, "Instant store closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use axum::extract::State;
    use axum::http::HeaderMap;
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::{Json, Router};
    use freewifi_shared::{FormInput, NETWORKS};

    use crate::client::StoreClient;
    use crate::config::StoreConfig;

    /// Stand-in for the hosted admin API.
    #[derive(Default)]
    struct Hosted {
        rows: HashMap<String, Vec<Value>>,
        app_ids: Vec<String>,
        fail_reads: bool,
        fail_writes: bool,
    }

    type HostedHandle = Arc<Mutex<Hosted>>;

    async fn hosted_query(
        State(hosted): State<HostedHandle>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Response {
        let mut hosted = hosted.lock().unwrap();
        let app_id = headers.get("app-id").and_then(|v| v.to_str().ok());
        hosted.app_ids.push(app_id.unwrap_or_default().to_string());
        if hosted.fail_reads {
            return (axum::http::StatusCode::SERVICE_UNAVAILABLE, "maintenance").into_response();
        }

        let (collection, spec) = body["query"].as_object().unwrap().iter().next().unwrap();
        let wanted = spec.pointer("/$/where/id").and_then(Value::as_str);
        let rows: Vec<Value> = hosted
            .rows
            .get(collection)
            .map(|rows| {
                rows.iter()
                    .filter(|row| wanted.map_or(true, |id| row["id"] == json!(id)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let mut out = Map::new();
        out.insert(collection.clone(), Value::Array(rows));
        Json(Value::Object(out)).into_response()
    }

    async fn hosted_transact(
        State(hosted): State<HostedHandle>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Response {
        let mut hosted = hosted.lock().unwrap();
        if headers.get("app-id").is_none() {
            return (axum::http::StatusCode::BAD_REQUEST, "missing app-id").into_response();
        }
        if hosted.fail_writes {
            return (axum::http::StatusCode::BAD_GATEWAY, "upstream down").into_response();
        }

        for step in body["steps"].as_array().unwrap() {
            let collection = step[1].as_str().unwrap().to_string();
            let mut row = step[3].as_object().unwrap().clone();
            row.insert("id".into(), step[2].clone());
            hosted.rows.entry(collection).or_default().push(Value::Object(row));
        }
        Json(json!({ "tx-id": 1 })).into_response()
    }

    async fn spawn_hosted() -> (String, HostedHandle) {
        let hosted: HostedHandle = Arc::default();
        let app = Router::new()
            .route("/admin/query", post(hosted_query))
            .route("/admin/transact", post(hosted_transact))
            .with_state(hosted.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), hosted)
    }

    fn store_for(api_uri: &str, poll_interval: Duration) -> InstantStore {
        let config = InstantConfig {
            api_uri: api_uri.to_string(),
            poll_interval,
            request_timeout: Duration::from_secs(2),
            ..InstantConfig::new(StoreConfig::default().app_id)
        };
        InstantStore::new(config).unwrap().with_schema(&NETWORKS)
    }

    async fn next(feed: &mut QueryFeed) -> QueryResponse {
        tokio::time::timeout(Duration::from_secs(2), feed.recv())
            .await
            .expect("response in time")
            .expect("feed open")
    }

    #[test]
    fn test_status_error_mapping() {
        assert!(matches!(
            status_error(StatusCode::BAD_REQUEST, "bad attr"),
            TransportError::Rejected(msg) if msg.contains("bad attr")
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, ""),
            TransportError::Rejected(_)
        ));
        assert!(matches!(
            status_error(StatusCode::SERVICE_UNAVAILABLE, ""),
            TransportError::Unavailable(_)
        ));
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            TransportError::Unavailable(_)
        ));
    }

    #[test]
    fn test_parse_records_skips_rows_without_id() {
        let id = Uuid::new_v4();
        let body = json!({
            "networks": [
                { "id": id.to_string(), "ssid": "Cafe" },
                { "id": "not-a-uuid", "ssid": "Broken" },
                { "ssid": "NoId" },
            ]
        });
        let records = parse_records(&body, "networks").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, id);
        assert_eq!(records[0].attrs["ssid"], json!("Cafe"));
        assert!(!records[0].attrs.contains_key("id"));

        assert!(parse_records(&json!({}), "networks").is_err());
    }

    #[test]
    fn test_transact_body_uses_update_steps() {
        let id = Uuid::new_v4();
        let mut attrs = Map::new();
        attrs.insert("ssid".into(), json!("Cafe"));
        let body = transact_body(&Transaction::new().create("networks", id, attrs));
        assert_eq!(
            body,
            json!({ "steps": [["update", "networks", id.to_string(), { "ssid": "Cafe" }]] })
        );
    }

    #[test]
    fn test_admin_token_is_redacted() {
        let config = InstantConfig {
            admin_token: Some(AdminToken::new("s3cret")),
            ..InstantConfig::new(Uuid::nil())
        };
        assert!(!format!("{config:?}").contains("s3cret"));
    }

    #[tokio::test]
    async fn test_created_network_reaches_hosted_app() {
        let (uri, hosted) = spawn_hosted().await;
        let store = Arc::new(store_for(&uri, Duration::from_secs(60)));
        let client = StoreClient::connect(store.clone(), StoreConfig::default());

        let input = FormInput::from_pairs([("ssid", "CafeWifi"), ("rating", "4")]);
        let id = client.add_network(&input).await.unwrap();

        let hosted = hosted.lock().unwrap();
        let rows = &hosted.rows["networks"];
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!(id.to_string()));
        assert_eq!(rows[0]["reviews"], json!(1));
        assert_eq!(rows[0]["password"], json!(""));
        let app_id = StoreConfig::default().app_id.to_string();
        assert!(hosted.app_ids.iter().all(|seen| *seen == app_id));
        assert!(store.status().writable);
    }

    #[tokio::test]
    async fn test_existing_id_is_a_conflict() {
        let (uri, hosted) = spawn_hosted().await;
        let store = store_for(&uri, Duration::from_secs(60));
        let id = Uuid::new_v4();
        hosted
            .lock()
            .unwrap()
            .rows
            .insert("networks".into(), vec![json!({ "id": id.to_string(), "ssid": "Old" })]);

        let mut attrs = Map::new();
        attrs.insert("ssid".into(), json!("New"));
        let result = store
            .transact(Transaction::new().create("networks", id, attrs))
            .await;

        assert!(matches!(result, Err(TransportError::Conflict { id: got, .. }) if got == id));
        assert_eq!(hosted.lock().unwrap().rows["networks"].len(), 1);
    }

    #[tokio::test]
    async fn test_schema_violation_never_sent() {
        let (uri, hosted) = spawn_hosted().await;
        let store = store_for(&uri, Duration::from_secs(60));

        let mut attrs = Map::new();
        attrs.insert("ssid".into(), json!("Cafe"));
        attrs.insert("hasPassword".into(), json!("on"));
        let result = store
            .transact(Transaction::new().create("networks", Uuid::new_v4(), attrs))
            .await;

        assert!(matches!(result, Err(TransportError::Rejected(_))));
        assert!(hosted.lock().unwrap().rows.is_empty());
    }

    #[tokio::test]
    async fn test_feed_follows_writes() {
        let (uri, _hosted) = spawn_hosted().await;
        // long interval: the update below can only come from the write wake-up
        let store = store_for(&uri, Duration::from_secs(60));

        let mut feed = store
            .subscribe_query(Query::collection("networks"))
            .await
            .unwrap();
        let first = next(&mut feed).await;
        assert_eq!(first.result, Ok(vec![]));

        let mut attrs = Map::new();
        attrs.insert("ssid".into(), json!("Library"));
        attrs.insert("createdAt".into(), json!(1_700_000_000_000i64));
        let receipt = store
            .transact(Transaction::new().create("networks", Uuid::new_v4(), attrs))
            .await
            .unwrap();

        let second = next(&mut feed).await;
        assert!(second.revision > first.revision);
        assert!(receipt.revision >= first.revision);
        assert_eq!(second.result.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_feed_reports_outage_once_and_recovers() {
        let (uri, hosted) = spawn_hosted().await;
        let store = store_for(&uri, Duration::from_millis(20));

        let mut feed = store
            .subscribe_query(Query::collection("networks"))
            .await
            .unwrap();
        let healthy = next(&mut feed).await;
        assert!(healthy.result.is_ok());

        hosted.lock().unwrap().fail_reads = true;
        let outage = next(&mut feed).await;
        assert!(outage.result.unwrap_err().contains("maintenance"));
        assert!(!store.status().readable);

        // further failed polls stay quiet
        let quiet = tokio::time::timeout(Duration::from_millis(100), feed.recv()).await;
        assert!(quiet.is_err());

        hosted.lock().unwrap().fail_reads = false;
        let recovered = next(&mut feed).await;
        assert_eq!(recovered.result, Ok(vec![]));
        assert!(recovered.revision >= outage.revision);
        assert!(store.status().readable);
    }

    #[tokio::test]
    async fn test_write_failure_marks_unwritable() {
        let (uri, hosted) = spawn_hosted().await;
        let store = store_for(&uri, Duration::from_secs(60));
        hosted.lock().unwrap().fail_writes = true;

        let mut attrs = Map::new();
        attrs.insert("ssid".into(), json!("Cafe"));
        let result = store
            .transact(Transaction::new().create("networks", Uuid::new_v4(), attrs))
            .await;

        assert!(matches!(result, Err(TransportError::Unavailable(msg)) if msg.contains("upstream down")));
        assert!(!store.status().writable);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_unavailable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let store = store_for(&format!("http://{addr}"), Duration::from_secs(60));
        let mut attrs = Map::new();
        attrs.insert("ssid".into(), json!("Cafe"));
        let result = store
            .transact(Transaction::new().create("networks", Uuid::new_v4(), attrs))
            .await;
        assert!(matches!(result, Err(TransportError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_close_ends_feeds() {
        let (uri, _hosted) = spawn_hosted().await;
        let store = store_for(&uri, Duration::from_millis(20));
        let mut feed = store
            .subscribe_query(Query::collection("networks"))
            .await
            .unwrap();
        next(&mut feed).await;

        store.close().await;
        store.close().await;
        let end = tokio::time::timeout(Duration::from_secs(2), feed.recv())
            .await
            .unwrap();
        assert!(end.is_none());
        assert!(!store.status().connected);
        assert!(matches!(
            store.subscribe_query(Query::collection("networks")).await,
            Err(TransportError::Closed)
        ));
    }
}
