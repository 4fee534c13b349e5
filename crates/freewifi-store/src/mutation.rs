//! Creating network records.
//!
//! Every create gets a fresh random id, a creation time taken at submission
//! and a review count of one, and goes to the store as a single create-only
//! transaction. There is no retry: a failed attempt discards its id and the
//! caller decides whether to submit again.

use chrono::Utc;
use freewifi_shared::validation::{validate, FormInput};
use freewifi_shared::{NetworkId, NetworkPayload, NETWORKS};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::Transaction;
use crate::client::StoreClient;
use crate::error::{MutationError, Result, StoreError};

/// How a submission ended, for callers that map outcomes to status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Created,
    Invalid,
    Failed,
}

/// Result of a form submission, shaped for a UI.
///
/// Serializes as `{ "success": true, "id": .., "message": .. }` or
/// `{ "success": false, "error": .., "values": <original input> }`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionOutcome {
    pub success: bool,
    #[serde(skip)]
    pub kind: OutcomeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<NetworkId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<FormInput>,
}

impl SubmissionOutcome {
    fn created(id: NetworkId, message: &str) -> Self {
        Self {
            success: true,
            kind: OutcomeKind::Created,
            id: Some(id),
            message: Some(message.to_string()),
            error: None,
            values: None,
        }
    }

    fn rejected(err: &StoreError, values: Option<FormInput>) -> Self {
        let (kind, error) = match err {
            StoreError::Validation(e) => (OutcomeKind::Invalid, e.to_string()),
            StoreError::Mutation(e) => (OutcomeKind::Failed, format!("Failed to add network: {e}")),
        };
        Self {
            success: false,
            kind,
            id: None,
            message: None,
            error: Some(error),
            values,
        }
    }
}

impl StoreClient {
    /// Write one validated network as a new record.
    pub async fn create_network(
        &self,
        payload: &NetworkPayload,
    ) -> std::result::Result<NetworkId, MutationError> {
        if self.is_closed() {
            return Err(MutationError::Closed);
        }

        let id = NetworkId::generate();
        let created_at = Utc::now();
        let tx = Transaction::new().create(NETWORKS.name, id.0, payload.to_attrs(created_at));

        debug!(id = %id, ssid = %payload.ssid, "Submitting create transaction");

        match self.backend.transact(tx).await {
            Ok(receipt) => {
                info!(
                    id = %id,
                    ssid = %payload.ssid,
                    revision = receipt.revision,
                    "Network created"
                );
                Ok(id)
            }
            Err(e) => {
                warn!(id = %id, ssid = %payload.ssid, error = %e, "Network creation failed");
                Err(e.into())
            }
        }
    }

    /// Validate raw form input, then create the record.
    ///
    /// Invalid input never reaches the store.
    pub async fn add_network(&self, input: &FormInput) -> Result<NetworkId> {
        let payload = validate(input).map_err(|e| {
            debug!(error = %e, "Rejected network submission");
            e
        })?;
        Ok(self.create_network(&payload).await?)
    }

    /// Handle a form submission end to end and describe the result for the UI.
    pub async fn submit(&self, input: FormInput) -> SubmissionOutcome {
        match self.add_network(&input).await {
            Ok(id) => SubmissionOutcome::created(id, "Network added successfully!"),
            Err(e) => SubmissionOutcome::rejected(&e, Some(input)),
        }
    }

    /// Write a sample network, handy for checking a deployment end to end.
    pub async fn create_test_network(&self) -> SubmissionOutcome {
        let payload = NetworkPayload {
            ssid: format!("Test WiFi {}", Utc::now().format("%H:%M:%S")),
            password: "test123".into(),
            rating: 4.5,
            has_password: true,
            requires_personal_info: false,
            requires_email: true,
            requires_phone: false,
            requires_watch_ad: true,
        };

        match self.create_network(&payload).await {
            Ok(id) => SubmissionOutcome::created(id, "Test network added successfully!"),
            Err(e) => SubmissionOutcome::rejected(&StoreError::Mutation(e), None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    use chrono::{DateTime, Utc};
    use freewifi_shared::{Network, ValidationError};
    use serde_json::json;

    use crate::backend::memory::MemoryStore;
    use crate::backend::RemoteStore;
    use crate::config::StoreConfig;

    fn setup() -> (Arc<MemoryStore>, StoreClient) {
        let store = Arc::new(MemoryStore::new().with_schema(&NETWORKS));
        let client = StoreClient::connect(store.clone(), StoreConfig::default());
        (store, client)
    }

    fn form(pairs: &[(&str, &str)]) -> FormInput {
        FormInput::from_pairs(pairs.iter().copied())
    }

    async fn stored(store: &MemoryStore, id: NetworkId) -> Network {
        let attrs = store.get("networks", id.0).await.expect("record stored");
        Network::from_record(id, &attrs).unwrap()
    }

    #[tokio::test]
    async fn test_missing_ssid_never_writes() {
        let (store, client) = setup();

        for input in [form(&[]), form(&[("ssid", "   ")]), form(&[("password", "x")])] {
            let err = client.add_network(&input).await.unwrap_err();
            assert_eq!(err, StoreError::Validation(ValidationError::SsidRequired));
        }
        assert_eq!(store.count("networks").await, 0);
        assert_eq!(store.status().revision, 0);
    }

    #[tokio::test]
    async fn test_password_required_scenario() {
        let (store, client) = setup();
        let input = form(&[("ssid", "CafeWifi"), ("hasPassword", "on"), ("password", "")]);

        let outcome = client.submit(input.clone()).await;
        assert!(!outcome.success);
        assert_eq!(outcome.kind, OutcomeKind::Invalid);
        assert_eq!(outcome.error.as_deref(), Some("password required"));
        assert_eq!(outcome.values, Some(input));
        assert_eq!(store.count("networks").await, 0);
    }

    #[tokio::test]
    async fn test_open_network_scenario() {
        let (store, client) = setup();
        let input = form(&[
            ("ssid", "CafeWifi"),
            ("password", "ignored"),
            ("rating", "4"),
        ]);

        let before = Utc::now();
        let id = client.add_network(&input).await.unwrap();
        let after = Utc::now();

        let network = stored(&store, id).await;
        assert_eq!(network.ssid, "CafeWifi");
        assert_eq!(network.password, "");
        assert!(!network.has_password);
        assert_eq!(network.rating, 4.0);
        assert_eq!(network.reviews, 1);
        assert!(within(network.created_at, before, after));
    }

    fn within(at: DateTime<Utc>, before: DateTime<Utc>, after: DateTime<Utc>) -> bool {
        // createdAt is stored with millisecond precision
        at.timestamp_millis() >= before.timestamp_millis()
            && at.timestamp_millis() <= after.timestamp_millis()
    }

    #[tokio::test]
    async fn test_created_at_ignores_caller_input() {
        let (store, client) = setup();
        let input = FormInput::from_pairs([("ssid", "Airport"), ("createdAt", "0")]);

        let before = Utc::now();
        let id = client.add_network(&input).await.unwrap();
        let after = Utc::now();

        let network = stored(&store, id).await;
        assert!(within(network.created_at, before, after));
    }

    #[tokio::test]
    async fn test_concurrent_creates_get_unique_ids() {
        // Latency keeps every write in flight at the same time.
        let store = Arc::new(
            MemoryStore::new()
                .with_schema(&NETWORKS)
                .with_write_latency(std::time::Duration::from_millis(20)),
        );
        let client = Arc::new(StoreClient::connect(store.clone(), StoreConfig::default()));

        let handles: Vec<_> = (0..64)
            .map(|i| {
                let client = client.clone();
                tokio::spawn(async move {
                    let input = FormInput::from_pairs([("ssid", format!("Net {i}"))]);
                    client.add_network(&input).await
                })
            })
            .collect();

        let mut ids = HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap().unwrap());
        }
        assert_eq!(ids.len(), 64);
        assert_eq!(store.count("networks").await, 64);
    }

    #[tokio::test]
    async fn test_failure_discards_id_and_persists_nothing() {
        let (store, client) = setup();
        let payload = validate(&form(&[("ssid", "Hotel")])).unwrap();

        store.fail_next_write("connection reset");
        let err = client.create_network(&payload).await.unwrap_err();
        assert_eq!(err, MutationError::Unavailable("connection reset".into()));
        assert_eq!(store.count("networks").await, 0);

        let first = client.create_network(&payload).await.unwrap();
        let second = client.create_network(&payload).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(store.count("networks").await, 2);
    }

    #[tokio::test]
    async fn test_mutation_failure_outcome() {
        let (store, client) = setup();
        store.set_writable(false);

        let input = form(&[("ssid", "Hotel"), ("rating", "3")]);
        let outcome = client.submit(input.clone()).await;
        assert!(!outcome.success);
        assert_eq!(outcome.kind, OutcomeKind::Failed);
        assert!(outcome
            .error
            .as_deref()
            .unwrap()
            .starts_with("Failed to add network:"));
        assert_eq!(outcome.values, Some(input));
    }

    #[tokio::test]
    async fn test_closed_client_rejects_writes() {
        let (store, client) = setup();
        client.close().await;

        let payload = validate(&form(&[("ssid", "Hotel")])).unwrap();
        assert_eq!(
            client.create_network(&payload).await,
            Err(MutationError::Closed)
        );
        assert_eq!(store.count("networks").await, 0);
    }

    #[tokio::test]
    async fn test_outcome_json_shape() {
        let (_store, client) = setup();

        let ok = client.submit(form(&[("ssid", "Park")])).await;
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["success"], json!(true));
        assert!(json["id"].is_string());
        assert!(json.get("values").is_none());
        assert!(json.get("kind").is_none());

        let bad = client.submit(form(&[("ssid", "")])).await;
        let json = serde_json::to_value(&bad).unwrap();
        assert_eq!(json["success"], json!(false));
        assert_eq!(json["error"], json!("ssid required"));
        assert_eq!(json["values"]["ssid"], json!(""));
    }

    #[tokio::test]
    async fn test_create_test_network() {
        let (store, client) = setup();
        let outcome = client.create_test_network().await;
        assert!(outcome.success);

        let network = stored(&store, outcome.id.unwrap()).await;
        assert!(network.ssid.starts_with("Test WiFi "));
        assert_eq!(network.password, "test123");
        assert_eq!(network.rating, 4.5);
        assert!(network.requires_email);
        assert!(network.requires_watch_ad);
    }
}
