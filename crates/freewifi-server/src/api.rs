use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{Method, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Form, Json, Router,
};
use freewifi_shared::constants::APP_NAME;
use freewifi_shared::{FormInput, Network, Requirement};
use freewifi_store::{
    OutcomeKind, Snapshot, StoreClient, StoreStatus, SubmissionOutcome, SubscriptionError,
};
use futures::{Stream, StreamExt};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::error::ServerError;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<StoreClient>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/status", get(store_status))
        .route("/permissions", get(permissions))
        .route("/networks", get(list_networks).post(add_network))
        .route("/networks/test", post(add_test_network))
        .route("/networks/live", get(live_networks))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerInfoResponse {
    name: &'static str,
    version: &'static str,
    app_id: Uuid,
    backend: String,
    read_error_policy: String,
}

/// A network as listed to visitors, with its access requirements spelled out.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NetworkListing {
    #[serde(flatten)]
    network: Network,
    requirements: Vec<Requirement>,
    /// No password and nothing asked in return.
    open: bool,
}

#[derive(Serialize)]
struct ListingResponse {
    revision: u64,
    networks: Vec<NetworkListing>,
}

impl From<Snapshot> for ListingResponse {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            revision: snapshot.revision,
            networks: snapshot
                .networks
                .into_iter()
                .map(|network| NetworkListing {
                    requirements: network.requirements(),
                    open: network.is_open(),
                    network,
                })
                .collect(),
        }
    }
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: APP_NAME,
        version: env!("CARGO_PKG_VERSION"),
        app_id: state.config.app_id,
        backend: format!("{:?}", state.config.backend),
        read_error_policy: format!("{:?}", state.config.read_error_policy),
    })
}

async fn store_status(State(state): State<AppState>) -> Json<StoreStatus> {
    Json(state.store.status())
}

/// Access policy the remote collection needs for anonymous contributors.
/// Informational: the policy is configured on the store, not enforced here.
async fn permissions() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "policy": {
            "$default": { "allow": { "$default": "true" } },
            "attrs": { "allow": { "create": "true" } }
        },
        "note": "Apply this policy to the networks collection on the store. \
                 It lets anyone read networks and create new ones."
    }))
}

fn status_for(outcome: &SubmissionOutcome) -> StatusCode {
    match outcome.kind {
        OutcomeKind::Created => StatusCode::OK,
        OutcomeKind::Invalid => StatusCode::BAD_REQUEST,
        OutcomeKind::Failed => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Form-submission endpoint: the body is the url-encoded "add network" form.
async fn add_network(
    State(state): State<AppState>,
    Form(fields): Form<Vec<(String, String)>>,
) -> (StatusCode, Json<SubmissionOutcome>) {
    let outcome = state.store.submit(FormInput::from_pairs(fields)).await;
    (status_for(&outcome), Json(outcome))
}

async fn add_test_network(State(state): State<AppState>) -> (StatusCode, Json<SubmissionOutcome>) {
    let outcome = state.store.create_test_network().await;
    if outcome.success {
        info!(id = ?outcome.id, "Test network added via API");
    }
    (status_for(&outcome), Json(outcome))
}

/// One-shot read: the first snapshot of a fresh subscription.
async fn list_networks(
    State(state): State<AppState>,
) -> Result<Json<ListingResponse>, ServerError> {
    let mut subscription = state.store.subscribe().await?;

    match subscription.next().await {
        Some(Ok(snapshot)) => Ok(Json(snapshot.into())),
        Some(Err(e)) => Err(e.into()),
        None => Err(ServerError::Unavailable(
            "store stopped before answering".into(),
        )),
    }
}

/// Live snapshots as Server-Sent Events. The subscription is released when
/// the client disconnects and the stream is dropped.
async fn live_networks(
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServerError> {
    let subscription = state.store.subscribe().await?;
    info!(subscription = %subscription.id(), "Live network stream opened");

    let events = subscription.map(|item| Ok(snapshot_event(item)));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn snapshot_event(item: Result<Snapshot, SubscriptionError>) -> Event {
    match item {
        Ok(snapshot) => Event::default()
            .event("snapshot")
            .id(snapshot.revision.to_string())
            .json_data(ListingResponse::from(snapshot))
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to encode snapshot");
                Event::default().event("error").data(e.to_string())
            }),
        Err(e) => Event::default().event("error").data(e.to_string()),
    }
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
