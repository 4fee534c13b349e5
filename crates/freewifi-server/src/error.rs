use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use freewifi_store::SubscriptionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Subscription error: {0}")]
    Subscription(#[from] SubscriptionError),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            ServerError::Subscription(SubscriptionError::Closed) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            ServerError::Subscription(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
