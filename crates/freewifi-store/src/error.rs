use std::time::Duration;

use freewifi_shared::{NetworkId, ValidationError};
use thiserror::Error;
use uuid::Uuid;

/// Failures reported by a [`crate::RemoteStore`] transport.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The store could not be reached or refused service for now.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The store understood the request and refused it.
    #[error("Rejected by store: {0}")]
    Rejected(String),

    /// A create step targeted an id that already exists.
    #[error("Record {id} already exists in '{collection}'")]
    Conflict { collection: String, id: Uuid },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Store connection closed")]
    Closed,
}

/// A create transaction did not commit. Nothing was persisted.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MutationError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Rejected by store: {0}")]
    Rejected(String),

    #[error("Network {0} already exists")]
    Conflict(NetworkId),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Store client is closed")]
    Closed,
}

impl From<TransportError> for MutationError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unavailable(reason) => Self::Unavailable(reason),
            TransportError::Rejected(reason) => Self::Rejected(reason),
            TransportError::Conflict { id, .. } => Self::Conflict(NetworkId(id)),
            TransportError::Timeout(after) => Self::Timeout(after),
            TransportError::Closed => Self::Closed,
        }
    }
}

/// A standing query could not be opened or a read failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubscriptionError {
    #[error("Read failed: {0}")]
    Read(String),

    #[error("Could not open subscription: {0}")]
    Open(#[from] TransportError),

    #[error("Store client is closed")]
    Closed,
}

/// Everything that can go wrong when adding a network from form input.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Mutation(#[from] MutationError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
