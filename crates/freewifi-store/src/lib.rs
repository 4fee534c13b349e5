//! # freewifi-store
//!
//! Data synchronization and mutation layer for crowdsourced WiFi networks.
//!
//! A [`StoreClient`] is constructed explicitly around a [`RemoteStore`]
//! transport and handed to whatever needs it. It offers three things:
//! validated, create-only writes of new network records; live, cancellable
//! streams of full-collection snapshots; and read-only diagnostics.

pub mod backend;
pub mod client;
pub mod config;
pub mod mutation;
pub mod status;
pub mod subscription;

mod error;

pub use backend::instant::{AdminToken, InstantConfig, InstantStore};
pub use backend::memory::MemoryStore;
pub use backend::RemoteStore;
pub use client::StoreClient;
pub use config::{ReadErrorPolicy, StoreConfig};
pub use error::{MutationError, StoreError, SubscriptionError, TransportError};
pub use mutation::{OutcomeKind, SubmissionOutcome};
pub use status::StoreStatus;
pub use subscription::{NetworkSubscription, Snapshot, Unsubscribe};
