//! # freewifi-shared
//!
//! Types shared by the store and the HTTP surface: the `networks` schema,
//! the `Network` record model, raw form input and the validator that turns
//! one into the other.

pub mod constants;
pub mod error;
pub mod models;
pub mod schema;
pub mod types;
pub mod validation;

pub use error::{SharedError, ValidationError};
pub use models::{Network, NetworkPayload, Requirement};
pub use schema::{CollectionDef, FieldDef, FieldType, Normalized, NETWORKS};
pub use types::NetworkId;
pub use validation::{validate, FormInput};
