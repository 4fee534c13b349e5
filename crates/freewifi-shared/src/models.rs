//! Network record model.
//!
//! [`NetworkPayload`] is what a caller contributes; [`Network`] is the full
//! record as read back from the store, including the store-assigned `id`,
//! `reviews` and `createdAt`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::INITIAL_REVIEWS;
use crate::error::SharedError;
use crate::schema::{Normalized, NETWORKS};
use crate::types::NetworkId;

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Validated, normalized contribution for a new record.
///
/// Only [`crate::validation::validate`] should build one from user input:
/// it guarantees a non-empty `ssid` and an empty `password` whenever
/// `has_password` is false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPayload {
    pub ssid: String,
    pub password: String,
    pub rating: f64,
    pub has_password: bool,
    pub requires_personal_info: bool,
    pub requires_email: bool,
    pub requires_phone: bool,
    pub requires_watch_ad: bool,
}

impl NetworkPayload {
    /// Attribute map written on creation, stamped with the creation time and
    /// the initial review count.
    pub fn to_attrs(&self, created_at: DateTime<Utc>) -> Map<String, Value> {
        let mut attrs = Map::new();
        attrs.insert("ssid".into(), Value::from(self.ssid.clone()));
        attrs.insert("password".into(), Value::from(self.password.clone()));
        // rating is finite after validation; from_f64 only fails on NaN/inf
        attrs.insert(
            "rating".into(),
            serde_json::Number::from_f64(self.rating)
                .map(Value::Number)
                .unwrap_or_else(|| Value::from(0)),
        );
        attrs.insert("reviews".into(), Value::from(INITIAL_REVIEWS));
        attrs.insert("createdAt".into(), Value::from(created_at.timestamp_millis()));
        attrs.insert("hasPassword".into(), Value::Bool(self.has_password));
        attrs.insert(
            "requiresPersonalInfo".into(),
            Value::Bool(self.requires_personal_info),
        );
        attrs.insert("requiresEmail".into(), Value::Bool(self.requires_email));
        attrs.insert("requiresPhone".into(), Value::Bool(self.requires_phone));
        attrs.insert("requiresWatchAd".into(), Value::Bool(self.requires_watch_ad));
        attrs
    }
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// A persisted network record.
///
/// Built from stored attributes through [`Network::decode`], which fills in
/// schema defaults for attributes older records lack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    pub id: NetworkId,
    pub ssid: String,
    pub password: String,
    pub rating: f64,
    pub reviews: u32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    pub has_password: bool,
    pub requires_personal_info: bool,
    pub requires_email: bool,
    pub requires_phone: bool,
    pub requires_watch_ad: bool,
}

/// Something a visitor has to hand over before getting online.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Requirement {
    PersonalInfo,
    Email,
    Phone,
    WatchAd,
}

impl Network {
    /// Decode a stored attribute map.
    pub fn from_record(id: NetworkId, attrs: &Map<String, Value>) -> Result<Self, SharedError> {
        Self::decode(id, attrs).map(|(network, _)| network)
    }

    /// Decode a stored attribute map, also naming the attributes whose
    /// stored value was unusable and read as the schema default.
    pub fn decode(
        id: NetworkId,
        attrs: &Map<String, Value>,
    ) -> Result<(Self, Vec<&'static str>), SharedError> {
        let Normalized {
            attrs: mut map,
            replaced,
        } = NETWORKS.normalize(attrs)?;
        map.insert("id".into(), Value::String(id.to_string()));
        Ok((serde_json::from_value(Value::Object(map))?, replaced))
    }

    pub fn requirements(&self) -> Vec<Requirement> {
        [
            (self.requires_personal_info, Requirement::PersonalInfo),
            (self.requires_email, Requirement::Email),
            (self.requires_phone, Requirement::Phone),
            (self.requires_watch_ad, Requirement::WatchAd),
        ]
        .into_iter()
        .filter_map(|(on, req)| on.then_some(req))
        .collect()
    }

    /// Open access: no password and nothing asked in return.
    pub fn is_open(&self) -> bool {
        !self.has_password && self.requirements().is_empty()
    }
}
