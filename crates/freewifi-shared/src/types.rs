use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, globally unique identifier of a network record.
///
/// Generated client-side from 122 random bits, so concurrent writers never
/// need to coordinate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct NetworkId(pub Uuid);

impl NetworkId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for NetworkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
