use thiserror::Error;

/// A submitted form failed a precondition. Raised before any store access.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("ssid required")]
    SsidRequired,

    #[error("password required")]
    PasswordRequired,

    #[error("rating must be a number, got {0:?}")]
    InvalidRating(String),

    #[error("rating must be between {min} and {max}, got {value}")]
    RatingOutOfRange { value: f64, min: f64, max: f64 },
}

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Record decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Attribute '{0}' is not declared in collection '{1}'")]
    UnknownAttribute(String, &'static str),

    #[error("Attribute '{0}' missing from a '{1}' record")]
    MissingAttribute(&'static str, &'static str),

    #[error("Attribute '{name}' expected {expected}, got {found}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: String,
    },
}
