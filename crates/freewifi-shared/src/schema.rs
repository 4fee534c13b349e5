//! Declarative schema of the `networks` collection.
//!
//! Records are stored as schemaless attribute maps. The definitions here
//! describe which attributes exist and what logical type each carries; they
//! never require existing records to be rewritten. Adding a requirement flag
//! means adding a [`FieldDef`] with a default here and a field on the model:
//! old records simply lack the attribute and read it as its default.
//!
//! Writes are strict ([`CollectionDef::check`]). Reads are lenient
//! ([`CollectionDef::normalize`]): records written by older or looser
//! clients may carry loosely typed values, which are coerced when the
//! meaning is clear and replaced by the default otherwise.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::constants::{INITIAL_REVIEWS, NETWORKS_COLLECTION};
use crate::error::SharedError;

/// Logical type of a stored attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Number,
    Integer,
    Boolean,
    /// Epoch milliseconds.
    Timestamp,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Timestamp => "timestamp",
        }
    }

    /// Whether a JSON value is an acceptable encoding of this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Text => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer | Self::Timestamp => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
        }
    }

    /// Strict encoding of a loosely typed stored value, if it has one.
    pub fn coerce(&self, value: &Value) -> Option<Value> {
        match self {
            Self::Integer => {
                let n = whole_number(value)?;
                return u32::try_from(n).ok().map(Value::from);
            }
            Self::Timestamp => {
                let millis = whole_number(value)?;
                DateTime::<Utc>::from_timestamp_millis(millis)?;
                return Some(Value::from(millis));
            }
            _ => {}
        }
        if self.accepts(value) {
            return Some(value.clone());
        }
        match (self, value) {
            (Self::Text, Value::Number(n)) => Some(Value::String(n.to_string())),
            (Self::Text, Value::Bool(b)) => Some(Value::String(b.to_string())),
            (Self::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
            (Self::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "on" => Some(Value::Bool(true)),
                "false" | "off" | "" => Some(Value::Bool(false)),
                _ => None,
            },
            (Self::Boolean, Value::Number(n)) => match n.as_f64() {
                Some(v) if v == 0.0 => Some(Value::Bool(false)),
                Some(v) if v == 1.0 => Some(Value::Bool(true)),
                _ => None,
            },
            _ => None,
        }
    }
}

fn whole_number(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Value a reader assumes when an attribute is absent from a record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldDefault {
    Text(&'static str),
    Number(f64),
    Integer(u32),
    /// Epoch milliseconds.
    Timestamp(i64),
    Boolean(bool),
}

impl FieldDefault {
    pub fn to_value(&self) -> Value {
        match *self {
            Self::Text(s) => Value::String(s.to_string()),
            Self::Number(n) => serde_json::Number::from_f64(n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Integer(n) => Value::from(n),
            Self::Timestamp(ms) => Value::from(ms),
            Self::Boolean(b) => Value::Bool(b),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    /// Wire name of the attribute.
    pub name: &'static str,
    pub ty: FieldType,
    /// `None` means a record without a usable value is not readable.
    pub default: Option<FieldDefault>,
}

impl FieldDef {
    const fn required(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            default: None,
        }
    }

    const fn optional(name: &'static str, ty: FieldType, default: FieldDefault) -> Self {
        Self {
            name,
            ty,
            default: Some(default),
        }
    }

    const fn flag(name: &'static str) -> Self {
        Self::optional(name, FieldType::Boolean, FieldDefault::Boolean(false))
    }
}

/// Outcome of [`CollectionDef::normalize`].
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    /// Every declared attribute, strictly typed.
    pub attrs: Map<String, Value>,
    /// Attributes present on the record whose value could not be used and
    /// was replaced by the default.
    pub replaced: Vec<&'static str>,
}

/// A named collection and its attribute definitions.
#[derive(Debug)]
pub struct CollectionDef {
    pub name: &'static str,
    pub fields: &'static [FieldDef],
}

/// The `networks` collection.
pub static NETWORKS: CollectionDef = CollectionDef {
    name: NETWORKS_COLLECTION,
    fields: &[
        FieldDef::required("ssid", FieldType::Text),
        FieldDef::optional("password", FieldType::Text, FieldDefault::Text("")),
        FieldDef::optional("rating", FieldType::Number, FieldDefault::Number(0.0)),
        FieldDef::optional("reviews", FieldType::Integer, FieldDefault::Integer(INITIAL_REVIEWS)),
        FieldDef::optional("createdAt", FieldType::Timestamp, FieldDefault::Timestamp(0)),
        FieldDef::flag("hasPassword"),
        FieldDef::flag("requiresPersonalInfo"),
        FieldDef::flag("requiresEmail"),
        FieldDef::flag("requiresPhone"),
        FieldDef::flag("requiresWatchAd"),
    ],
};

impl CollectionDef {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check that every attribute present is declared and well-typed.
    ///
    /// Absent attributes are fine: that is how older records look.
    pub fn check(&self, attrs: &Map<String, Value>) -> Result<(), SharedError> {
        for (name, value) in attrs {
            let field = self
                .field(name)
                .ok_or_else(|| SharedError::UnknownAttribute(name.clone(), self.name))?;

            if !field.ty.accepts(value) {
                return Err(SharedError::TypeMismatch {
                    name: name.clone(),
                    expected: field.ty.as_str(),
                    found: json_kind(value).to_string(),
                });
            }
        }
        Ok(())
    }

    /// Read a stored record leniently into a complete, strictly typed map.
    ///
    /// Absent attributes take their default. Present ones are coerced to
    /// their declared type, or replaced by the default when that fails.
    /// Undeclared attributes are dropped. Fails only when an attribute
    /// without a default has no usable value.
    pub fn normalize(&self, attrs: &Map<String, Value>) -> Result<Normalized, SharedError> {
        let mut out = Map::new();
        let mut replaced = Vec::new();

        for field in self.fields {
            let stored = attrs.get(field.name).filter(|v| !v.is_null());
            let value = match stored.map(|v| field.ty.coerce(v)) {
                Some(Some(value)) => value,
                Some(None) => match field.default {
                    Some(default) => {
                        replaced.push(field.name);
                        default.to_value()
                    }
                    None => {
                        let found = stored.map(json_kind).unwrap_or("null");
                        return Err(SharedError::TypeMismatch {
                            name: field.name.to_string(),
                            expected: field.ty.as_str(),
                            found: found.to_string(),
                        });
                    }
                },
                None => match field.default {
                    Some(default) => default.to_value(),
                    None => return Err(SharedError::MissingAttribute(field.name, self.name)),
                },
            };
            out.insert(field.name.to_string(), value);
        }

        Ok(Normalized {
            attrs: out,
            replaced,
        })
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "text",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
