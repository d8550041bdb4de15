//! Per-type schema validation for outbound and inbound messages.
//!
//! Every message type has exactly one registered [`Schema`] describing the
//! fields it may carry and the type of each. `MessageStore::add_schema`
//! registers one; `MessageStore::add` validates against it, failing with
//! [`SchemaError`] on the first mismatch found (§3, §4.2).

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use thiserror::Error;

/// The value types a schema field may require (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Int,
    Str,
    Bytes,
    Bool,
    Float,
    /// Seconds since the epoch, carried as a JSON number.
    Timestamp,
    /// A homogeneous list of the given inner type.
    List(Box<FieldType>),
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Int => write!(f, "Int"),
            FieldType::Str => write!(f, "Str"),
            FieldType::Bytes => write!(f, "Bytes"),
            FieldType::Bool => write!(f, "Bool"),
            FieldType::Float => write!(f, "Float"),
            FieldType::Timestamp => write!(f, "Timestamp"),
            FieldType::List(inner) => write!(f, "List<{inner}>"),
        }
    }
}

impl FieldType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Str => value.is_string(),
            // Byte strings are carried as base64-encoded JSON strings (§6.1 note
            // in SPEC_FULL.md: no `bson` crate in the retrieval pack, so raw
            // byte fields are represented as strings rather than a distinct
            // JSON type).
            FieldType::Bytes => value.is_string(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Float => value.is_f64() || value.is_i64() || value.is_u64(),
            FieldType::Timestamp => value.is_i64() || value.is_u64() || value.is_f64(),
            FieldType::List(inner) => value
                .as_array()
                .is_some_and(|items| items.iter().all(|v| inner.matches(v))),
        }
    }
}

/// A registered message shape: which fields are permitted, and of what type.
///
/// Fields not named here are rejected; named fields present with the wrong
/// JSON shape are rejected. `type` and `api` are handled separately by
/// [`super::types::Message`] and must not be named in a schema's fields.
#[derive(Debug, Clone)]
pub struct Schema {
    type_name: String,
    fields: BTreeMap<String, FieldType>,
}

impl Schema {
    /// Build a schema for `type_name` with the given field/type pairs.
    pub fn new(type_name: impl Into<String>, fields: impl IntoIterator<Item = (String, FieldType)>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: fields.into_iter().collect(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Validate a payload map (message fields minus `type`/`api`) against
    /// this schema. An unknown field or a type mismatch is a [`SchemaError`].
    pub fn validate(&self, payload: &BTreeMap<String, Value>) -> Result<(), SchemaError> {
        for key in payload.keys() {
            if !self.fields.contains_key(key) {
                return Err(SchemaError::UnknownField {
                    message_type: self.type_name.clone(),
                    field: key.clone(),
                });
            }
        }
        for (field, field_type) in &self.fields {
            if let Some(value) = payload.get(field) {
                if !field_type.matches(value) {
                    return Err(SchemaError::TypeMismatch {
                        message_type: self.type_name.clone(),
                        field: field.clone(),
                        expected: field_type.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Errors raised while validating a message against its registered schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("message type {0:?} has no registered schema")]
    UnregisteredType(String),

    #[error("message type {message_type:?} rejects unknown field {field:?}")]
    UnknownField { message_type: String, field: String },

    #[error("message type {message_type:?} field {field:?} does not match expected type {expected}")]
    TypeMismatch {
        message_type: String,
        field: String,
        expected: FieldType,
    },
}
