//! The outbound/inbound message envelope: a tagged, schema-validated map.
//!
//! An unordered mapping with required keys `type` and `api` (or absent),
//! plus type-specific payload keys (§3) — modeled as a tagged struct with
//! an open payload rather than a dynamically typed dict.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single outbound or inbound message.
///
/// `fields` holds everything except `type`, `api` and `timestamp`, which
/// are first-class because every part of the exchange core inspects them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    #[serde(rename = "type")]
    pub message_type: String,

    /// API version this message was (or will be) sent under. Absent on a
    /// freshly constructed message bound for the current API; populated by
    /// `MessageExchange::send` before enqueueing (§4.5).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl Message {
    /// Construct a message of the given type with no payload fields yet.
    pub fn new(message_type: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            api: None,
            timestamp: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let msg = Message::new("data").with_field("data", 7);
        let encoded = serde_json::to_value(&msg).unwrap();
        let decoded: Message = serde_json::from_value(encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn absent_api_is_omitted_from_json() {
        let msg = Message::new("empty");
        let encoded = serde_json::to_value(&msg).unwrap();
        assert!(encoded.get("api").is_none());
    }
}
