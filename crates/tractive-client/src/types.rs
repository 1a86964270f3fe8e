//! Wire types shared across the client.
//!
//! Most Tractive payloads are schemaless vendor blobs and stay
//! `serde_json::Value`; only the handful of fields the client itself relies on
//! get typed structs.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Credentials issued by `POST auth/token`.
///
/// An immutable snapshot: refresh replaces the whole value, never individual
/// fields, so concurrent readers always observe a fully-formed set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// Account the token was issued for.
    pub user_id: String,
    /// Bearer token for subsequent calls.
    pub access_token: String,
    /// Expiry as unix seconds.
    pub expires_at: u64,
}

/// Identity triple carried by every Tractive entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRef {
    /// Entity ID.
    #[serde(rename = "_id")]
    pub id: String,
    /// Entity type, e.g. `tracker` or `pet`.
    #[serde(rename = "_type")]
    pub kind: String,
    /// Revision counter.
    #[serde(rename = "_version", default)]
    pub version: Option<String>,
}

/// A decoded record from the event channel.
///
/// Events are forwarded verbatim; this newtype only adds accessors for the
/// discriminator fields the channel itself inspects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelEvent(pub serde_json::Value);

impl ChannelEvent {
    /// The `message` discriminator, if present.
    pub fn message(&self) -> Option<&str> {
        self.0.get("message").and_then(|v| v.as_str())
    }

    /// The `type` discriminator, if present.
    pub fn kind(&self) -> Option<&str> {
        self.0.get("type").and_then(|v| v.as_str())
    }

    /// Access the underlying JSON value.
    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    /// Consume the event, returning the underlying JSON value.
    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

/// Body of a successful response from an untyped endpoint.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Parsed JSON (the response declared a JSON content type).
    Json(serde_json::Value),
    /// Raw bytes for any other content type.
    Bytes(Bytes),
}

impl Payload {
    /// The JSON value, if this payload is JSON.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Bytes(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn channel_event_discriminators() {
        let keep_alive = ChannelEvent(json!({"message": "keep-alive"}));
        assert_eq!(keep_alive.message(), Some("keep-alive"));
        assert_eq!(keep_alive.kind(), None);

        let position = ChannelEvent(json!({"type": "tracker_position", "lat": 1.0}));
        assert_eq!(position.message(), None);
        assert_eq!(position.kind(), Some("tracker_position"));
    }

    #[test]
    fn entity_ref_deserializes_underscore_fields() {
        let json = json!({"_id": "TRK1", "_type": "tracker", "_version": "5"});
        let entity: EntityRef = serde_json::from_value(json).unwrap();
        assert_eq!(entity.id, "TRK1");
        assert_eq!(entity.kind, "tracker");
        assert_eq!(entity.version.as_deref(), Some("5"));
    }

    #[test]
    fn entity_ref_tolerates_missing_version() {
        let json = json!({"_id": "TRK1", "_type": "tracker"});
        let entity: EntityRef = serde_json::from_value(json).unwrap();
        assert!(entity.version.is_none());
    }
}
