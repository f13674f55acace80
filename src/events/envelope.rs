//! Event envelope codec
//!
//! Every message on the wire is a JSON envelope with a `meta` block and a
//! `data` payload. `meta.version` and `meta.name` drive schema resolution,
//! so an envelope missing either is rejected before validation is even
//! attempted, with an error distinct from a schema failure.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use super::names::EventName;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("envelope is missing required meta field '{0}'")]
    MissingMeta(&'static str),

    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Metadata block carried by every event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventMeta {
    /// Unique id of this emission, minted at publish time.
    pub id: Uuid,
    /// Schema version the payload claims to conform to.
    pub version: u32,
    /// Event name, identical to the routing key (`Users.Created`).
    pub name: String,
    /// Producer-side wall clock time, RFC 3339.
    pub time: DateTime<Utc>,
    /// Human-readable producer identity for tracing.
    pub producer: String,
}

/// A decoded event: metadata plus the raw payload.
///
/// The payload stays as [`Value`] until a handler asks for a typed view;
/// dispatch must be able to route and dead-letter events it cannot parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub meta: EventMeta,
    pub data: Value,
}

impl Envelope {
    /// Wrap a payload for publication under `name` at the current schema
    /// version, minting a fresh event id and timestamp.
    pub fn new<T: Serialize>(
        name: EventName,
        payload: &T,
        producer: &str,
    ) -> Result<Self, EnvelopeError> {
        Ok(Self {
            meta: EventMeta {
                id: Uuid::new_v4(),
                version: name.current_version(),
                name: name.routing_key().to_string(),
                time: Utc::now(),
                producer: producer.to_string(),
            },
            data: serde_json::to_value(payload)?,
        })
    }

    /// Same as [`Envelope::new`] but pinned to an explicit schema version.
    pub fn with_version<T: Serialize>(
        name: EventName,
        version: u32,
        payload: &T,
        producer: &str,
    ) -> Result<Self, EnvelopeError> {
        let mut envelope = Self::new(name, payload, producer)?;
        envelope.meta.version = version;
        Ok(envelope)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a wire message.
    ///
    /// Missing `meta`, `meta.name` or `meta.version` is reported as
    /// [`EnvelopeError::MissingMeta`] so the dispatcher can distinguish a
    /// broken envelope from a payload that fails its schema.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let raw: Value = serde_json::from_slice(bytes)?;
        let meta = raw.get("meta").ok_or(EnvelopeError::MissingMeta("meta"))?;
        if meta.get("name").is_none() {
            return Err(EnvelopeError::MissingMeta("name"));
        }
        if meta.get("version").is_none() {
            return Err(EnvelopeError::MissingMeta("version"));
        }
        Ok(serde_json::from_value(raw)?)
    }

    /// Deserialize the payload into a typed view.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, EnvelopeError> {
        Ok(serde_json::from_value(self.data.clone())?)
    }

    /// The parsed event name, if this system knows it.
    pub fn event_name(&self) -> Option<EventName> {
        EventName::parse(&self.meta.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct Probe {
        public_id: Uuid,
    }

    #[test]
    fn test_new_envelope_carries_current_version() {
        let payload = Probe {
            public_id: Uuid::new_v4(),
        };
        let envelope = Envelope::new(EventName::UserCreated, &payload, "auth").unwrap();
        assert_eq!(envelope.meta.version, 2);
        assert_eq!(envelope.meta.name, "Users.Created");
        assert_eq!(envelope.meta.producer, "auth");
    }

    #[test]
    fn test_round_trip() {
        let payload = Probe {
            public_id: Uuid::new_v4(),
        };
        let envelope = Envelope::new(EventName::TaskCompleted, &payload, "tasks").unwrap();
        let bytes = envelope.to_bytes().unwrap();
        let decoded = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.meta.id, envelope.meta.id);
        assert_eq!(decoded.meta.version, 1);
        assert_eq!(decoded.event_name(), Some(EventName::TaskCompleted));
    }

    #[test]
    fn test_missing_name_is_a_meta_error() {
        let raw = json!({
            "meta": {
                "id": Uuid::new_v4(),
                "version": 1,
                "time": Utc::now(),
                "producer": "auth",
            },
            "data": {},
        });
        let err = Envelope::from_bytes(&serde_json::to_vec(&raw).unwrap()).unwrap_err();
        assert!(matches!(err, EnvelopeError::MissingMeta("name")));
    }

    #[test]
    fn test_missing_version_is_a_meta_error() {
        let raw = json!({
            "meta": {
                "id": Uuid::new_v4(),
                "name": "Users.Created",
                "time": Utc::now(),
                "producer": "auth",
            },
            "data": {},
        });
        let err = Envelope::from_bytes(&serde_json::to_vec(&raw).unwrap()).unwrap_err();
        assert!(matches!(err, EnvelopeError::MissingMeta("version")));
    }

    #[test]
    fn test_garbage_bytes_are_malformed() {
        let err = Envelope::from_bytes(b"not json at all").unwrap_err();
        assert!(matches!(err, EnvelopeError::Malformed(_)));
    }
}
