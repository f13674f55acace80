//! Validating publisher
//!
//! Wraps a payload in a fresh envelope, checks it against the schema
//! registry and hands it to the broker with persistent delivery. Nothing
//! leaves this process without passing the published schema for its
//! `(name, version)` pair.
//!
//! Publish is best-effort at-least-once: the broker may redeliver if a
//! producer crashes between the broker persisting and acknowledging. There
//! is no internal retry; a transport failure surfaces to the caller.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::events::{Envelope, EnvelopeError, EventName};
use crate::registry::{SchemaError, SchemaRegistry};

use super::{BrokerError, MessageBroker};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("event failed schema validation: {0}")]
    InvalidSchema(#[from] SchemaError),

    #[error("broker transport failure: {0}")]
    Transport(#[from] BrokerError),

    #[error("could not encode event: {0}")]
    Encode(#[from] EnvelopeError),
}

pub struct EventPublisher {
    broker: Arc<dyn MessageBroker>,
    registry: Arc<SchemaRegistry>,
    producer: String,
}

impl EventPublisher {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        registry: Arc<SchemaRegistry>,
        producer: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            registry,
            producer: producer.into(),
        }
    }

    /// Publish `payload` as `name` at its current schema version, to the
    /// exchange that owns the event. Returns the envelope id for
    /// correlation.
    pub async fn publish<T: Serialize>(
        &self,
        name: EventName,
        payload: &T,
    ) -> Result<Uuid, PublishError> {
        self.publish_with(name, name.current_version(), name.exchange(), payload)
            .await
    }

    /// Publish with an explicit schema version and destination exchange.
    pub async fn publish_with<T: Serialize>(
        &self,
        name: EventName,
        version: u32,
        exchange: &str,
        payload: &T,
    ) -> Result<Uuid, PublishError> {
        let envelope = Envelope::with_version(name, version, payload, &self.producer)?;
        let document = serde_json::to_value(&envelope)
            .map_err(EnvelopeError::from)?;

        debug!(
            routing_key = %envelope.meta.name,
            version,
            exchange,
            "validating outgoing event"
        );
        self.registry
            .validate(&document, &envelope.meta.name, version)
            .await?;

        // Idempotent durable declaration, then persistent delivery.
        self.broker.declare_exchange(exchange).await?;
        let body = envelope.to_bytes()?;
        self.broker
            .publish(exchange, &envelope.meta.name, body, true)
            .await?;

        info!(
            event_id = %envelope.meta.id,
            routing_key = %envelope.meta.name,
            exchange,
            "event published"
        );
        Ok(envelope.meta.id)
    }
}
