//! Broker module
//!
//! The messaging seam: a [`MessageBroker`] trait with topic-exchange
//! semantics, the in-process implementation used by this service and its
//! tests, the validating [`publisher::EventPublisher`] and the
//! [`consumer::ConsumerDispatcher`] that drives event handlers.

pub mod consumer;
pub mod memory;
pub mod publisher;
pub mod topic;

use async_trait::async_trait;
use thiserror::Error;

pub use consumer::{ConsumerConfig, ConsumerDispatcher, DispatchOutcome, EventHandler, HandlerError};
pub use memory::InProcessBroker;
pub use publisher::{EventPublisher, PublishError};

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("unknown exchange '{0}'")]
    UnknownExchange(String),

    #[error("unknown queue '{0}'")]
    UnknownQueue(String),

    #[error("broker connection closed")]
    Closed,
}

/// One message handed to a consumer, pending ack or requeue.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    /// 1 on first delivery, incremented each time the message is requeued.
    pub delivery_count: u32,
}

/// Minimal broker surface with topic-exchange semantics.
///
/// Declarations are idempotent: re-declaring an existing durable exchange
/// or queue is a no-op, which lets every service re-declare its topology on
/// restart. Delivery is at-least-once; consumers own deduplication.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Declare a durable topic exchange.
    async fn declare_exchange(&self, name: &str) -> Result<(), BrokerError>;

    /// Declare a durable queue.
    async fn declare_queue(&self, name: &str) -> Result<(), BrokerError>;

    /// Bind a queue to an exchange with a routing-key pattern
    /// (`*` one word, `#` zero or more).
    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        pattern: &str,
    ) -> Result<(), BrokerError>;

    /// Publish one message. `persistent` asks the transport to survive a
    /// broker restart; a message matching no binding is silently unrouted.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
        persistent: bool,
    ) -> Result<(), BrokerError>;

    /// Wait for the next message on `queue`. One consumer at a time per
    /// queue; the caller must settle the delivery before asking again.
    async fn receive(&self, queue: &str) -> Result<Delivery, BrokerError>;

    /// Settle a delivery as consumed.
    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Return a delivery to its queue with an incremented delivery count.
    async fn nack_requeue(&self, delivery: &Delivery) -> Result<(), BrokerError>;
}
