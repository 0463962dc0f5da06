//! # Broker Collaborator Contract
//!
//! The narrow interface this crate consumes from an AMQP-style broker client.
//! The real client (connection and channel management, exchange and queue
//! declaration, wire framing) lives outside this crate; an adapter implements
//! [`Channel`] and [`Delivery`] over it and maps the client's failures into
//! [`BrokerError`]. Nothing here is broker-specific beyond the shape of the
//! contract: a byte payload, a string-keyed header table, and the three
//! terminal disposition calls.

use std::collections::BTreeMap;

use async_trait::async_trait;
use snafu::Snafu;
use tokio::sync::mpsc;

/// Error surfaced by the underlying broker client through the adapter.
#[derive(Debug, Snafu)]
#[snafu(display("{message}"))]
pub struct BrokerError {
    message: String,
}

impl BrokerError {
    /// Creates an error carrying the underlying client's failure text.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A single value in a message header table.
///
/// AMQP header tables are not string-only; trace extraction cares only about
/// the string variant and treats everything else as absent.
#[derive(Clone, Debug, PartialEq)]
pub enum HeaderValue {
    /// UTF-8 text.
    Str(String),
    /// Signed integer.
    Int(i64),
    /// Boolean flag.
    Bool(bool),
    /// Opaque bytes.
    Bytes(Vec<u8>),
}

impl HeaderValue {
    /// The contained string, or `None` for any non-string variant.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) => Some(value),
            _ => None,
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// A message header table: unique string keys, order irrelevant.
pub type Headers = BTreeMap<String, HeaderValue>;

/// One message received from a subscription.
///
/// Every delivery must eventually receive exactly one terminal disposition:
/// [`ack`](Delivery::ack), [`nack`](Delivery::nack) or
/// [`reject`](Delivery::reject). The broker client owns redelivery semantics;
/// this crate passes the disposition through unchanged.
#[async_trait]
pub trait Delivery: Send + 'static {
    /// The message body.
    fn payload(&self) -> &[u8];

    /// The message header table, if the publisher attached one.
    fn headers(&self) -> Option<&Headers>;

    /// Acknowledges this delivery (and all earlier ones when `multiple`).
    async fn ack(&mut self, multiple: bool) -> Result<(), BrokerError>;

    /// Negatively acknowledges this delivery, optionally requeueing it.
    async fn nack(&mut self, multiple: bool, requeue: bool) -> Result<(), BrokerError>;

    /// Rejects this delivery, optionally requeueing it.
    async fn reject(&mut self, requeue: bool) -> Result<(), BrokerError>;
}

/// An open broker channel capable of subscribing and publishing.
#[async_trait]
pub trait Channel: Send + Sync {
    /// The delivery type this channel yields.
    type Delivery: Delivery;

    /// Starts consuming `routing_key` and returns the stream of raw
    /// deliveries. The receiver closes when the subscription is torn down
    /// on the broker side.
    async fn subscribe(
        &self,
        routing_key: &str,
    ) -> Result<mpsc::Receiver<Self::Delivery>, BrokerError>;

    /// Publishes one message.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        headers: Headers,
        content_type: &str,
    ) -> Result<(), BrokerError>;
}
