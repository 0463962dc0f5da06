//! # Message-Queue Instrumentation
//!
//! Consume and publish operations over a broker channel, with the publisher's
//! trace context carried in message headers and one span per in-flight
//! delivery. The broker client itself is an external collaborator reached
//! through the narrow [`broker`] contract; this module owns the control flow
//! that interleaves context extraction, span creation, handler invocation and
//! span closure.
//!
//! ```ignore
//! let manager = tracelink::mq::Manager::new(channel, tracer);
//! let mut deliveries = manager.consume(&cx, cancel, "orders.created").await?;
//! while let Some(delivery) = deliveries.recv().await {
//!     handle(delivery.context(), delivery.payload()).await;
//!     delivery.ack(false).await?;
//! }
//! ```

pub mod broker;
mod manager;

pub use manager::{Error, Manager, TracedDelivery};
