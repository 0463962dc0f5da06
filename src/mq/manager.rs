//! # Traced Consume and Publish
//!
//! The per-subscription consume loop and the publish operation, each
//! bracketed by a span whose lifetime matches the in-flight operation. On the
//! consume side a span stays open for as long as its delivery is undecided
//! and is closed by the delivery's terminal disposition; on the publish side
//! the span brackets the send call itself.

use std::convert::Infallible;
use std::future::Future;

use opentelemetry::trace::{TraceContextExt as _, Tracer as _};
use opentelemetry::Context;
use opentelemetry_sdk::trace::Tracer;
use snafu::{ResultExt as _, Snafu};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::broker::{BrokerError, Channel, Delivery, Headers};
use crate::propagation;
use crate::span::SpanGuard;

/// Content type stamped on every published message.
const CONTENT_TYPE: &str = "application/json";

/// Capacity of the channel handed to callers in channel-mode consumption.
const DELIVERY_BUFFER: usize = 1;

/// Consume-loop failure.
#[derive(Debug, Snafu)]
pub enum Error<E = Infallible>
where
    E: std::error::Error + 'static,
{
    /// The broker rejected the subscription; no loop was started.
    #[snafu(display("could not subscribe to {routing_key}: {source}"))]
    Subscribe {
        /// Routing key the subscription was requested for.
        routing_key: String,
        /// The broker's failure.
        source: BrokerError,
    },

    /// A callback-mode handler rejected a delivery; the loop stopped.
    #[snafu(display("handler failed while consuming {routing_key}: {source}"))]
    Handler {
        /// Routing key of the subscription the handler was serving.
        routing_key: String,
        /// The handler's failure.
        source: E,
    },
}

/// One inbound message together with its derived context and span.
///
/// The span stays open until the consumer decides the delivery's fate.
/// Disposition methods consume `self`, so each delivery is decided at most
/// once and the span is terminated exactly once. A `TracedDelivery` dropped
/// without a disposition (a cancelled subscription, a dropped receiver)
/// force-ends its span with a `cancelled` error status rather than leaking
/// it.
pub struct TracedDelivery<D> {
    span: SpanGuard,
    message: D,
}

impl<D: Delivery> TracedDelivery<D> {
    fn new(cx: Context, message: D) -> Self {
        Self {
            span: SpanGuard::new(cx),
            message,
        }
    }

    /// The context carrying this delivery's span, for starting child spans.
    pub fn context(&self) -> &Context {
        self.span.context()
    }

    /// The message body.
    pub fn payload(&self) -> &[u8] {
        self.message.payload()
    }

    /// The message header table, if the publisher attached one.
    pub fn headers(&self) -> Option<&Headers> {
        self.message.headers()
    }

    /// The raw delivery.
    pub fn message(&self) -> &D {
        &self.message
    }

    /// Acknowledges the delivery and ends its span.
    pub async fn ack(mut self, multiple: bool) -> Result<(), BrokerError> {
        let result = self.message.ack(multiple).await;
        self.span.end();
        result
    }

    /// Negatively acknowledges the delivery and ends its span.
    pub async fn nack(mut self, multiple: bool, requeue: bool) -> Result<(), BrokerError> {
        let result = self.message.nack(multiple, requeue).await;
        self.span.end();
        result
    }

    /// Rejects the delivery and ends its span.
    pub async fn reject(mut self, requeue: bool) -> Result<(), BrokerError> {
        let result = self.message.reject(requeue).await;
        self.span.end();
        result
    }
}

impl<D> Drop for TracedDelivery<D> {
    fn drop(&mut self) {
        if !self.span.is_ended() {
            self.span.set_error_status("cancelled");
            self.span.end();
        }
    }
}

/// Instrumented front for one broker channel.
///
/// Every span the manager starts comes from the injected tracer handle; the
/// manager never consults global state.
pub struct Manager<C> {
    channel: C,
    tracer: Tracer,
}

impl<C: Channel + 'static> Manager<C> {
    /// Wraps a broker channel with the tracer that will own its spans.
    pub fn new(channel: C, tracer: Tracer) -> Self {
        Self { channel, tracer }
    }

    /// Subscribes to `routing_key` and returns a stream of traced
    /// deliveries.
    ///
    /// A background task pulls raw deliveries in arrival order, extracts the
    /// publisher's trace context from each header table, opens a
    /// `Consume <routing-key>` span and hands the wrapped delivery to the
    /// returned receiver. Span closure is deferred to the consumer's
    /// disposition call. Cancelling `cancel` stops the pull loop and closes
    /// the receiver; so does the broker closing the raw delivery stream.
    pub async fn consume(
        &self,
        cx: &Context,
        cancel: CancellationToken,
        routing_key: &str,
    ) -> Result<mpsc::Receiver<TracedDelivery<C::Delivery>>, Error> {
        let mut deliveries = self
            .channel
            .subscribe(routing_key)
            .await
            .context(SubscribeSnafu { routing_key })?;

        let (tx, rx) = mpsc::channel(DELIVERY_BUFFER);
        let tracer = self.tracer.clone();
        let ambient = cx.clone();
        let routing_key = routing_key.to_owned();

        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = cancel.cancelled() => return,
                    message = deliveries.recv() => match message {
                        Some(message) => message,
                        None => return,
                    },
                };

                let delivery_cx = delivery_context(&tracer, &ambient, &routing_key, &message);
                let traced = TracedDelivery::new(delivery_cx, message);

                // An undelivered TracedDelivery force-ends its span on drop,
                // so losing the race here cannot leak it.
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    sent = tx.send(traced) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }

    /// Subscribes to `routing_key` and runs `handler` for every delivery.
    ///
    /// The handler receives the span-bearing derived context and the raw
    /// delivery; the iteration's span is closed before the next delivery is
    /// pulled, whatever the handler returns. A handler error stops the loop
    /// and is propagated; no further deliveries are pulled. Returns `Ok(())`
    /// on cancellation or when the broker closes the raw delivery stream.
    pub async fn consume_with<F, Fut, E>(
        &self,
        cx: &Context,
        cancel: CancellationToken,
        routing_key: &str,
        mut handler: F,
    ) -> Result<(), Error<E>>
    where
        F: FnMut(Context, C::Delivery) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let mut deliveries = self
            .channel
            .subscribe(routing_key)
            .await
            .context(SubscribeSnafu { routing_key })?;

        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                message = deliveries.recv() => match message {
                    Some(message) => message,
                    None => return Ok(()),
                },
            };

            let delivery_cx = delivery_context(&self.tracer, cx, routing_key, &message);
            let mut span = SpanGuard::new(delivery_cx.clone());

            let result = handler(delivery_cx, message).await;
            if let Err(error) = result {
                span.record_error(&error);
                span.set_error_status(error.to_string());
                span.end();
                return Err(error).context(HandlerSnafu { routing_key });
            }
            span.end();
        }
    }

    /// Publishes `payload` with the active trace context in its headers.
    ///
    /// A `Publish <routing-key>` span brackets the send and is ended on every
    /// exit path; the broker's error, if any, is returned unmodified.
    pub async fn publish(
        &self,
        cx: &Context,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), BrokerError> {
        let span = self
            .tracer
            .start_with_context(format!("Publish {routing_key}"), cx);
        let mut span = SpanGuard::new(cx.with_span(span));

        let mut headers = Headers::new();
        propagation::inject_headers(span.context(), &mut headers);
        tracing::debug!(exchange, routing_key, ?headers, "publishing message");

        let result = self
            .channel
            .publish(exchange, routing_key, payload, headers, CONTENT_TYPE)
            .await;
        if let Err(error) = &result {
            span.record_error(error);
            span.set_error_status(error.to_string());
        }
        span.end();
        result
    }
}

/// Builds the span-bearing context for one raw delivery: extract the
/// publisher's context from the headers, then start the consume span under
/// it.
fn delivery_context<D: Delivery>(
    tracer: &Tracer,
    ambient: &Context,
    routing_key: &str,
    message: &D,
) -> Context {
    let parent = match message.headers() {
        Some(headers) => propagation::extract_headers(ambient, headers),
        None => ambient.clone(),
    };
    let span = tracer.start_with_context(format!("Consume {routing_key}"), &parent);
    parent.with_span(span)
}
