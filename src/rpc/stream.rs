//! # Traced Stream Wrappers
//!
//! Narrow contracts for the two stream shapes the RPC runtime exposes, and
//! the decorators that map stream events onto the call's span. A clean
//! end-of-data signal on receive (`Ok(None)`) is normal completion, never an
//! error; true transport errors are recorded and mark the span status.

use std::time::Instant;

use async_trait::async_trait;
use opentelemetry::trace::TraceContextExt as _;
use opentelemetry::{Context, KeyValue};
use tonic::metadata::MetadataMap;
use tonic::Status;

use super::ATTR_DURATION_MS;
use crate::span::SpanGuard;

/// Client half of a bidirectional stream, as seen by this crate.
///
/// `recv` returning `Ok(None)` is the clean end-of-data signal. An adapter
/// implements this over the runtime's request sink and response stream.
#[async_trait]
pub trait ClientStream: Send {
    /// Message type received from the server.
    type Recv: Send;
    /// Message type sent to the server.
    type Sent: Send;

    /// Receives the next message, `Ok(None)` at end of data.
    async fn recv(&mut self) -> Result<Option<Self::Recv>, Status>;

    /// Sends one message.
    async fn send(&mut self, message: Self::Sent) -> Result<(), Status>;

    /// Closes the sending half of the stream.
    async fn close_send(&mut self) -> Result<(), Status>;

    /// Retrieves the server's initial metadata.
    async fn header(&mut self) -> Result<MetadataMap, Status>;
}

/// Server half of a bidirectional stream, as seen by this crate.
#[async_trait]
pub trait ServerStream: Send {
    /// Message type received from the client.
    type Recv: Send;
    /// Message type sent to the client.
    type Sent: Send;

    /// Receives the next message, `Ok(None)` at end of data.
    async fn recv(&mut self) -> Result<Option<Self::Recv>, Status>;

    /// Sends one message.
    async fn send(&mut self, message: Self::Sent) -> Result<(), Status>;
}

/// Client stream decorated with span bookkeeping.
///
/// Owns its span: the span ends when the stream's lifecycle naturally
/// terminates, either through end-of-data on receive or through
/// [`close_send`](TracedClientStream::close_send). Dropping the wrapper
/// without either also ends the span.
#[derive(Debug)]
pub struct TracedClientStream<S> {
    inner: S,
    span: SpanGuard,
    started: Instant,
}

impl<S: ClientStream> TracedClientStream<S> {
    pub(crate) fn new(inner: S, span: SpanGuard, started: Instant) -> Self {
        Self {
            inner,
            span,
            started,
        }
    }

    /// Receives the next message.
    ///
    /// End of data ends the span as normal completion; an error is recorded
    /// and marks the span status but leaves termination to the stream's
    /// lifecycle.
    pub async fn recv(&mut self) -> Result<Option<S::Recv>, Status> {
        let result = self.inner.recv().await;
        match &result {
            Ok(Some(_)) => {}
            Ok(None) => self.finish(),
            Err(status) => self.catch(status),
        }
        result
    }

    /// Sends one message, recording any error on the span.
    pub async fn send(&mut self, message: S::Sent) -> Result<(), Status> {
        let result = self.inner.send(message).await;
        if let Err(status) = &result {
            self.catch(status);
        }
        result
    }

    /// Closes the sending half and ends the span, whatever the outcome.
    pub async fn close_send(&mut self) -> Result<(), Status> {
        let result = self.inner.close_send().await;
        if let Err(status) = &result {
            self.catch(status);
        }
        self.finish();
        result
    }

    /// Retrieves the server's initial metadata, recording any error.
    pub async fn header(&mut self) -> Result<MetadataMap, Status> {
        let result = self.inner.header().await;
        if let Err(status) = &result {
            self.catch(status);
        }
        result
    }

    /// The wrapped stream.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// The wrapped stream, mutably.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    fn catch(&self, status: &Status) {
        self.span.record_error(status);
        self.span.set_error_status(status.to_string());
    }

    fn finish(&mut self) {
        self.span.set_attributes([KeyValue::new(
            ATTR_DURATION_MS,
            self.started.elapsed().as_millis() as i64,
        )]);
        self.span.end();
    }
}

/// Server stream decorated with span bookkeeping.
///
/// Does not own its span: errors on receive and send are recorded, but
/// termination belongs to the enclosing interceptor, which ends the span
/// when the handler frame returns.
pub struct TracedServerStream<S> {
    inner: S,
    cx: Context,
}

impl<S: ServerStream> TracedServerStream<S> {
    pub(crate) fn new(inner: S, cx: Context) -> Self {
        Self { inner, cx }
    }

    /// The derived context carrying the server span.
    ///
    /// Spans started from this context inside the handler attach to the
    /// server span, not to whatever the raw stream carried.
    pub fn context(&self) -> &Context {
        &self.cx
    }

    /// Receives the next message, recording any error on the server span.
    pub async fn recv(&mut self) -> Result<Option<S::Recv>, Status> {
        let result = self.inner.recv().await;
        if let Err(status) = &result {
            self.cx.span().record_error(status);
        }
        result
    }

    /// Sends one message, recording any error on the server span.
    pub async fn send(&mut self, message: S::Sent) -> Result<(), Status> {
        let result = self.inner.send(message).await;
        if let Err(status) = &result {
            self.cx.span().record_error(status);
        }
        result
    }

    /// The wrapped stream.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// The wrapped stream, mutably.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}
