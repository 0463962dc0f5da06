//! # Server-Side Interceptors
//!
//! Wrappers for incoming unary and streaming calls: extract the caller's
//! trace context from the request metadata, bracket handler execution with a
//! server-kind span, hand the handler a context that attaches its own spans
//! to the call, and record the outcome. The handler's result is returned
//! unchanged.

use std::fmt;
use std::future::Future;
use std::time::Instant;

use opentelemetry::trace::{SpanKind, TraceContextExt as _, Tracer as _};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::Tracer;
use opentelemetry_semantic_conventions::attribute::{RPC_SERVICE, RPC_SYSTEM};
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status};

use super::stream::{ServerStream, TracedServerStream};
use super::{status_message, ATTR_DURATION_MS, ATTR_PAYLOAD, ATTR_RESPONSE, RPC_SYSTEM_GRPC};
use crate::propagation;
use crate::span::SpanGuard;

/// Instruments incoming calls with context extraction and a bracketing span.
pub struct ServerInterceptor {
    tracer: Tracer,
}

impl ServerInterceptor {
    /// Creates an interceptor that starts spans from the given tracer.
    pub fn new(tracer: Tracer) -> Self {
        Self { tracer }
    }

    /// Runs a unary handler under a server-kind span.
    ///
    /// Metadata without trace fields extracts to a span with no remote
    /// parent, never an error. A status-carrying handler error sets the
    /// span status from the status message; the span ends exactly once and
    /// the handler's result passes through unchanged.
    pub async fn unary<Req, Resp, F, Fut>(
        &self,
        method: &str,
        request: Request<Req>,
        handler: F,
    ) -> Result<Response<Resp>, Status>
    where
        Req: fmt::Debug,
        Resp: fmt::Debug,
        F: FnOnce(Context, Request<Req>) -> Fut,
        Fut: Future<Output = Result<Response<Resp>, Status>>,
    {
        let started = Instant::now();
        let parent = propagation::extract_metadata(&Context::new(), request.metadata());
        tracing::info!(method, "incoming request");

        let span = self
            .tracer
            .span_builder(method.to_owned())
            .with_kind(SpanKind::Server)
            .with_attributes([
                KeyValue::new(RPC_SERVICE, method.to_owned()),
                KeyValue::new(ATTR_PAYLOAD, format!("{:?}", request.get_ref())),
            ])
            .start_with_context(&self.tracer, &parent);
        let handler_cx = parent.with_span(span);
        let mut span = SpanGuard::new(handler_cx.clone());

        let result = handler(handler_cx, request).await;
        if let Err(status) = &result {
            span.record_error(status);
            span.set_error_status(status_message(status));
        }

        let mut attributes = vec![KeyValue::new(
            ATTR_DURATION_MS,
            started.elapsed().as_millis() as i64,
        )];
        if let Ok(response) = &result {
            attributes.push(KeyValue::new(
                ATTR_RESPONSE,
                format!("{:?}", response.get_ref()),
            ));
        }
        span.set_attributes(attributes);
        span.end();
        result
    }

    /// Runs a streaming handler under a server-kind span.
    ///
    /// The handler receives a [`TracedServerStream`] whose
    /// [`context`](TracedServerStream::context) is the span-bearing derived
    /// context; nested spans started from it attach to the server span. The
    /// interceptor owns span termination and ends it after the handler frame
    /// returns.
    pub async fn streaming<S, F, Fut>(
        &self,
        method: &str,
        metadata: &MetadataMap,
        stream: S,
        handler: F,
    ) -> Result<(), Status>
    where
        S: ServerStream,
        F: FnOnce(TracedServerStream<S>) -> Fut,
        Fut: Future<Output = Result<(), Status>>,
    {
        let started = Instant::now();
        let parent = propagation::extract_metadata(&Context::new(), metadata);

        let span = self
            .tracer
            .span_builder(method.to_owned())
            .with_kind(SpanKind::Server)
            .with_attributes([
                KeyValue::new(RPC_SYSTEM, RPC_SYSTEM_GRPC),
                KeyValue::new(RPC_SERVICE, method.to_owned()),
            ])
            .start_with_context(&self.tracer, &parent);
        let handler_cx = parent.with_span(span);
        let mut span = SpanGuard::new(handler_cx.clone());

        let result = handler(TracedServerStream::new(stream, handler_cx)).await;
        if let Err(status) = &result {
            span.record_error(status);
            span.set_error_status(status_message(status));
        }

        span.set_attributes([KeyValue::new(
            ATTR_DURATION_MS,
            started.elapsed().as_millis() as i64,
        )]);
        span.end();
        result
    }
}
