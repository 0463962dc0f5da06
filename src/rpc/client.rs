//! # Client-Side Interceptors
//!
//! Wrappers for outgoing unary and streaming calls: inject the active trace
//! context into the call's metadata, bracket the call (or the stream's
//! lifetime) with a span, and record the outcome. The actual dial and wire
//! exchange stay with the caller-supplied closure; instrumentation never
//! changes the call's result.

use std::fmt;
use std::future::Future;
use std::time::Instant;

use opentelemetry::trace::{SpanKind, TraceContextExt as _, Tracer as _};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::Tracer;
use opentelemetry_semantic_conventions::attribute::{RPC_METHOD, RPC_SYSTEM};
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status};

use super::stream::{ClientStream, TracedClientStream};
use super::{ATTR_DURATION_MS, ATTR_PAYLOAD, ATTR_PEER_ADDRESS, RPC_SYSTEM_GRPC};
use crate::propagation;
use crate::span::SpanGuard;

/// Instruments outgoing calls with context injection and a bracketing span.
pub struct ClientInterceptor {
    tracer: Tracer,
}

impl ClientInterceptor {
    /// Creates an interceptor that starts spans from the given tracer.
    pub fn new(tracer: Tracer) -> Self {
        Self { tracer }
    }

    /// Invokes a unary call under a span named by its fully-qualified
    /// method.
    ///
    /// The trace context is injected into the request metadata before
    /// `invoke` runs. Any error is recorded on the span and marks its
    /// status; the span ends exactly once on return, and the call's result
    /// is passed through unchanged.
    pub async fn unary<Req, Resp, F, Fut>(
        &self,
        cx: &Context,
        method: &str,
        target: &str,
        mut request: Request<Req>,
        invoke: F,
    ) -> Result<Response<Resp>, Status>
    where
        Req: fmt::Debug,
        F: FnOnce(Context, Request<Req>) -> Fut,
        Fut: Future<Output = Result<Response<Resp>, Status>>,
    {
        let started = Instant::now();
        let span = self.tracer.start_with_context(method.to_owned(), cx);
        let call_cx = cx.with_span(span);
        let mut span = SpanGuard::new(call_cx.clone());

        propagation::inject_metadata(&call_cx, request.metadata_mut());
        let payload = format!("{:?}", request.get_ref());

        let result = invoke(call_cx, request).await;
        if let Err(status) = &result {
            span.record_error(status);
            span.set_error_status(status.to_string());
        }

        span.set_attributes([
            KeyValue::new(RPC_SYSTEM, RPC_SYSTEM_GRPC),
            KeyValue::new(RPC_METHOD, method.to_owned()),
            KeyValue::new(ATTR_PEER_ADDRESS, target.to_owned()),
            KeyValue::new(ATTR_DURATION_MS, started.elapsed().as_millis() as i64),
            KeyValue::new(ATTR_PAYLOAD, payload),
        ]);
        span.end();
        result
    }

    /// Establishes a streaming call under a client-kind span.
    ///
    /// `establish` receives the derived context and a metadata map already
    /// carrying the trace fields. On establishment failure the error is
    /// recorded, the span ends immediately and the failure propagates with
    /// no stream returned. On success span termination is deferred to the
    /// returned [`TracedClientStream`].
    #[allow(tail_expr_drop_order)]
    pub async fn streaming<S, F, Fut>(
        &self,
        cx: &Context,
        method: &str,
        target: &str,
        establish: F,
    ) -> Result<TracedClientStream<S>, Status>
    where
        S: ClientStream,
        F: FnOnce(Context, MetadataMap) -> Fut,
        Fut: Future<Output = Result<S, Status>>,
    {
        let started = Instant::now();
        let span = self
            .tracer
            .span_builder(method.to_owned())
            .with_kind(SpanKind::Client)
            .start_with_context(&self.tracer, cx);
        let call_cx = cx.with_span(span);
        let mut span = SpanGuard::new(call_cx.clone());

        let mut metadata = MetadataMap::new();
        propagation::inject_metadata(&call_cx, &mut metadata);

        match establish(call_cx, metadata).await {
            Ok(stream) => {
                span.set_attributes([
                    KeyValue::new(RPC_METHOD, method.to_owned()),
                    KeyValue::new(RPC_SYSTEM, RPC_SYSTEM_GRPC),
                    KeyValue::new(ATTR_PEER_ADDRESS, target.to_owned()),
                ]);
                Ok(TracedClientStream::new(stream, span, started))
            }
            Err(status) => {
                span.record_error(&status);
                span.set_error_status(status.to_string());
                span.end();
                Err(status)
            }
        }
    }
}
