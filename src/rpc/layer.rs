//! # Tower Registration Point
//!
//! A [`tower::Layer`] for tonic servers that brackets every inbound request
//! with a server-kind span, extracting the W3C trace context from the HTTP
//! headers the gRPC call rides on. This is the transport-level registration
//! hook; handler-level instrumentation (derived contexts, status
//! translation) lives in [`super::server`].

use std::task::{Context as TaskContext, Poll};

use opentelemetry::propagation::{Extractor, TextMapPropagator as _};
use opentelemetry::trace::{SpanKind, TraceContextExt as _, Tracer as _};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::Tracer;
use opentelemetry_semantic_conventions::attribute::{RPC_SERVICE, RPC_SYSTEM};
use tower::{Layer, Service};

use super::RPC_SYSTEM_GRPC;
use crate::span::SpanGuard;

/// Reads trace fields from HTTP request headers.
struct HeaderExtractor<'a>(&'a http::HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|key| key.as_str()).collect()
    }
}

/// Layer that wraps a service with per-request server spans.
#[derive(Clone)]
pub struct TraceLayer {
    tracer: Tracer,
}

impl TraceLayer {
    /// Creates a layer that starts spans from the given tracer.
    pub fn new(tracer: Tracer) -> Self {
        Self { tracer }
    }
}

impl<S> Layer<S> for TraceLayer {
    type Service = TraceService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TraceService {
            inner,
            tracer: self.tracer.clone(),
        }
    }
}

/// Service produced by [`TraceLayer`].
#[derive(Clone)]
pub struct TraceService<S> {
    inner: S,
    tracer: Tracer,
}

impl<S, B> Service<http::Request<B>> for TraceService<S>
where
    S: Service<http::Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = TraceFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: http::Request<B>) -> Self::Future {
        let parent = TraceContextPropagator::new()
            .extract_with_context(&Context::new(), &HeaderExtractor(request.headers()));
        let method = request.uri().path().to_owned();

        let span = self
            .tracer
            .span_builder(method.clone())
            .with_kind(SpanKind::Server)
            .with_attributes([
                KeyValue::new(RPC_SYSTEM, RPC_SYSTEM_GRPC),
                KeyValue::new(RPC_SERVICE, method),
            ])
            .start_with_context(&self.tracer, &parent);
        let span = SpanGuard::new(parent.with_span(span));

        TraceFuture {
            inner: self.inner.call(request),
            span,
        }
    }
}

pin_project_lite::pin_project! {
    /// Future that ends the request span when the inner call resolves.
    pub struct TraceFuture<F> {
        #[pin]
        inner: F,
        span: SpanGuard,
    }
}

impl<F: std::future::Future> std::future::Future for TraceFuture<F> {
    type Output = F::Output;

    fn poll(self: std::pin::Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.inner.poll(cx) {
            Poll::Ready(output) => {
                this.span.end();
                Poll::Ready(output)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
