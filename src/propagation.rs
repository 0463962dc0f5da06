//! # Trace Context Carriers
//!
//! Adapters between transport metadata and the W3C trace-context text-map
//! codec. Two transport shapes are covered: the flat string-keyed header
//! table of a message broker ([`HeaderInjector`]/[`HeaderExtractor`]) and the
//! multi-value-per-key metadata of a gRPC call
//! ([`MetadataInjector`]/[`MetadataExtractor`]). In the multi-value shape only
//! the first ASCII value per key participates in extraction, and injection
//! overwrites a single value.
//!
//! The codec itself is the SDK's [`TraceContextPropagator`]; this module only
//! supplies carriers and the inject/extract entry points built on it. A
//! missing key, a non-string header value, or a fully absent set of trace
//! fields is never an error: extraction simply yields a context with no
//! remote parent.
//!
//! ```
//! use opentelemetry::Context;
//! use tracelink::mq::broker::Headers;
//!
//! let mut headers = Headers::new();
//! tracelink::propagation::inject_headers(&Context::new(), &mut headers);
//! let extracted = tracelink::propagation::extract_headers(&Context::new(), &headers);
//! # drop(extracted);
//! ```

use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator as _};
use opentelemetry::Context;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use tonic::metadata::{KeyRef, MetadataKey, MetadataMap, MetadataValue};

use crate::mq::broker::{HeaderValue, Headers};

/// Writes trace fields into a message header table.
pub struct HeaderInjector<'a>(
    /// The header table written into.
    pub &'a mut Headers,
);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(key.to_owned(), HeaderValue::Str(value));
    }
}

/// Reads trace fields from a message header table.
pub struct HeaderExtractor<'a>(
    /// The header table read from.
    pub &'a Headers,
);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(HeaderValue::as_str)
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }
}

/// Writes trace fields into gRPC call metadata, one value per key.
pub struct MetadataInjector<'a>(
    /// The metadata map written into.
    pub &'a mut MetadataMap,
);

impl Injector for MetadataInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        let key = match MetadataKey::from_bytes(key.as_bytes()) {
            Ok(key) => key,
            Err(error) => {
                tracing::debug!(key, %error, "skipping unencodable metadata key");
                return;
            }
        };
        let value = match MetadataValue::try_from(&value) {
            Ok(value) => value,
            Err(error) => {
                tracing::debug!(%error, "skipping unencodable metadata value");
                return;
            }
        };
        self.0.insert(key, value);
    }
}

/// Reads trace fields from gRPC call metadata.
pub struct MetadataExtractor<'a>(
    /// The metadata map read from.
    pub &'a MetadataMap,
);

impl Extractor for MetadataExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0
            .keys()
            .filter_map(|key| match key {
                KeyRef::Ascii(key) => Some(key.as_str()),
                KeyRef::Binary(_) => None,
            })
            .collect()
    }
}

/// Injects the trace context active in `cx` into a message header table.
pub fn inject_headers(cx: &Context, headers: &mut Headers) {
    TraceContextPropagator::new().inject_context(cx, &mut HeaderInjector(headers));
}

/// Extracts a trace context from a message header table.
///
/// Returns a context derived from `cx` whose active span is the publisher's,
/// or `cx` unchanged when no valid trace fields are present.
pub fn extract_headers(cx: &Context, headers: &Headers) -> Context {
    TraceContextPropagator::new().extract_with_context(cx, &HeaderExtractor(headers))
}

/// Injects the trace context active in `cx` into gRPC call metadata.
pub fn inject_metadata(cx: &Context, metadata: &mut MetadataMap) {
    TraceContextPropagator::new().inject_context(cx, &mut MetadataInjector(metadata));
}

/// Extracts a trace context from gRPC call metadata.
pub fn extract_metadata(cx: &Context, metadata: &MetadataMap) -> Context {
    TraceContextPropagator::new().extract_with_context(cx, &MetadataExtractor(metadata))
}
