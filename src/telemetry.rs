//! # Tracer Bootstrap
//!
//! This module provides functionality for:
//!
//! - Building an OTLP span exporter and batch tracer provider from settings
//! - Handing out tracer handles for the components that start spans
//! - Installing the `tracing` subscriber stack (console fmt layer plus an
//!   OpenTelemetry bridge layer)
//! - Registering the W3C trace-context propagator as the global text-map
//!   propagator
//!
//! When no exporter endpoint is configured the provider is still built,
//! without a span processor, so a [`Telemetry::tracer`] handle always exists
//! and spans are simply dropped. Components receive their tracer handle
//! explicitly; nothing in this crate resolves a tracer from global state.

use opentelemetry::trace::{TraceError, TracerProvider as _};
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::runtime::TokioCurrentThread;
use opentelemetry_sdk::{trace as sdktrace, Resource};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt as _, Snafu};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Telemetry initialization errors.
#[derive(Debug, Snafu)]
pub enum Error {
    /// The span exporter or tracer provider could not be built.
    #[snafu(display("Could not initialize tracing: {source}"))]
    InitTraceError {
        /// The underlying exporter/provider error.
        source: TraceError,
    },
}

/// Span export settings.
#[derive(Default, Serialize, Deserialize)]
pub struct TraceSettings {
    /// OTLP gRPC endpoint finished spans are exported to, for example
    /// `http://localhost:4317`. When absent, spans are not exported.
    pub endpoint: Option<String>,
}

/// Console logging settings.
#[derive(Default, Serialize, Deserialize)]
pub struct LogSettings {
    /// Filter directives for the console layer, for example
    /// `info,yourcrate=debug`.
    pub console_level: String,
}

/// Settings container for [`init`].
#[derive(Default, Serialize, Deserialize)]
pub struct TelemetrySettings {
    /// Span export settings.
    pub trace: TraceSettings,
    /// Console logging settings.
    pub log: LogSettings,
}

/// Owns the tracer provider for the lifetime of the process.
///
/// Dropping the value shuts the provider down, flushing buffered spans.
pub struct Telemetry {
    tracer_provider: sdktrace::TracerProvider,
}

impl Telemetry {
    /// A tracer handle for a component that starts spans.
    pub fn tracer(&self, name: impl Into<std::borrow::Cow<'static, str>>) -> sdktrace::Tracer {
        self.tracer_provider.tracer(name)
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        if let Err(err) = self.tracer_provider.shutdown() {
            eprintln!("Error shutting down Telemetry tracer provider: {err}");
        }
    }
}

fn init_traces(
    service_name: String,
    settings: &TraceSettings,
) -> Result<sdktrace::TracerProvider, TraceError> {
    let resource = Resource::new(vec![KeyValue::new(
        opentelemetry_semantic_conventions::resource::SERVICE_NAME,
        service_name,
    )]);
    let builder = sdktrace::TracerProvider::builder().with_resource(resource);

    let builder = match &settings.endpoint {
        Some(endpoint) => {
            let exporter = SpanExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint)
                .build()?;

            builder.with_batch_exporter(exporter, TokioCurrentThread)
        }
        None => builder,
    };

    Ok(builder.build())
}

/// Initializes tracing for the process.
///
/// Must be called from within a Tokio runtime: the batch exporter spawns its
/// worker there. Installs the global text-map propagator, the global tracer
/// provider and the `tracing` subscriber, so it can only be called once per
/// process.
pub fn init(
    service_name: impl Into<String>,
    settings: &TelemetrySettings,
) -> Result<Telemetry, Error> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    let tracer_provider =
        init_traces(service_name.into(), &settings.trace).with_context(|_| InitTraceSnafu {})?;
    global::set_tracer_provider(tracer_provider.clone());

    let otel_layer =
        tracing_opentelemetry::layer().with_tracer(tracer_provider.tracer("tracelink"));

    let filter_fmt = EnvFilter::new(&settings.log.console_level);
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_thread_names(true)
        .with_filter(filter_fmt);

    tracing_subscriber::registry()
        .with(otel_layer)
        .with(fmt_layer)
        .init();

    Ok(Telemetry { tracer_provider })
}
