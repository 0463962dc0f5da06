/*!
Tracelink carries a distributed trace across two transport boundaries — an
asynchronous message queue and a synchronous gRPC channel — and ties the
lifetime of every span it opens to the lifetime of the in-flight operation
the span describes.

It provides:
 * carriers that move W3C trace context through message headers and gRPC
   metadata (via opentelemetry)
 * a traced consume/publish front for a broker channel, with one span per
   in-flight delivery closed by its terminal disposition
 * client and server interceptors for unary and streaming gRPC calls, with
   traced stream wrappers
 * tracer bootstrap: OTLP export, console logging, and tracer handles for
   dependency injection (via opentelemetry-otlp & tracing)

### Tutorial

1. Add the *latest* versions of tracelink, opentelemetry, and tokio to your
   Cargo.toml dependencies. (**NOTE:** check for *latest* versions)

```toml
[dependencies]
tracelink = "0.1"
opentelemetry = "0.27"
tokio = "1"
```

2. Initialize telemetry once at startup and keep the guard alive; hand
   tracer handles to the components that start spans.

```rust,no_run
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = tracelink::telemetry::TelemetrySettings::default();
    let telemetry = tracelink::telemetry::init("my-service", &settings)?;

    let tracer = telemetry.tracer("my-service");
    // Hand `tracer` to a `mq::Manager`, a `rpc::ClientInterceptor`, ...
    let _ = tracer;

    Ok(())
}
```

3. Wrap your broker channel in a [`mq::Manager`] to get traced deliveries
   whose spans close on acknowledgment, and trace-carrying publishes:

```ignore
let manager = tracelink::mq::Manager::new(channel, telemetry.tracer("mq"));

manager.publish(&cx, "events", "orders.created", payload).await?;

let mut deliveries = manager.consume(&cx, cancel, "orders.created").await?;
while let Some(delivery) = deliveries.recv().await {
    process(delivery.context(), delivery.payload()).await;
    delivery.ack(false).await?;
}
```

4. Bracket gRPC calls with the [`rpc`] interceptors so trace context crosses
   the channel and every call is spanned:

```ignore
let client = tracelink::rpc::ClientInterceptor::new(telemetry.tracer("rpc"));
let response = client
    .unary(&cx, "/orders.Orders/Get", "http://orders:50051", request, |cx, request| async move {
        orders_client.get(request).await
    })
    .await?;
```

Instrumentation is purely observational: every wrapped operation's result is
returned to the caller unchanged, and every span is closed exactly once on
every exit path.
*/
#![deny(
    future_incompatible,
    deprecated_safe,
    rust_2018_compatibility,
    rust_2018_idioms,
    rust_2021_compatibility,
    rust_2024_compatibility
)]
// Document ALL THE THINGS!
#![deny(missing_docs)]

pub mod mq;
pub mod propagation;
pub mod rpc;
pub mod span;
pub mod telemetry;
