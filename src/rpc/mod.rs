//! # gRPC Call Instrumentation
//!
//! Interceptors for unary and streaming calls on both ends of a gRPC
//! channel, plus the traced stream wrappers they hand out. Outgoing calls get
//! the active trace context injected into their metadata; incoming calls get
//! a server span started under whatever context their metadata carries.
//!
//! The RPC runtime itself is an external collaborator: the interceptors wrap
//! the caller-supplied invoke/establish/handle closures rather than the
//! transport, and the stream contracts in [`stream`] are the narrow surface
//! an adapter implements over the runtime's stream plumbing. [`TraceLayer`]
//! is the tower-native registration point for tonic servers.
//!
//! Span ownership differs by side: a client stream span is owned by the
//! wrapper (no call frame outlives the interceptor's return), a server
//! stream span is owned by the interceptor (its frame brackets the whole
//! handler).

pub mod client;
pub mod layer;
pub mod server;
pub mod stream;

pub use client::ClientInterceptor;
pub use layer::TraceLayer;
pub use server::ServerInterceptor;
pub use stream::{ClientStream, ServerStream, TracedClientStream, TracedServerStream};

/// Value recorded under the `rpc.system` attribute.
pub const RPC_SYSTEM_GRPC: &str = "grpc";

/// Attribute carrying the peer address the client dialled.
pub const ATTR_PEER_ADDRESS: &str = "rpc.peer_address";

/// Attribute carrying the call duration in whole milliseconds.
pub const ATTR_DURATION_MS: &str = "rpc.duration_ms";

/// Attribute carrying a best-effort rendering of the request payload.
pub const ATTR_PAYLOAD: &str = "rpc.payload";

/// Attribute carrying a best-effort rendering of the response payload.
pub const ATTR_RESPONSE: &str = "rpc.response";

/// The human-readable message of a status, falling back to the code's text
/// when the status carries no message.
pub(crate) fn status_message(status: &tonic::Status) -> String {
    if status.message().is_empty() {
        status.code().to_string()
    } else {
        status.message().to_owned()
    }
}
