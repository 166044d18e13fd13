//! # lantern-rpc
//!
//! Client-side RPC runtime.
//!
//! This crate provides:
//! - **Dispatcher**: correlates requests with responses and resolves each call exactly once
//! - **Wire format**: fixed envelope with CRC32C-checked payloads
//! - **Transports**: framed TCP sockets, an in-process router, and a null transport
//! - **DispatcherRegistry**: one shared dispatcher per endpoint, built by URI scheme
//!
//! ```no_run
//! # async fn demo() -> Result<(), lantern_rpc::RpcError> {
//! use lantern_rpc::{DispatcherRegistry, Endpoint, JsonCodec, ServiceStub};
//!
//! let endpoint: Endpoint = "tcp://127.0.0.1:4500/Calculator".parse()?;
//! let calc = ServiceStub::for_endpoint(DispatcherRegistry::global(), &endpoint, JsonCodec)?;
//! let sum: i64 = calc.invoke("Add", &(2, 3)).await?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

// Re-export core types for convenience
pub use lantern_core::{
    CodecError, Endpoint, EndpointParseError, JsonCodec, NetworkProvider, PayloadCodec,
    TokioNetworkProvider,
};

/// Dispatcher and socket configuration.
pub mod config;

/// Error types.
pub mod error;

/// Call headers and fault bodies inside envelope payloads.
pub mod protocol;

/// Call registry, dispatcher, stubs and the dispatcher cache.
pub mod rpc;

/// Socket, in-process and null transports.
pub mod transport;

/// Envelope format with CRC32C checksums.
pub mod wire;

pub use config::{DispatcherConfig, SocketConfig};
pub use error::RpcError;
pub use protocol::{CallRequest, CallResponse, RemoteFault, encode_fault, encode_success};
pub use rpc::{
    CallFuture, CallRegistry, Dispatcher, DispatcherRegistry, ServiceStub, Stub, TransportFactory,
};
pub use transport::{
    InProcessTransportBuilder, InboundRequest, NullTransportBuilder, RequestHandler, Responder,
    ResponseSink, Router, SocketTransportBuilder, Transport, TransportBuilder,
};
pub use wire::{
    ENVELOPE_SIZE, Envelope, MAX_PAYLOAD_SIZE, MessageKind, WireError, serialize_frame,
    try_deserialize_frame,
};
