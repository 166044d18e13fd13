//! # lantern-core
//!
//! Core abstractions shared by the lantern RPC runtime.
//!
//! - [`Endpoint`]: parsed `scheme://host:port/service` address
//! - [`PayloadCodec`]: pluggable payload serialization, with [`JsonCodec`]
//! - [`NetworkProvider`]: outbound connection factory, with [`TokioNetworkProvider`]

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod codec;
mod network;
mod types;

// Codec exports
pub use codec::{CodecError, JsonCodec, PayloadCodec};

// Provider exports
pub use network::{NetworkProvider, TokioNetworkProvider};

// Addressing exports
pub use types::{Endpoint, EndpointParseError};
