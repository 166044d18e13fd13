//! Error types for the lantern RPC runtime.
//!
//! [`RpcError`] is what a caller's [`CallFuture`](crate::CallFuture) resolves
//! to on failure. It is `Clone` because a transport fault hands the same error
//! to every outstanding call of a dispatcher.

use lantern_core::{CodecError, EndpointParseError};

use crate::protocol::RemoteFault;
use crate::wire::WireError;

/// Errors surfaced by dispatchers, transports and the dispatcher registry.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RpcError {
    /// The request could not be encoded. Nothing was registered or sent.
    #[error("encode failed: {message}")]
    Encode {
        /// Details from the codec.
        message: String,
    },

    /// A response for this call could not be decoded.
    #[error("decode failed: {message}")]
    Decode {
        /// Details from the codec or header parser.
        message: String,
    },

    /// The remote service reported a failure.
    #[error("remote fault: {0}")]
    Remote(RemoteFault),

    /// Several causes raised together.
    #[error("{} errors, first: {}", .0.len(), .0.first().map(ToString::to_string).unwrap_or_default())]
    Composite(Vec<RpcError>),

    /// The connection to the endpoint was closed.
    #[error("disconnect for {endpoint}")]
    Disconnected {
        /// Endpoint the dispatcher is bound to.
        endpoint: String,
    },

    /// The connection to the endpoint failed.
    #[error("network fault for {endpoint}: {message}")]
    NetworkFault {
        /// Endpoint the dispatcher is bound to.
        endpoint: String,
        /// Underlying I/O or protocol error.
        message: String,
    },

    /// The endpoint is bound to a transport that never delivers.
    #[error("not implemented: {endpoint}")]
    NotImplemented {
        /// Endpoint the dispatcher is bound to.
        endpoint: String,
    },

    /// The handler at the endpoint dropped the request without answering.
    #[error("no response from {endpoint}")]
    NoResponse {
        /// Endpoint the request was routed to.
        endpoint: String,
    },

    /// Nothing is registered at the target endpoint.
    #[error("endpoint not found: {endpoint}")]
    EndpointNotFound {
        /// The endpoint that was looked up.
        endpoint: String,
    },

    /// A handler is already registered at this endpoint.
    #[error("endpoint already registered: {endpoint}")]
    EndpointInUse {
        /// The contested endpoint.
        endpoint: String,
    },

    /// No transport builder is registered for the endpoint's scheme.
    #[error("no transport registered for scheme {scheme:?}")]
    UnknownScheme {
        /// The unregistered scheme.
        scheme: String,
    },

    /// The endpoint URI is malformed or unusable by its transport.
    #[error("invalid endpoint: {message}")]
    InvalidEndpoint {
        /// What is wrong with it.
        message: String,
    },

    /// A correlation id was registered twice.
    #[error("correlation id {id} already outstanding")]
    DuplicateCorrelationId {
        /// The duplicated id.
        id: u64,
    },

    /// The dispatcher's outstanding call limit was reached.
    #[error("too many outstanding calls (limit {limit})")]
    TooManyOutstandingCalls {
        /// Configured limit.
        limit: usize,
    },

    /// A frame could not be built or parsed.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// No Tokio runtime is available to run completion workers or I/O tasks.
    #[error("no tokio runtime available")]
    NoRuntime,

    /// The dispatcher was dropped before the call resolved.
    #[error("dispatcher closed")]
    DispatcherClosed,
}

impl RpcError {
    /// Build an `Encode` error from anything displayable.
    pub fn encode(err: impl std::fmt::Display) -> Self {
        RpcError::Encode {
            message: err.to_string(),
        }
    }

    /// Build a `Decode` error from anything displayable.
    pub fn decode(err: impl std::fmt::Display) -> Self {
        RpcError::Decode {
            message: err.to_string(),
        }
    }

    /// Flatten nested composites and unwrap single causes.
    ///
    /// - a non-composite error is returned unchanged
    /// - a composite whose flattened form has exactly one cause becomes that cause
    /// - otherwise the flattened composite keeps every cause
    ///
    /// ```
    /// use lantern_rpc::RpcError;
    ///
    /// let single = RpcError::Composite(vec![RpcError::Composite(vec![RpcError::NoRuntime])]);
    /// assert_eq!(single.normalize(), RpcError::NoRuntime);
    /// ```
    pub fn normalize(self) -> Self {
        match self {
            RpcError::Composite(causes) => {
                let mut flat = Vec::with_capacity(causes.len());
                flatten_into(causes, &mut flat);
                if flat.len() == 1 {
                    flat.swap_remove(0)
                } else {
                    RpcError::Composite(flat)
                }
            }
            other => other,
        }
    }
}

fn flatten_into(causes: Vec<RpcError>, out: &mut Vec<RpcError>) {
    for cause in causes {
        match cause {
            RpcError::Composite(inner) => flatten_into(inner, out),
            other => out.push(other),
        }
    }
}

impl From<CodecError> for RpcError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Encode(_) => RpcError::encode(err),
            CodecError::Decode(_) => RpcError::decode(err),
        }
    }
}

impl From<EndpointParseError> for RpcError {
    fn from(err: EndpointParseError) -> Self {
        RpcError::InvalidEndpoint {
            message: err.to_string(),
        }
    }
}
