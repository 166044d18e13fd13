//! Transports move envelopes between a dispatcher and the far end.
//!
//! A transport is built for one endpoint by a [`TransportBuilder`] registered
//! under the endpoint's URI scheme. It receives a [`ResponseSink`] through
//! which everything it learns flows back to the dispatcher: responses,
//! per-call failures, and connection faults.
//!
//! | scheme   | transport                                |
//! |----------|------------------------------------------|
//! | `tcp`    | [`SocketTransportBuilder`]               |
//! | `inproc` | [`InProcessTransportBuilder`] + [`Router`] |
//! | `null`   | [`NullTransportBuilder`]                 |

mod inproc;
mod null;
mod socket;

use std::sync::{Arc, Weak};

use bytes::Bytes;
use lantern_core::Endpoint;

use crate::error::RpcError;
use crate::rpc::DispatcherCore;
use crate::wire::Envelope;

pub use inproc::{InProcessTransportBuilder, InboundRequest, RequestHandler, Responder, Router};
pub use null::NullTransportBuilder;
pub use socket::SocketTransportBuilder;

/// Moves request envelopes toward the far end.
pub trait Transport: Send + Sync {
    /// Queue one request. Must not block.
    ///
    /// An `Err` fails only the call identified by `envelope.correlation_id`;
    /// the dispatcher resolves it.
    fn send(&self, envelope: Envelope, payload: Bytes) -> Result<(), RpcError>;

    /// Stop background work. Called when the owning dispatcher is dropped.
    fn close(&self) {}
}

/// Builds transports for one URI scheme.
pub trait TransportBuilder: Send + Sync {
    /// Scheme tag this builder is registered under, such as `"tcp"`.
    fn scheme(&self) -> &'static str;

    /// Build a transport bound to `endpoint`, reporting back through `sink`.
    ///
    /// # Errors
    ///
    /// `InvalidEndpoint` when the endpoint lacks what the transport needs,
    /// `NoRuntime` when background tasks cannot be spawned.
    fn build(&self, endpoint: &Endpoint, sink: ResponseSink)
    -> Result<Arc<dyn Transport>, RpcError>;
}

/// Weak handle from a transport back to its dispatcher.
///
/// Every method returns `false` once the dispatcher has been dropped, which
/// tells background tasks to stop.
#[derive(Clone)]
pub struct ResponseSink {
    core: Weak<DispatcherCore>,
    system_id: u64,
}

impl ResponseSink {
    pub(crate) fn new(core: Weak<DispatcherCore>, system_id: u64) -> Self {
        Self { core, system_id }
    }

    /// System id of the owning dispatcher.
    pub fn system_id(&self) -> u64 {
        self.system_id
    }

    /// Whether the owning dispatcher still exists.
    pub fn is_connected(&self) -> bool {
        self.core.strong_count() > 0
    }

    /// Deliver an inbound response envelope and its payload.
    ///
    /// Decode failures only affect the call they belong to; they never come
    /// back to the caller of this method.
    pub fn handle_response(&self, envelope: Envelope, payload: &[u8]) -> bool {
        match self.core.upgrade() {
            Some(core) => {
                core.handle_response(envelope, payload);
                true
            }
            None => false,
        }
    }

    /// Fail one call.
    pub fn complete_error(&self, correlation_id: u64, error: RpcError) -> bool {
        match self.core.upgrade() {
            Some(core) => {
                core.complete_error(correlation_id, error);
                true
            }
            None => false,
        }
    }

    /// Fail every outstanding call with the same error.
    pub fn complete_all_error(&self, error: RpcError) -> bool {
        match self.core.upgrade() {
            Some(core) => {
                core.complete_all_error(error);
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for ResponseSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseSink")
            .field("system_id", &self.system_id)
            .field("connected", &self.is_connected())
            .finish()
    }
}
