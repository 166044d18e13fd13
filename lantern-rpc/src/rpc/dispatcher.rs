//! Dispatcher: the per-endpoint call runtime.
//!
//! A [`Dispatcher`] turns `call(stub, service, method, request)` into a framed
//! request, remembers the call in its [`CallRegistry`] and hands the bytes to
//! its transport. When the transport reports a response or a fault, the
//! dispatcher decodes it and schedules resolution on its completion workers.
//!
//! # Resolution rules
//!
//! - A success body is decoded with the codec of the stub that made the call,
//!   *before* the call is removed from the registry.
//! - A fault body is always JSON ([`RemoteFault`]).
//! - Any decode failure fails that call only.
//! - Errors are normalized (see [`RpcError::normalize`]) before delivery.
//! - A connection fault drains the registry; every call gets the same error.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use lantern_core::{Endpoint, PayloadCodec};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;

use super::call_future::CallFuture;
use super::completion::CompletionQueue;
use super::registry::{CallRegistry, CallValue, OutstandingCall, ReplyDecoder, TypedDecoder};
use super::stub::Stub;
use crate::config::DispatcherConfig;
use crate::error::RpcError;
use crate::protocol::{CallResponse, FAULT_CODEC, RemoteFault, encode_request};
use crate::transport::{ResponseSink, Transport, TransportBuilder};
use crate::wire::{Envelope, MessageKind};

/// Process-wide source of system ids. The first dispatcher gets 1.
static NEXT_SYSTEM_ID: AtomicU64 = AtomicU64::new(1);

fn next_system_id() -> u64 {
    NEXT_SYSTEM_ID.fetch_add(1, Ordering::Relaxed)
}

/// State shared between a dispatcher and the weak handle its transport holds.
pub(crate) struct DispatcherCore {
    system_id: u64,
    endpoint: Endpoint,
    next_correlation_id: AtomicU64,
    registry: CallRegistry,
    completions: CompletionQueue,
    max_outstanding_calls: Option<usize>,
}

impl DispatcherCore {
    fn allocate_correlation_id(&self) -> u64 {
        self.next_correlation_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn handle_response(&self, envelope: Envelope, payload: &[u8]) {
        if envelope.kind != MessageKind::Response {
            tracing::warn!(
                system_id = self.system_id,
                correlation_id = envelope.correlation_id,
                kind = ?envelope.kind,
                "dropping inbound envelope that is not a response"
            );
            return;
        }
        if envelope.system_id != self.system_id {
            tracing::warn!(
                system_id = self.system_id,
                envelope_system_id = envelope.system_id,
                correlation_id = envelope.correlation_id,
                "dropping response addressed to another dispatcher"
            );
            return;
        }

        let id = envelope.correlation_id;
        tracing::debug!(
            system_id = self.system_id,
            correlation_id = id,
            bytes = payload.len(),
            "response received"
        );

        let (header, body) = match CallResponse::decode(payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::error!(correlation_id = id, error = %e, "malformed response header");
                self.complete_error(id, RpcError::decode(e));
                return;
            }
        };

        if header.is_faulted {
            let error = match FAULT_CODEC.from_bytes::<RemoteFault>(body) {
                Ok(fault) => fault.into_error(),
                Err(e) => {
                    tracing::error!(correlation_id = id, error = %e, "undecodable fault body");
                    RpcError::from(e)
                }
            };
            self.complete_error(id, error);
            return;
        }

        // Decode while the call is still registered; it carries the caller's codec.
        let Some(decoder) = self.registry.peek_with(id, OutstandingCall::decoder) else {
            tracing::warn!(
                system_id = self.system_id,
                correlation_id = id,
                "response for a call that is not outstanding"
            );
            return;
        };

        match decoder.decode(body) {
            Ok(value) => self.complete_success(id, value),
            Err(e) => {
                tracing::error!(
                    correlation_id = id,
                    expected = decoder.expected_type(),
                    error = %e,
                    "failed to decode response body"
                );
                self.complete_error(id, e);
            }
        }
    }

    pub(crate) fn complete_success(&self, id: u64, value: CallValue) {
        match self.registry.remove(id) {
            Some(call) => self.completions.submit(call, Ok(value)),
            None => tracing::debug!(correlation_id = id, "success for a call already resolved"),
        }
    }

    pub(crate) fn complete_error(&self, id: u64, error: RpcError) {
        match self.registry.remove(id) {
            Some(call) => self.completions.submit(call, Err(error.normalize())),
            None => tracing::debug!(correlation_id = id, "error for a call already resolved"),
        }
    }

    pub(crate) fn complete_all_error(&self, error: RpcError) {
        let error = error.normalize();
        let calls = self.registry.drain();
        if !calls.is_empty() {
            tracing::warn!(
                system_id = self.system_id,
                endpoint = %self.endpoint,
                calls = calls.len(),
                error = %error,
                "failing every outstanding call"
            );
        }
        for call in calls {
            self.completions.submit(call, Err(error.clone()));
        }
    }
}

/// Call runtime bound to one endpoint.
///
/// Usually obtained from a [`DispatcherRegistry`](crate::DispatcherRegistry),
/// which shares one dispatcher per endpoint. Dropping the last handle closes
/// the transport and fails calls still in flight with
/// [`RpcError::DispatcherClosed`].
pub struct Dispatcher {
    core: Arc<DispatcherCore>,
    transport: Arc<dyn Transport>,
}

impl Dispatcher {
    /// Build a dispatcher for `endpoint` using `builder`'s transport.
    ///
    /// Must be called from within a Tokio runtime: completion workers and any
    /// transport tasks are spawned on it.
    ///
    /// # Errors
    ///
    /// `NoRuntime` outside a runtime, or whatever the builder reports.
    pub fn new(
        endpoint: Endpoint,
        config: &DispatcherConfig,
        builder: &dyn TransportBuilder,
    ) -> Result<Self, RpcError> {
        let completions = CompletionQueue::start(config.completion_workers)?;
        let system_id = next_system_id();

        let core = Arc::new(DispatcherCore {
            system_id,
            endpoint,
            next_correlation_id: AtomicU64::new(1),
            registry: CallRegistry::new(),
            completions,
            max_outstanding_calls: config.max_outstanding_calls,
        });

        let sink = ResponseSink::new(Arc::downgrade(&core), system_id);
        let transport = builder.build(&core.endpoint, sink)?;

        tracing::debug!(
            system_id,
            endpoint = %core.endpoint,
            scheme = builder.scheme(),
            workers = core.completions.worker_count(),
            "dispatcher created"
        );

        Ok(Self { core, transport })
    }

    /// Send one call and return the future for its result.
    ///
    /// The request is encoded with `stub`'s codec, and so is the response.
    /// Returns as soon as the transport has queued the request.
    ///
    /// # Errors
    ///
    /// `Encode` if the request cannot be encoded and `TooManyOutstandingCalls`
    /// at the configured limit. Neither touches the registry or the transport.
    /// A transport failure is delivered through the returned future instead.
    pub fn call<S, Req, Resp>(
        &self,
        stub: &S,
        service_name: &str,
        service_method: &str,
        request: &Req,
    ) -> Result<CallFuture<Resp>, RpcError>
    where
        S: Stub + ?Sized,
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned + Send + 'static,
    {
        let core = &self.core;
        let payload = encode_request(stub.codec(), service_name, service_method, request)?;

        if let Some(limit) = core.max_outstanding_calls
            && core.registry.len() >= limit
        {
            return Err(RpcError::TooManyOutstandingCalls { limit });
        }

        let id = core.allocate_correlation_id();
        let envelope = Envelope::request(core.system_id, id, payload.len());

        let (tx, rx) = oneshot::channel();
        let decoder: Arc<dyn ReplyDecoder> =
            Arc::new(TypedDecoder::<Resp, _>::new(stub.codec().clone()));
        core.registry
            .insert(OutstandingCall::new(id, service_method, decoder, tx))?;

        tracing::debug!(
            system_id = core.system_id,
            correlation_id = id,
            service = service_name,
            method = service_method,
            bytes = payload.len(),
            "sending request"
        );

        if let Err(e) = self.transport.send(envelope, Bytes::from(payload)) {
            tracing::debug!(correlation_id = id, error = %e, "transport rejected request");
            core.complete_error(id, e);
        }

        Ok(CallFuture::new(id, rx))
    }

    /// Deliver a response as a transport would.
    pub fn handle_response(&self, envelope: Envelope, payload: &[u8]) {
        self.core.handle_response(envelope, payload);
    }

    /// Resolve a call with an already-decoded value.
    pub fn complete_success(&self, correlation_id: u64, value: CallValue) {
        self.core.complete_success(correlation_id, value);
    }

    /// Fail one call. No-op if it already resolved.
    pub fn complete_error(&self, correlation_id: u64, error: RpcError) {
        self.core.complete_error(correlation_id, error);
    }

    /// Fail every outstanding call and empty the registry.
    pub fn complete_all_error(&self, error: RpcError) {
        self.core.complete_all_error(error);
    }

    /// Next correlation id. Never reused within this dispatcher.
    pub fn allocate_correlation_id(&self) -> u64 {
        self.core.allocate_correlation_id()
    }

    /// Process-unique id of this dispatcher.
    pub fn system_id(&self) -> u64 {
        self.core.system_id
    }

    /// Endpoint this dispatcher is bound to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.core.endpoint
    }

    /// Number of calls awaiting resolution.
    pub fn outstanding_calls(&self) -> usize {
        self.core.registry.len()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.transport.close();
        self.core.complete_all_error(RpcError::DispatcherClosed);
        tracing::debug!(
            system_id = self.core.system_id,
            endpoint = %self.core.endpoint,
            "dispatcher dropped"
        );
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("system_id", &self.core.system_id)
            .field("endpoint", &self.core.endpoint)
            .field("outstanding_calls", &self.core.registry.len())
            .finish()
    }
}
