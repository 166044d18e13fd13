//! In-process transport.
//!
//! A [`Router`] is a switchboard of request handlers keyed by endpoint. A
//! dispatcher bound to an `inproc://` endpoint hands each request to the
//! handler registered at exactly that endpoint, together with a [`Responder`]
//! that carries the answer back. Nothing is framed or checksummed; the
//! envelope and payload are passed as values.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use lantern_core::{Endpoint, PayloadCodec};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::runtime::Handle;

use super::{ResponseSink, Transport, TransportBuilder};
use crate::error::RpcError;
use crate::protocol::{CallRequest, RemoteFault, encode_fault, encode_success};
use crate::wire::{Envelope, WireError};

static GLOBAL_ROUTER: Lazy<Router> = Lazy::new(Router::new);

/// A request as seen by an in-process handler.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    envelope: Envelope,
    payload: Bytes,
}

impl InboundRequest {
    /// The request envelope.
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Split the payload into the call header and the codec-encoded argument.
    ///
    /// # Errors
    ///
    /// A `WireError` if the header is malformed.
    pub fn call(&self) -> Result<(CallRequest, &[u8]), WireError> {
        CallRequest::decode(&self.payload)
    }
}

/// One-shot channel back to the dispatcher that sent a request.
///
/// Each `respond*` method consumes the responder and returns whether the
/// dispatcher was still there to receive the answer. Dropping a responder
/// without answering, including while a handler panics, fails the call with
/// `NoResponse`.
pub struct Responder {
    request: Envelope,
    endpoint: String,
    sink: Option<ResponseSink>,
}

impl Responder {
    /// Answer with a raw response payload (flags byte included).
    pub fn respond(mut self, payload: Vec<u8>) -> bool {
        let Some(sink) = self.sink.take() else {
            return false;
        };
        let envelope = self.request.response_to(payload.len());
        sink.handle_response(envelope, &payload)
    }

    /// Answer with a successful result.
    ///
    /// # Errors
    ///
    /// `Encode` if `codec` rejects `value`; nothing is delivered and the
    /// call fails with `NoResponse`.
    pub fn respond_success<C, T>(self, codec: &C, value: &T) -> Result<bool, RpcError>
    where
        C: PayloadCodec,
        T: Serialize + ?Sized,
    {
        let payload = encode_success(codec, value)?;
        Ok(self.respond(payload))
    }

    /// Answer with a fault.
    ///
    /// # Errors
    ///
    /// `Encode` if the fault cannot be serialized; nothing is delivered and
    /// the call fails with `NoResponse`.
    pub fn respond_fault(self, fault: &RemoteFault) -> Result<bool, RpcError> {
        let payload = encode_fault(fault)?;
        Ok(self.respond(payload))
    }

    /// Correlation id of the request being answered.
    pub fn correlation_id(&self) -> u64 {
        self.request.correlation_id
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.take() {
            tracing::warn!(
                endpoint = %self.endpoint,
                system_id = self.request.system_id,
                correlation_id = self.request.correlation_id,
                "in-process handler dropped its responder"
            );
            sink.complete_error(
                self.request.correlation_id,
                RpcError::NoResponse {
                    endpoint: self.endpoint.clone(),
                },
            );
        }
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("endpoint", &self.endpoint)
            .field("system_id", &self.request.system_id)
            .field("correlation_id", &self.request.correlation_id)
            .field("answered", &self.sink.is_none())
            .finish()
    }
}

/// Serves requests routed to one endpoint.
///
/// Handlers run on a runtime task, never on the caller's. A handler may
/// answer later from another task; the [`Responder`] is `Send`.
pub trait RequestHandler: Send + Sync + 'static {
    /// Serve one request.
    fn handle(&self, request: InboundRequest, responder: Responder);
}

impl<F> RequestHandler for F
where
    F: Fn(InboundRequest, Responder) + Send + Sync + 'static,
{
    fn handle(&self, request: InboundRequest, responder: Responder) {
        self(request, responder)
    }
}

/// Endpoint → handler switchboard.
///
/// Cloning yields another handle to the same table.
#[derive(Clone, Default)]
pub struct Router {
    routes: Arc<RwLock<HashMap<Endpoint, Arc<dyn RequestHandler>>>>,
}

impl Router {
    /// An empty router, independent of [`Router::global`].
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide router used by the default `inproc` transport.
    pub fn global() -> Router {
        GLOBAL_ROUTER.clone()
    }

    /// Register `handler` at `endpoint`.
    ///
    /// # Errors
    ///
    /// `EndpointInUse` if a handler is already registered there.
    pub fn register<H>(&self, endpoint: Endpoint, handler: H) -> Result<(), RpcError>
    where
        H: RequestHandler,
    {
        let mut routes = self.routes.write();
        if routes.contains_key(&endpoint) {
            return Err(RpcError::EndpointInUse {
                endpoint: endpoint.to_string(),
            });
        }
        tracing::debug!(endpoint = %endpoint, "in-process handler registered");
        routes.insert(endpoint, Arc::new(handler));
        Ok(())
    }

    /// Remove the handler at `endpoint`. Returns whether one was registered.
    pub fn unregister(&self, endpoint: &Endpoint) -> bool {
        let removed = self.routes.write().remove(endpoint).is_some();
        if removed {
            tracing::debug!(endpoint = %endpoint, "in-process handler unregistered");
        }
        removed
    }

    /// Whether a handler is registered at `endpoint`.
    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.routes.read().contains_key(endpoint)
    }

    fn route(&self, endpoint: &Endpoint) -> Option<Arc<dyn RequestHandler>> {
        self.routes.read().get(endpoint).cloned()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let routes = self.routes.read();
        let endpoints: Vec<String> = routes.keys().map(ToString::to_string).collect();
        f.debug_struct("Router").field("endpoints", &endpoints).finish()
    }
}

/// Builder for the `inproc` scheme.
#[derive(Debug, Clone)]
pub struct InProcessTransportBuilder {
    router: Router,
}

impl InProcessTransportBuilder {
    /// Route through `router`.
    pub fn new(router: Router) -> Self {
        Self { router }
    }

    /// Route through [`Router::global`].
    pub fn global() -> Self {
        Self::new(Router::global())
    }
}

impl TransportBuilder for InProcessTransportBuilder {
    fn scheme(&self) -> &'static str {
        "inproc"
    }

    fn build(
        &self,
        endpoint: &Endpoint,
        sink: ResponseSink,
    ) -> Result<Arc<dyn Transport>, RpcError> {
        let runtime = Handle::try_current().map_err(|_| RpcError::NoRuntime)?;
        Ok(Arc::new(InProcessTransport {
            endpoint: endpoint.clone(),
            router: self.router.clone(),
            runtime,
            sink,
        }))
    }
}

struct InProcessTransport {
    endpoint: Endpoint,
    router: Router,
    runtime: Handle,
    sink: ResponseSink,
}

impl Transport for InProcessTransport {
    fn send(&self, envelope: Envelope, payload: Bytes) -> Result<(), RpcError> {
        // Looked up per call so handlers may come and go.
        let Some(handler) = self.router.route(&self.endpoint) else {
            tracing::debug!(
                endpoint = %self.endpoint,
                correlation_id = envelope.correlation_id,
                "no in-process handler"
            );
            return Err(RpcError::EndpointNotFound {
                endpoint: self.endpoint.to_string(),
            });
        };

        let request = InboundRequest { envelope, payload };
        let responder = Responder {
            request: envelope,
            endpoint: self.endpoint.to_string(),
            sink: Some(self.sink.clone()),
        };
        // A runtime that has shut down drops the task, and the responder with it.
        self.runtime.spawn(async move {
            handler.handle(request, responder);
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use lantern_core::JsonCodec;

    use super::*;
    use crate::config::DispatcherConfig;
    use crate::rpc::{Dispatcher, ServiceStub};

    fn endpoint(s: &str) -> Endpoint {
        Endpoint::parse(s).expect("endpoint")
    }

    fn stub(router: &Router, ep: &Endpoint) -> ServiceStub {
        let dispatcher = Dispatcher::new(
            ep.clone(),
            &DispatcherConfig::default(),
            &InProcessTransportBuilder::new(router.clone()),
        )
        .expect("dispatcher");
        ServiceStub::new(Arc::new(dispatcher), ep.path(), JsonCodec)
    }

    fn echo(request: InboundRequest, responder: Responder) {
        let result = request.call().map_err(RpcError::from).and_then(|(_, body)| {
            let text: String = JsonCodec.from_bytes(body)?;
            Ok(text)
        });
        let _ = match result {
            Ok(text) => responder.respond_success(&JsonCodec, &text),
            Err(e) => responder.respond_fault(&RemoteFault::new("BadRequest", e.to_string())),
        };
    }

    #[test]
    fn test_register_conflict_and_unregister() {
        let router = Router::new();
        let ep = endpoint("inproc://local/Echo");

        router.register(ep.clone(), echo).expect("first");
        assert_eq!(
            router.register(ep.clone(), echo),
            Err(RpcError::EndpointInUse {
                endpoint: ep.to_string()
            })
        );
        assert!(router.contains(&ep));
        assert!(router.unregister(&ep));
        assert!(!router.unregister(&ep));
    }

    #[tokio::test]
    async fn test_round_trip() {
        let router = Router::new();
        let ep = endpoint("inproc://local/Echo");
        router.register(ep.clone(), echo).expect("register");

        let stub = stub(&router, &ep);
        let reply: String = stub.invoke("Say", "hello").await.expect("reply");
        assert_eq!(reply, "hello");
        assert_eq!(stub.dispatcher().outstanding_calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_endpoint_fails_call() {
        let router = Router::new();
        let ep = endpoint("inproc://local/Missing");

        let stub = stub(&router, &ep);
        let result: Result<String, _> = stub.invoke("Say", "hello").await;
        assert_eq!(
            result,
            Err(RpcError::EndpointNotFound {
                endpoint: ep.to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_handler_sees_call_header() {
        let router = Router::new();
        let ep = endpoint("inproc://local/Inspect");
        router
            .register(ep.clone(), |request: InboundRequest, responder: Responder| {
                let header = match request.call() {
                    Ok((header, _)) => format!("{}.{}", header.service_name, header.service_method),
                    Err(e) => e.to_string(),
                };
                let _ = responder.respond_success(&JsonCodec, &header);
            })
            .expect("register");

        let stub = stub(&router, &ep);
        let reply: String = stub.invoke("Describe", &()).await.expect("reply");
        assert_eq!(reply, "Inspect.Describe");
    }

    #[tokio::test]
    async fn test_responder_after_dispatcher_dropped() {
        let router = Router::new();
        let ep = endpoint("inproc://local/Slow");
        let (tx, rx) = tokio::sync::oneshot::channel::<Responder>();
        let tx = parking_lot::Mutex::new(Some(tx));
        router
            .register(ep.clone(), move |_request: InboundRequest, responder: Responder| {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(responder);
                }
            })
            .expect("register");

        let stub = stub(&router, &ep);
        let future = stub.call::<_, String>("Wait", &()).expect("call");
        let responder = rx.await.expect("handler ran");

        drop(stub);
        assert_eq!(future.await, Err(RpcError::DispatcherClosed));
        assert!(!responder.respond_success(&JsonCodec, "late").expect("encode"));
    }

    #[tokio::test]
    async fn test_dropped_responder_fails_call() {
        let router = Router::new();
        let ep = endpoint("inproc://local/Forgetful");
        router
            .register(ep.clone(), |_request: InboundRequest, responder: Responder| {
                drop(responder);
            })
            .expect("register");

        let stub = stub(&router, &ep);
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            stub.invoke::<_, String>("Say", "hi"),
        )
        .await
        .expect("call resolved");
        assert_eq!(
            result,
            Err(RpcError::NoResponse {
                endpoint: ep.to_string()
            })
        );
        assert_eq!(stub.dispatcher().outstanding_calls(), 0);
    }

    #[tokio::test]
    async fn test_panicking_handler_fails_call() {
        let router = Router::new();
        let ep = endpoint("inproc://local/Crashy");
        router
            .register(ep.clone(), |_request: InboundRequest, _responder: Responder| {
                panic!("handler bug");
            })
            .expect("register");

        let stub = stub(&router, &ep);
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            stub.invoke::<_, String>("Say", "hi"),
        )
        .await
        .expect("call resolved");
        assert_eq!(
            result,
            Err(RpcError::NoResponse {
                endpoint: ep.to_string()
            })
        );
        assert_eq!(stub.dispatcher().outstanding_calls(), 0);
    }

    #[tokio::test]
    async fn test_encode_failure_in_handler_fails_call() {
        let router = Router::new();
        let ep = endpoint("inproc://local/Unencodable");
        router
            .register(ep.clone(), |_request: InboundRequest, responder: Responder| {
                // JSON object keys must be strings.
                let value: HashMap<Vec<u8>, u8> = HashMap::from([(vec![1], 1)]);
                assert!(responder.respond_success(&JsonCodec, &value).is_err());
            })
            .expect("register");

        let stub = stub(&router, &ep);
        let result: Result<String, _> = stub.invoke("Say", "hi").await;
        assert!(matches!(result, Err(RpcError::NoResponse { .. })));
    }

    #[tokio::test]
    async fn test_handler_sees_request_envelope() {
        let router = Router::new();
        let ep = endpoint("inproc://local/Ids");
        router
            .register(ep.clone(), |request: InboundRequest, responder: Responder| {
                let envelope = *request.envelope();
                assert_eq!(envelope.correlation_id, responder.correlation_id());
                let _ = responder
                    .respond_success(&JsonCodec, &(envelope.system_id, envelope.correlation_id));
            })
            .expect("register");

        let stub = stub(&router, &ep);
        let future = stub.call::<_, (u64, u64)>("Ids", &()).expect("call");
        let correlation_id = future.correlation_id();
        let (system_id, seen) = future.await.expect("reply");
        assert_eq!(system_id, stub.dispatcher().system_id());
        assert_eq!(seen, correlation_id);
    }
}
