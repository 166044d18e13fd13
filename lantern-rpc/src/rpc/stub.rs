//! Client stubs.
//!
//! Generated stubs are out of scope; [`ServiceStub`] is the hand-written
//! equivalent: it names the service, carries the payload codec and forwards
//! `method + argument` to [`Dispatcher::call`].

use std::sync::Arc;

use lantern_core::{Endpoint, JsonCodec, PayloadCodec};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::call_future::CallFuture;
use super::dispatcher::Dispatcher;
use super::dispatcher_registry::DispatcherRegistry;
use crate::error::RpcError;

/// Anything that can issue calls through a dispatcher.
///
/// The stub's codec encodes the request and decodes the response of every
/// call it makes.
pub trait Stub {
    /// Payload codec used for this stub's calls.
    type Codec: PayloadCodec;

    /// The codec instance.
    fn codec(&self) -> &Self::Codec;
}

/// Stub for one named service on one dispatcher.
///
/// # Examples
///
/// ```no_run
/// # async fn demo() -> Result<(), lantern_rpc::RpcError> {
/// use lantern_rpc::{DispatcherRegistry, Endpoint, JsonCodec, ServiceStub};
///
/// let endpoint = Endpoint::parse("tcp://127.0.0.1:4500/Echo")?;
/// let echo = ServiceStub::for_endpoint(DispatcherRegistry::global(), &endpoint, JsonCodec)?;
/// let reply: String = echo.invoke("Say", "hello").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ServiceStub<C: PayloadCodec = JsonCodec> {
    dispatcher: Arc<Dispatcher>,
    service_name: String,
    codec: C,
}

impl<C: PayloadCodec> ServiceStub<C> {
    /// Stub for `service_name` on an existing dispatcher.
    pub fn new(dispatcher: Arc<Dispatcher>, service_name: impl Into<String>, codec: C) -> Self {
        Self {
            dispatcher,
            service_name: service_name.into(),
            codec,
        }
    }

    /// Stub for the service named by `endpoint`'s path, using the registry's
    /// shared dispatcher for that endpoint.
    ///
    /// # Errors
    ///
    /// `InvalidEndpoint` if the path is empty; otherwise whatever
    /// [`DispatcherRegistry::get_dispatcher`] reports.
    pub fn for_endpoint(
        registry: &DispatcherRegistry,
        endpoint: &Endpoint,
        codec: C,
    ) -> Result<Self, RpcError> {
        if endpoint.path().is_empty() {
            return Err(RpcError::InvalidEndpoint {
                message: format!("{} names no service", endpoint),
            });
        }
        let dispatcher = registry.get_dispatcher(endpoint)?;
        Ok(Self::new(dispatcher, endpoint.path(), codec))
    }

    /// Send `method(request)`; see [`Dispatcher::call`].
    pub fn call<Req, Resp>(&self, method: &str, request: &Req) -> Result<CallFuture<Resp>, RpcError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned + Send + 'static,
    {
        self.dispatcher
            .call(self, &self.service_name, method, request)
    }

    /// Send `method(request)` and wait for the result.
    pub async fn invoke<Req, Resp>(&self, method: &str, request: &Req) -> Result<Resp, RpcError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned + Send + 'static,
    {
        self.call(method, request)?.await
    }

    /// Service this stub addresses.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Dispatcher carrying this stub's calls.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}

impl<C: PayloadCodec> Stub for ServiceStub<C> {
    type Codec = C;

    fn codec(&self) -> &C {
        &self.codec
    }
}

impl<C: PayloadCodec> std::fmt::Debug for ServiceStub<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceStub")
            .field("service_name", &self.service_name)
            .field("codec", &self.codec.name())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}
