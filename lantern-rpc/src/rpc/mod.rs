//! Client call runtime.
//!
//! - **CallRegistry**: correlation id → outstanding call, guarded by one mutex
//! - **Dispatcher**: encodes calls, routes responses, broadcasts faults
//! - **CallFuture**: what callers await
//! - **TransportFactory / DispatcherRegistry**: scheme → transport, endpoint → dispatcher

mod call_future;
mod completion;
mod dispatcher;
mod dispatcher_registry;
mod factory;
mod registry;
mod stub;

pub use call_future::CallFuture;
pub(crate) use dispatcher::DispatcherCore;
pub use dispatcher::Dispatcher;
pub use dispatcher_registry::DispatcherRegistry;
pub use factory::TransportFactory;
pub use registry::{CallRegistry, CallResult, CallValue, OutstandingCall, ReplyDecoder, TypedDecoder};
pub use stub::{ServiceStub, Stub};
