//! CallFuture: what a caller awaits after [`Dispatcher::call`](crate::Dispatcher::call).
//!
//! Resolved by a completion worker, never by the transport task that received
//! the response.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use super::registry::CallResult;
use crate::error::RpcError;

/// Future that resolves to the typed result of one call.
///
/// Dropping it does not cancel the call; the eventual result is discarded.
#[must_use = "a call's result is lost unless the future is awaited"]
pub struct CallFuture<T> {
    correlation_id: u64,
    rx: oneshot::Receiver<CallResult>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> CallFuture<T> {
    pub(crate) fn new(correlation_id: u64, rx: oneshot::Receiver<CallResult>) -> Self {
        Self {
            correlation_id,
            rx,
            _marker: PhantomData,
        }
    }

    /// Correlation id assigned to this call.
    pub fn correlation_id(&self) -> u64 {
        self.correlation_id
    }
}

impl<T: Send + 'static> Future for CallFuture<T> {
    type Output = Result<T, RpcError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let id = self.correlation_id;
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            // Sink dropped without a result: the registry went away with the dispatcher.
            Poll::Ready(Err(_)) => Poll::Ready(Err(RpcError::DispatcherClosed)),
            Poll::Ready(Ok(Err(err))) => Poll::Ready(Err(err)),
            Poll::Ready(Ok(Ok(value))) => match value.downcast::<T>() {
                Ok(value) => Poll::Ready(Ok(*value)),
                Err(_) => {
                    tracing::error!(
                        correlation_id = id,
                        expected = std::any::type_name::<T>(),
                        "call resolved with a value of the wrong type"
                    );
                    Poll::Ready(Err(RpcError::decode(format!(
                        "result is not a {}",
                        std::any::type_name::<T>()
                    ))))
                }
            },
        }
    }
}

impl<T> std::fmt::Debug for CallFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallFuture")
            .field("correlation_id", &self.correlation_id)
            .finish()
    }
}
