//! CallRegistry: correlation id → outstanding call.
//!
//! Every call a dispatcher sends lives here until exactly one of three things
//! removes it: a matching response, a fault broadcast, or the dispatcher being
//! dropped. Removal is atomic, so a call can never be resolved twice.

use std::any::Any;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::marker::PhantomData;
use std::sync::Arc;

use lantern_core::PayloadCodec;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;

use crate::error::RpcError;

/// Type-erased successful result, downcast by [`CallFuture`](crate::CallFuture).
pub type CallValue = Box<dyn Any + Send>;

/// What a resolution sink receives.
pub type CallResult = Result<CallValue, RpcError>;

/// Decodes a success body into the type the caller expects.
///
/// Captured at call time so the response can be decoded with the *calling*
/// stub's codec, whichever transport task delivers it.
pub trait ReplyDecoder: Send + Sync {
    /// Decode a success body.
    fn decode(&self, body: &[u8]) -> Result<CallValue, RpcError>;

    /// Name of the expected result type, for logs.
    fn expected_type(&self) -> &'static str;
}

/// [`ReplyDecoder`] for a concrete result type and codec.
pub struct TypedDecoder<T, C> {
    codec: C,
    _marker: PhantomData<fn() -> T>,
}

impl<T, C> TypedDecoder<T, C> {
    /// Decoder producing `T` through `codec`.
    pub fn new(codec: C) -> Self {
        Self {
            codec,
            _marker: PhantomData,
        }
    }
}

impl<T, C> ReplyDecoder for TypedDecoder<T, C>
where
    T: DeserializeOwned + Send + 'static,
    C: PayloadCodec,
{
    fn decode(&self, body: &[u8]) -> Result<CallValue, RpcError> {
        let value: T = self.codec.from_bytes(body)?;
        Ok(Box::new(value))
    }

    fn expected_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Registry record of one in-flight call.
pub struct OutstandingCall {
    id: u64,
    method: String,
    decoder: Arc<dyn ReplyDecoder>,
    sink: oneshot::Sender<CallResult>,
}

impl OutstandingCall {
    /// Create a record; the caller keeps the receiving half of `sink`.
    pub fn new(
        id: u64,
        method: impl Into<String>,
        decoder: Arc<dyn ReplyDecoder>,
        sink: oneshot::Sender<CallResult>,
    ) -> Self {
        Self {
            id,
            method: method.into(),
            decoder,
            sink,
        }
    }

    /// Correlation id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Method name, for logs.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Decoder for this call's success body.
    pub fn decoder(&self) -> Arc<dyn ReplyDecoder> {
        self.decoder.clone()
    }

    /// Deliver the result. Returns `false` if the caller already dropped its future.
    pub fn resolve(self, result: CallResult) -> bool {
        self.sink.send(result).is_ok()
    }
}

impl std::fmt::Debug for OutstandingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutstandingCall")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("expected_type", &self.decoder.expected_type())
            .finish()
    }
}

/// Thread-safe table of outstanding calls.
///
/// One mutex guards the map; codec and network costs dwarf the lock.
#[derive(Default)]
pub struct CallRegistry {
    calls: Mutex<HashMap<u64, OutstandingCall>>,
}

impl CallRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call under its correlation id.
    ///
    /// # Errors
    ///
    /// `DuplicateCorrelationId` if the id is already present. That is a bug in
    /// id allocation; the existing entry is left untouched.
    pub fn insert(&self, call: OutstandingCall) -> Result<(), RpcError> {
        let id = call.id;
        match self.calls.lock().entry(id) {
            Entry::Occupied(_) => {
                tracing::error!(correlation_id = id, "correlation id registered twice");
                Err(RpcError::DuplicateCorrelationId { id })
            }
            Entry::Vacant(slot) => {
                slot.insert(call);
                Ok(())
            }
        }
    }

    /// Remove and return the call for `id`. A second removal returns `None`.
    pub fn remove(&self, id: u64) -> Option<OutstandingCall> {
        self.calls.lock().remove(&id)
    }

    /// Inspect the call for `id` without removing it.
    ///
    /// `f` runs under the registry lock; keep it short.
    pub fn peek_with<R>(&self, id: u64, f: impl FnOnce(&OutstandingCall) -> R) -> Option<R> {
        self.calls.lock().get(&id).map(f)
    }

    /// Remove and return every call.
    pub fn drain(&self) -> Vec<OutstandingCall> {
        let mut calls = self.calls.lock();
        calls.drain().map(|(_, call)| call).collect()
    }

    /// Number of outstanding calls.
    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    /// Whether no calls are outstanding.
    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }

    /// Whether a call with this id is outstanding.
    pub fn contains(&self, id: u64) -> bool {
        self.calls.lock().contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lantern_core::JsonCodec;

    fn call(id: u64) -> (OutstandingCall, oneshot::Receiver<CallResult>) {
        let (tx, rx) = oneshot::channel();
        let decoder: Arc<dyn ReplyDecoder> = Arc::new(TypedDecoder::<String, _>::new(JsonCodec));
        (OutstandingCall::new(id, "Say", decoder, tx), rx)
    }

    #[test]
    fn test_insert_and_remove() {
        let registry = CallRegistry::new();
        let (c, _rx) = call(1);
        registry.insert(c).expect("insert");

        assert!(registry.contains(1));
        assert_eq!(registry.len(), 1);

        let removed = registry.remove(1).expect("present");
        assert_eq!(removed.id(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = CallRegistry::new();
        let (c, _rx) = call(7);
        registry.insert(c).expect("insert");

        assert!(registry.remove(7).is_some());
        assert!(registry.remove(7).is_none());
        assert!(registry.remove(8).is_none());
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let registry = CallRegistry::new();
        let (first, _rx1) = call(3);
        let (second, _rx2) = call(3);

        registry.insert(first).expect("first insert");
        assert_eq!(
            registry.insert(second),
            Err(RpcError::DuplicateCorrelationId { id: 3 })
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_peek_does_not_remove() {
        let registry = CallRegistry::new();
        let (c, _rx) = call(5);
        registry.insert(c).expect("insert");

        let decoder = registry.peek_with(5, |c| c.decoder()).expect("present");
        assert!(registry.contains(5));

        let value = decoder.decode(br#""hi""#).expect("decode");
        assert_eq!(*value.downcast::<String>().expect("String"), "hi");

        assert!(registry.peek_with(6, |c| c.id()).is_none());
    }

    #[test]
    fn test_drain_empties_registry() {
        let registry = CallRegistry::new();
        let mut receivers = Vec::new();
        for id in 1..=5 {
            let (c, rx) = call(id);
            registry.insert(c).expect("insert");
            receivers.push(rx);
        }

        let mut drained: Vec<u64> = registry.drain().iter().map(OutstandingCall::id).collect();
        drained.sort_unstable();
        assert_eq!(drained, vec![1, 2, 3, 4, 5]);
        assert!(registry.is_empty());

        // Still usable afterwards.
        let (c, _rx) = call(6);
        registry.insert(c).expect("insert after drain");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_reports_dropped_receiver() {
        let (c, rx) = call(1);
        drop(rx);
        assert!(!c.resolve(Err(RpcError::NoRuntime)));

        let (c, mut rx) = call(2);
        assert!(c.resolve(Err(RpcError::NoRuntime)));
        assert!(matches!(rx.try_recv(), Ok(Err(RpcError::NoRuntime))));
    }

    #[test]
    fn test_concurrent_inserts_and_removes() {
        let registry = Arc::new(CallRegistry::new());
        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for i in 0..100u64 {
                        let id = t * 1000 + i;
                        let (c, _rx) = call(id);
                        registry.insert(c).expect("unique id");
                        assert!(registry.remove(id).is_some());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("thread");
        }
        assert!(registry.is_empty());
    }
}
