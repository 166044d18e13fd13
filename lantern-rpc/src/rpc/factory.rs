//! Scheme-keyed transport builders.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::transport::{
    InProcessTransportBuilder, NullTransportBuilder, SocketTransportBuilder, TransportBuilder,
};

/// Maps URI schemes to the builder for their transport.
#[derive(Default)]
pub struct TransportFactory {
    builders: RwLock<HashMap<&'static str, Arc<dyn TransportBuilder>>>,
}

impl TransportFactory {
    /// A factory with nothing registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory knowing `tcp`, `inproc` (on the global router) and `null`.
    pub fn with_defaults() -> Self {
        let factory = Self::new();
        factory.register(SocketTransportBuilder::new());
        factory.register(InProcessTransportBuilder::global());
        factory.register(NullTransportBuilder);
        factory
    }

    /// Register `builder` under its scheme, returning the builder it replaces.
    pub fn register<B>(&self, builder: B) -> Option<Arc<dyn TransportBuilder>>
    where
        B: TransportBuilder + 'static,
    {
        let scheme = builder.scheme();
        let previous = self.builders.write().insert(scheme, Arc::new(builder));
        if previous.is_some() {
            tracing::debug!(scheme, "transport builder replaced");
        }
        previous
    }

    /// Builder for `scheme`, if one is registered.
    pub fn try_build(&self, scheme: &str) -> Option<Arc<dyn TransportBuilder>> {
        self.builders.read().get(scheme).cloned()
    }

    /// Registered schemes, sorted.
    pub fn schemes(&self) -> Vec<&'static str> {
        let mut schemes: Vec<_> = self.builders.read().keys().copied().collect();
        schemes.sort_unstable();
        schemes
    }
}

impl std::fmt::Debug for TransportFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportFactory")
            .field("schemes", &self.schemes())
            .finish()
    }
}
