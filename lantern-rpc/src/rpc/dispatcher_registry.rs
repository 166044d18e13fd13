//! One shared dispatcher per endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use lantern_core::Endpoint;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use super::dispatcher::Dispatcher;
use super::factory::TransportFactory;
use crate::config::DispatcherConfig;
use crate::error::RpcError;

static GLOBAL_REGISTRY: Lazy<DispatcherRegistry> = Lazy::new(|| {
    DispatcherRegistry::new(TransportFactory::with_defaults(), DispatcherConfig::from_env())
});

/// Cache of dispatchers keyed by endpoint.
///
/// Dispatchers spawn their workers on the runtime current at creation, so a
/// registry should be used from a single runtime.
pub struct DispatcherRegistry {
    factory: TransportFactory,
    config: DispatcherConfig,
    dispatchers: Mutex<HashMap<Endpoint, Arc<Dispatcher>>>,
}

impl DispatcherRegistry {
    /// Registry building transports through `factory`.
    pub fn new(factory: TransportFactory, config: DispatcherConfig) -> Self {
        Self {
            factory,
            config,
            dispatchers: Mutex::new(HashMap::new()),
        }
    }

    /// Process-wide registry with the default transports and
    /// [`DispatcherConfig::from_env`]. Created on first use, never torn down.
    pub fn global() -> &'static DispatcherRegistry {
        &GLOBAL_REGISTRY
    }

    /// The dispatcher for `endpoint`, created on first request.
    ///
    /// Lookup and creation happen under one lock, so concurrent callers for
    /// the same endpoint always share one dispatcher.
    ///
    /// # Errors
    ///
    /// `UnknownScheme` if no transport is registered for the endpoint's
    /// scheme, or any error from building the dispatcher.
    pub fn get_dispatcher(&self, endpoint: &Endpoint) -> Result<Arc<Dispatcher>, RpcError> {
        let mut dispatchers = self.dispatchers.lock();
        if let Some(dispatcher) = dispatchers.get(endpoint) {
            return Ok(dispatcher.clone());
        }

        let Some(builder) = self.factory.try_build(endpoint.scheme()) else {
            tracing::error!(
                endpoint = %endpoint,
                scheme = endpoint.scheme(),
                known = ?self.factory.schemes(),
                "no transport registered for scheme"
            );
            return Err(RpcError::UnknownScheme {
                scheme: endpoint.scheme().to_string(),
            });
        };

        let dispatcher = Arc::new(Dispatcher::new(
            endpoint.clone(),
            &self.config,
            builder.as_ref(),
        )?);
        dispatchers.insert(endpoint.clone(), dispatcher.clone());
        Ok(dispatcher)
    }

    /// Evict the dispatcher for `endpoint`.
    ///
    /// It shuts down once the last outside handle is dropped.
    pub fn remove(&self, endpoint: &Endpoint) -> Option<Arc<Dispatcher>> {
        self.dispatchers.lock().remove(endpoint)
    }

    /// Number of cached dispatchers.
    pub fn len(&self) -> usize {
        self.dispatchers.lock().len()
    }

    /// Whether no dispatchers are cached.
    pub fn is_empty(&self) -> bool {
        self.dispatchers.lock().is_empty()
    }
}

impl std::fmt::Debug for DispatcherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherRegistry")
            .field("factory", &self.factory)
            .field("config", &self.config)
            .field("dispatchers", &self.len())
            .finish()
    }
}
