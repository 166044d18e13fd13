//! Transport that fails every call.
//!
//! Bound to `null://` endpoints, for services that are declared but have no
//! implementation in this deployment.

use std::sync::Arc;

use bytes::Bytes;
use lantern_core::Endpoint;

use super::{ResponseSink, Transport, TransportBuilder};
use crate::error::RpcError;
use crate::wire::Envelope;

/// Builder for the `null` scheme.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTransportBuilder;

impl TransportBuilder for NullTransportBuilder {
    fn scheme(&self) -> &'static str {
        "null"
    }

    fn build(
        &self,
        endpoint: &Endpoint,
        sink: ResponseSink,
    ) -> Result<Arc<dyn Transport>, RpcError> {
        Ok(Arc::new(NullTransport {
            endpoint: endpoint.to_string(),
            sink,
        }))
    }
}

struct NullTransport {
    endpoint: String,
    sink: ResponseSink,
}

impl Transport for NullTransport {
    fn send(&self, envelope: Envelope, _payload: Bytes) -> Result<(), RpcError> {
        tracing::debug!(
            endpoint = %self.endpoint,
            correlation_id = envelope.correlation_id,
            "null transport failing call"
        );
        self.sink.complete_error(
            envelope.correlation_id,
            RpcError::NotImplemented {
                endpoint: self.endpoint.clone(),
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use lantern_core::JsonCodec;

    use super::*;
    use crate::config::DispatcherConfig;
    use crate::rpc::{Dispatcher, ServiceStub};

    #[tokio::test]
    async fn test_every_call_not_implemented() {
        let endpoint = Endpoint::parse("null://nowhere/Billing").expect("endpoint");
        let dispatcher = Arc::new(
            Dispatcher::new(
                endpoint.clone(),
                &DispatcherConfig::default(),
                &NullTransportBuilder,
            )
            .expect("dispatcher"),
        );
        let stub = ServiceStub::new(dispatcher.clone(), "Billing", JsonCodec);

        for _ in 0..3 {
            let result: Result<u64, _> = stub.invoke("Charge", &100u64).await;
            assert_eq!(
                result,
                Err(RpcError::NotImplemented {
                    endpoint: endpoint.to_string()
                })
            );
        }
        assert_eq!(dispatcher.outstanding_calls(), 0);
    }
}
