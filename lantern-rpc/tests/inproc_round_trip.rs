//! End-to-end calls through the in-process router and the dispatcher registry.

use std::sync::Arc;
use std::time::Duration;

use lantern_rpc::{
    DispatcherConfig, DispatcherRegistry, Endpoint, InProcessTransportBuilder, InboundRequest,
    JsonCodec, NullTransportBuilder, PayloadCodec, RemoteFault, Responder, Router, RpcError,
    ServiceStub, SocketTransportBuilder, TransportFactory,
};
use serde::{Deserialize, Serialize};

fn endpoint(s: &str) -> Endpoint {
    Endpoint::parse(s).expect("endpoint")
}

/// Registry whose `inproc` scheme routes through `router`.
fn registry(router: &Router) -> DispatcherRegistry {
    let factory = TransportFactory::new();
    factory.register(InProcessTransportBuilder::new(router.clone()));
    factory.register(NullTransportBuilder);
    factory.register(SocketTransportBuilder::new());
    DispatcherRegistry::new(factory, DispatcherConfig::default())
}

fn echo(request: InboundRequest, responder: Responder) {
    let text: Result<String, RpcError> = request
        .call()
        .map_err(RpcError::from)
        .and_then(|(_, body)| Ok(JsonCodec.from_bytes(body)?));
    let _ = match text {
        Ok(text) => responder.respond_success(&JsonCodec, &text),
        Err(e) => responder.respond_fault(&RemoteFault::new("BadRequest", e.to_string())),
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Divide {
    lhs: i64,
    rhs: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Quotient {
    value: i64,
}

/// Calculator with a method that fails with one or several causes.
fn calculator(request: InboundRequest, responder: Responder) {
    let Ok((header, body)) = request.call() else {
        let _ = responder.respond(vec![0xFF]);
        return;
    };
    let _ = match header.service_method.as_str() {
        "Divide" => match JsonCodec.from_bytes::<Divide>(body) {
            Ok(Divide { rhs: 0, .. }) => {
                responder.respond_fault(&RemoteFault::composite(
                    "validation failed",
                    vec![RemoteFault::new("DivideByZero", "rhs was 0")],
                ))
            }
            Ok(Divide { lhs, rhs }) => {
                responder.respond_success(&JsonCodec, &Quotient { value: lhs / rhs })
            }
            Err(e) => responder.respond_fault(&RemoteFault::new("BadRequest", e.to_string())),
        },
        "Validate" => responder.respond_fault(&RemoteFault::composite(
            "validation failed",
            vec![
                RemoteFault::new("Range", "lhs out of range"),
                RemoteFault::composite("nested", vec![RemoteFault::new("Range", "rhs out of range")]),
            ],
        )),
        // Answers with a bare number whatever the caller expects.
        "Count" => responder.respond_success(&JsonCodec, &7u32),
        other => responder.respond_fault(&RemoteFault::new("UnknownMethod", other)),
    };
}

#[tokio::test]
async fn test_echo_say_hello_through_global_registry() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let ep = endpoint("inproc://integration-global/Echo");
    Router::global().register(ep.clone(), echo).expect("register");

    let stub =
        ServiceStub::for_endpoint(DispatcherRegistry::global(), &ep, JsonCodec).expect("stub");
    assert_eq!(stub.service_name(), "Echo");

    let reply: String = stub.invoke("Say", "hello").await.expect("reply");
    assert_eq!(reply, "hello");

    assert!(Router::global().unregister(&ep));
    DispatcherRegistry::global().remove(&ep);
}

#[tokio::test]
async fn test_structured_call() {
    let router = Router::new();
    let ep = endpoint("inproc://local/Calculator");
    router.register(ep.clone(), calculator).expect("register");

    let registry = registry(&router);
    let calc = ServiceStub::for_endpoint(&registry, &ep, JsonCodec).expect("stub");

    let q: Quotient = calc
        .invoke("Divide", &Divide { lhs: 20, rhs: 5 })
        .await
        .expect("divide");
    assert_eq!(q, Quotient { value: 4 });
}

#[tokio::test]
async fn test_single_cause_fault_unwrapped() {
    let router = Router::new();
    let ep = endpoint("inproc://local/Calculator");
    router.register(ep.clone(), calculator).expect("register");
    let calc = ServiceStub::for_endpoint(&registry(&router), &ep, JsonCodec).expect("stub");

    let result: Result<Quotient, _> = calc.invoke("Divide", &Divide { lhs: 1, rhs: 0 }).await;
    assert_eq!(
        result,
        Err(RpcError::Remote(RemoteFault::new("DivideByZero", "rhs was 0")))
    );
}

#[tokio::test]
async fn test_multi_cause_fault_flattened() {
    let router = Router::new();
    let ep = endpoint("inproc://local/Calculator");
    router.register(ep.clone(), calculator).expect("register");
    let calc = ServiceStub::for_endpoint(&registry(&router), &ep, JsonCodec).expect("stub");

    let result: Result<Quotient, _> = calc.invoke("Validate", &()).await;
    assert_eq!(
        result,
        Err(RpcError::Composite(vec![
            RpcError::Remote(RemoteFault::new("Range", "lhs out of range")),
            RpcError::Remote(RemoteFault::new("Range", "rhs out of range")),
        ]))
    );
}

#[tokio::test]
async fn test_decode_failure_does_not_affect_other_calls() {
    let router = Router::new();
    let ep = endpoint("inproc://local/Calculator");
    router.register(ep.clone(), calculator).expect("register");
    let calc = ServiceStub::for_endpoint(&registry(&router), &ep, JsonCodec).expect("stub");

    let wrong = calc.call::<_, Quotient>("Count", &()).expect("call");
    let right = calc.call::<_, u32>("Count", &()).expect("call");
    let divide = calc
        .call::<_, Quotient>("Divide", &Divide { lhs: 9, rhs: 3 })
        .expect("call");

    assert!(matches!(wrong.await, Err(RpcError::Decode { .. })));
    assert_eq!(right.await, Ok(7));
    assert_eq!(divide.await, Ok(Quotient { value: 3 }));
    assert_eq!(calc.dispatcher().outstanding_calls(), 0);
}

#[tokio::test]
async fn test_malformed_response_header_fails_call() {
    let router = Router::new();
    let ep = endpoint("inproc://local/Broken");
    router
        .register(ep.clone(), |_request: InboundRequest, responder: Responder| {
            let _ = responder.respond(Vec::new());
        })
        .expect("register");
    let stub = ServiceStub::for_endpoint(&registry(&router), &ep, JsonCodec).expect("stub");

    let result: Result<u32, _> = stub.invoke("Anything", &()).await;
    assert!(matches!(result, Err(RpcError::Decode { .. })));
}

#[tokio::test]
async fn test_concurrent_callers_out_of_order_replies() {
    let router = Router::new();
    let ep = endpoint("inproc://local/Delay");
    router
        .register(ep.clone(), |request: InboundRequest, responder: Responder| {
            let n: u64 = request
                .call()
                .ok()
                .and_then(|(_, body)| JsonCodec.from_bytes(body).ok())
                .unwrap_or_default();
            // Later requests answer sooner.
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50 - n)).await;
                let _ = responder.respond_success(&JsonCodec, &(n * 2));
            });
        })
        .expect("register");

    let stub = Arc::new(ServiceStub::for_endpoint(&registry(&router), &ep, JsonCodec).expect("stub"));
    let tasks: Vec<_> = (0..40u64)
        .map(|n| {
            let stub = stub.clone();
            tokio::spawn(async move {
                let doubled: u64 = stub.invoke("Double", &n).await.expect("reply");
                (n, doubled)
            })
        })
        .collect();

    for task in tasks {
        let (n, doubled) = task.await.expect("task");
        assert_eq!(doubled, n * 2);
    }
    assert_eq!(stub.dispatcher().outstanding_calls(), 0);
}

#[tokio::test]
async fn test_unregistered_handler_is_endpoint_not_found() {
    let router = Router::new();
    let ep = endpoint("inproc://local/Echo");
    router.register(ep.clone(), echo).expect("register");
    let stub = ServiceStub::for_endpoint(&registry(&router), &ep, JsonCodec).expect("stub");

    let reply: String = stub.invoke("Say", "first").await.expect("reply");
    assert_eq!(reply, "first");

    router.unregister(&ep);
    let result: Result<String, _> = stub.invoke("Say", "second").await;
    assert_eq!(
        result,
        Err(RpcError::EndpointNotFound {
            endpoint: ep.to_string()
        })
    );
}

#[tokio::test]
async fn test_null_scheme_not_implemented() {
    let registry = registry(&Router::new());
    let ep = endpoint("null://unused/Billing");
    let stub = ServiceStub::for_endpoint(&registry, &ep, JsonCodec).expect("stub");

    let result: Result<u64, _> = stub.invoke("Charge", &10u64).await;
    assert_eq!(
        result,
        Err(RpcError::NotImplemented {
            endpoint: ep.to_string()
        })
    );
    assert_eq!(stub.dispatcher().outstanding_calls(), 0);
}

#[tokio::test]
async fn test_registry_shares_dispatchers_per_endpoint() {
    let registry = registry(&Router::new());

    let a = registry
        .get_dispatcher(&endpoint("inproc://local/A"))
        .expect("a");
    let a_again = registry
        .get_dispatcher(&endpoint("inproc://local/A"))
        .expect("a again");
    let b = registry
        .get_dispatcher(&endpoint("null://local/A"))
        .expect("b");

    assert!(Arc::ptr_eq(&a, &a_again));
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(registry.len(), 2);

    let unknown = registry.get_dispatcher(&endpoint("smtp://local/A"));
    assert_eq!(
        unknown.map(|_| ()),
        Err(RpcError::UnknownScheme {
            scheme: "smtp".into()
        })
    );
}

#[tokio::test]
async fn test_stub_requires_service_path() {
    let registry = registry(&Router::new());
    let result = ServiceStub::for_endpoint(&registry, &endpoint("null://local"), JsonCodec);
    assert!(matches!(result, Err(RpcError::InvalidEndpoint { .. })));
}

#[tokio::test]
async fn test_tcp_endpoint_without_port_rejected() {
    let registry = registry(&Router::new());
    let result = registry.get_dispatcher(&endpoint("tcp://localhost/Echo"));
    assert!(matches!(result, Err(RpcError::InvalidEndpoint { .. })));
    assert!(registry.is_empty());
}
