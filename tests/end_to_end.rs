//! Exercises the gateway end to end against the in-memory broker and the
//! reference JSON codec: simple values, a single stream, an unknown method,
//! a host exception, reaping a dead client, and a nested stream.

use bytes::Bytes;
use flux_gateway::broker::memory::InMemoryBroker;
use flux_gateway::broker::Broker;
use flux_gateway::codec::json::JsonCodec;
use flux_gateway::host::{FnMethod, Invocation, MethodTable, RpcHost};
use flux_gateway::principal::NodeOnlyResolver;
use flux_gateway::value::{Notification, Observable, RpcValue};
use flux_gateway::{GatewayBuilder, GatewayConfig};
use futures_util::stream;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const LEGAL_NAME: &str = "node-1";

struct TestHost;

impl RpcHost for TestHost {
    fn build_methods(&self, table: &mut MethodTable) -> Result<(), flux_gateway::GatewayError> {
        table.register(
            "add",
            FnMethod::new(|call: Invocation| async move {
                let sum: i64 = call
                    .args
                    .into_iter()
                    .map(|arg| match arg {
                        RpcValue::Int(i) => i,
                        _ => 0,
                    })
                    .sum();
                Ok(RpcValue::Int(sum))
            }),
        )?;

        table.register(
            "ticks",
            FnMethod::new(|_: Invocation| async move {
                let items = vec![
                    Notification::OnNext(RpcValue::Int(10)),
                    Notification::OnNext(RpcValue::Int(20)),
                    Notification::OnNext(RpcValue::Int(30)),
                    Notification::OnCompleted,
                ];
                Ok(RpcValue::Stream(Observable::new(stream::iter(items))))
            }),
        )?;

        table.register(
            "boom",
            FnMethod::new(|_: Invocation| async move {
                Err(flux_gateway::GatewayError::Invocation {
                    cause: "boom".to_string(),
                })
            }),
        )?;

        table.register(
            "forever",
            FnMethod::new(|_: Invocation| async move {
                let counter = Arc::new(AtomicUsize::new(0));
                let generator = stream::unfold(counter, |counter| async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Some((Notification::OnNext(RpcValue::Int(1)), counter))
                });
                Ok(RpcValue::Stream(Observable::new(generator)))
            }),
        )?;

        table.register(
            "nested",
            FnMethod::new(|_: Invocation| async move {
                let inner = stream::iter(vec![
                    Notification::OnNext(RpcValue::Str("inner-1".to_string())),
                    Notification::OnCompleted,
                ]);
                let outer = stream::iter(vec![Notification::OnNext(RpcValue::Stream(
                    Observable::new(inner),
                ))]);
                Ok(RpcValue::Stream(Observable::new(outer)))
            }),
        )?;

        Ok(())
    }
}

async fn build_gateway(broker: Arc<InMemoryBroker>) -> flux_gateway::Gateway {
    let config = GatewayConfig::builder(LEGAL_NAME)
        .reap_interval_ms(30)
        .build()
        .unwrap();
    let broker: Arc<dyn Broker> = broker;
    GatewayBuilder::new(config)
        .configure_broker(broker)
        .configure_codec(Arc::new(JsonCodec::new()))
        .configure_auth(Arc::new(NodeOnlyResolver::new(LEGAL_NAME)))
        .configure_host(Arc::new(TestHost))
        .build()
        .unwrap()
}

fn request_body(request_id: u64, method: &str, args: Vec<Value>, client_address: &str) -> Bytes {
    let envelope = serde_json::json!({
        "type": "request",
        "requestId": request_id,
        "method": method,
        "args": args,
        "clientAddress": client_address,
    });
    Bytes::from(serde_json::to_vec(&envelope).unwrap())
}

fn observables_closed_body(ids: Vec<u64>) -> Bytes {
    let envelope = serde_json::json!({
        "type": "observablesClosed",
        "observationIds": ids,
    });
    Bytes::from(serde_json::to_vec(&envelope).unwrap())
}

async fn recv_json(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Bytes>) -> Value {
    let bytes = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("channel closed");
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn simple_value_request_gets_exactly_one_reply() {
    let broker = InMemoryBroker::new();
    let gateway = build_gateway(Arc::clone(&broker)).await;
    gateway.start().await.unwrap();

    let mut client_rx = broker.attach_client("RPC_CLIENT_QUEUE_PREFIX.q1");
    broker.push_request(
        Some(LEGAL_NAME.to_string()),
        request_body(7, "add", vec![serde_json::json!(2), serde_json::json!(3)], "RPC_CLIENT_QUEUE_PREFIX.q1"),
    );

    let reply = recv_json(&mut client_rx).await;
    assert_eq!(reply["type"], "reply");
    assert_eq!(reply["requestId"], 7);
    assert_eq!(reply["result"]["ok"], 5);

    gateway.close().await;
}

#[tokio::test]
async fn single_stream_delivers_reply_then_observations_in_order() {
    let broker = InMemoryBroker::new();
    let gateway = build_gateway(Arc::clone(&broker)).await;
    gateway.start().await.unwrap();

    let mut client_rx = broker.attach_client("RPC_CLIENT_QUEUE_PREFIX.q1");
    broker.push_request(
        Some(LEGAL_NAME.to_string()),
        request_body(8, "ticks", vec![], "RPC_CLIENT_QUEUE_PREFIX.q1"),
    );

    let reply = recv_json(&mut client_rx).await;
    assert_eq!(reply["requestId"], 8);
    let observation_id = reply["result"]["ok"]["$observationId"].as_u64().unwrap();

    for expected in [10, 20, 30] {
        let observation = recv_json(&mut client_rx).await;
        assert_eq!(observation["type"], "observation");
        assert_eq!(observation["observationId"], observation_id);
        assert_eq!(observation["notification"]["onNext"], expected);
    }
    let terminal = recv_json(&mut client_rx).await;
    assert_eq!(terminal["notification"]["onCompleted"], true);

    gateway.close().await;
}

#[tokio::test]
async fn unknown_method_replies_with_an_error() {
    let broker = InMemoryBroker::new();
    let gateway = build_gateway(Arc::clone(&broker)).await;
    gateway.start().await.unwrap();

    let mut client_rx = broker.attach_client("RPC_CLIENT_QUEUE_PREFIX.q1");
    broker.push_request(
        Some(LEGAL_NAME.to_string()),
        request_body(9, "nope", vec![], "RPC_CLIENT_QUEUE_PREFIX.q1"),
    );

    let reply = recv_json(&mut client_rx).await;
    assert_eq!(reply["requestId"], 9);
    assert_eq!(reply["result"]["err"]["code"], "unknown_method");

    gateway.close().await;
}

#[tokio::test]
async fn host_exception_is_surfaced_as_a_reply_error() {
    let broker = InMemoryBroker::new();
    let gateway = build_gateway(Arc::clone(&broker)).await;
    gateway.start().await.unwrap();

    let mut client_rx = broker.attach_client("RPC_CLIENT_QUEUE_PREFIX.q1");
    broker.push_request(
        Some(LEGAL_NAME.to_string()),
        request_body(1, "boom", vec![], "RPC_CLIENT_QUEUE_PREFIX.q1"),
    );

    let reply = recv_json(&mut client_rx).await;
    assert_eq!(reply["result"]["err"]["code"], "invocation_error");
    assert_eq!(reply["result"]["err"]["message"], "boom");

    gateway.close().await;
}

#[tokio::test]
async fn reap_stops_delivery_after_client_queue_disappears() {
    let broker = InMemoryBroker::new();
    let gateway = build_gateway(Arc::clone(&broker)).await;
    gateway.start().await.unwrap();

    let mut client_rx = broker.attach_client("RPC_CLIENT_QUEUE_PREFIX.q2");
    broker.push_request(
        Some(LEGAL_NAME.to_string()),
        request_body(2, "forever", vec![], "RPC_CLIENT_QUEUE_PREFIX.q2"),
    );

    // Drain the reply and at least one observation to establish the stream
    // is actually flowing before we kill the queue.
    let _reply = recv_json(&mut client_rx).await;
    let _first = recv_json(&mut client_rx).await;

    broker.delete_queue("RPC_CLIENT_QUEUE_PREFIX.q2");
    // Give the reaper (30ms interval) a couple of cycles to collect it.
    tokio::time::sleep(Duration::from_millis(120)).await;

    // Drain whatever arrived in flight, then assert silence.
    while tokio::time::timeout(Duration::from_millis(20), client_rx.recv())
        .await
        .is_ok()
    {}
    let nothing_more = tokio::time::timeout(Duration::from_millis(150), client_rx.recv()).await;
    assert!(nothing_more.is_err(), "no Observation should arrive after reap");

    gateway.close().await;
}

#[tokio::test]
async fn observables_closed_stops_delivery_for_that_id() {
    let broker = InMemoryBroker::new();
    let gateway = build_gateway(Arc::clone(&broker)).await;
    gateway.start().await.unwrap();

    let mut client_rx = broker.attach_client("RPC_CLIENT_QUEUE_PREFIX.q3");
    broker.push_request(
        Some(LEGAL_NAME.to_string()),
        request_body(3, "forever", vec![], "RPC_CLIENT_QUEUE_PREFIX.q3"),
    );

    let reply = recv_json(&mut client_rx).await;
    let observation_id = reply["result"]["ok"]["$observationId"].as_u64().unwrap();
    let _first = recv_json(&mut client_rx).await;

    broker.push_request(None, observables_closed_body(vec![observation_id]));
    // No validated-user header needed for a control message; the dispatcher
    // only authenticates RpcRequest, not ObservablesClosed.

    while tokio::time::timeout(Duration::from_millis(20), client_rx.recv())
        .await
        .is_ok()
    {}
    let nothing_more = tokio::time::timeout(Duration::from_millis(150), client_rx.recv()).await;
    assert!(nothing_more.is_err());

    gateway.close().await;
}

#[tokio::test]
async fn nested_stream_registers_an_independent_id_per_emission() {
    let broker = InMemoryBroker::new();
    let gateway = build_gateway(Arc::clone(&broker)).await;
    gateway.start().await.unwrap();

    let mut client_rx = broker.attach_client("RPC_CLIENT_QUEUE_PREFIX.q4");
    broker.push_request(
        Some(LEGAL_NAME.to_string()),
        request_body(4, "nested", vec![], "RPC_CLIENT_QUEUE_PREFIX.q4"),
    );

    let reply = recv_json(&mut client_rx).await;
    let outer_id = reply["result"]["ok"]["$observationId"].as_u64().unwrap();

    let outer_emission = recv_json(&mut client_rx).await;
    assert_eq!(outer_emission["observationId"], outer_id);
    let inner_id = outer_emission["notification"]["onNext"]["$observationId"]
        .as_u64()
        .unwrap();
    assert_ne!(inner_id, outer_id);

    let inner_emission = recv_json(&mut client_rx).await;
    assert_eq!(inner_emission["observationId"], inner_id);
    assert_eq!(inner_emission["notification"]["onNext"], "inner-1");

    gateway.close().await;
}

#[tokio::test]
async fn close_is_idempotent() {
    let broker = InMemoryBroker::new();
    let gateway = build_gateway(broker).await;
    gateway.start().await.unwrap();
    gateway.close().await;
    gateway.close().await;
}

#[tokio::test]
async fn metrics_reflect_requests_replies_observations_and_reaps() {
    let broker = InMemoryBroker::new();
    let gateway = build_gateway(Arc::clone(&broker)).await;
    gateway.start().await.unwrap();

    let mut client_rx = broker.attach_client("RPC_CLIENT_QUEUE_PREFIX.q6");
    broker.push_request(
        Some(LEGAL_NAME.to_string()),
        request_body(6, "ticks", vec![], "RPC_CLIENT_QUEUE_PREFIX.q6"),
    );
    let _reply = recv_json(&mut client_rx).await;
    for _ in 0..3 {
        let _observation = recv_json(&mut client_rx).await;
    }
    let _terminal = recv_json(&mut client_rx).await;

    assert_eq!(gateway.metrics().requests_dispatched.get(), 1);
    assert_eq!(gateway.metrics().replies_sent.get(), 1);
    assert_eq!(gateway.metrics().observations_sent.get(), 4);
    assert_eq!(gateway.metrics().subscriptions_reaped.get(), 0);

    broker.push_request(
        Some(LEGAL_NAME.to_string()),
        request_body(7, "forever", vec![], "RPC_CLIENT_QUEUE_PREFIX.q6"),
    );
    let _reply = recv_json(&mut client_rx).await;
    let _first = recv_json(&mut client_rx).await;
    broker.delete_queue("RPC_CLIENT_QUEUE_PREFIX.q6");
    tokio::time::sleep(Duration::from_millis(120)).await;

    assert!(gateway.metrics().subscriptions_reaped.get() > 0);

    gateway.close().await;
}

#[tracing_test::traced_test]
#[tokio::test]
async fn reap_cycle_logs_the_undeployed_and_abandoned_counts() {
    let broker = InMemoryBroker::new();
    let gateway = build_gateway(Arc::clone(&broker)).await;
    gateway.start().await.unwrap();

    let mut client_rx = broker.attach_client("RPC_CLIENT_QUEUE_PREFIX.q5");
    broker.push_request(
        Some(LEGAL_NAME.to_string()),
        request_body(5, "forever", vec![], "RPC_CLIENT_QUEUE_PREFIX.q5"),
    );
    let _reply = recv_json(&mut client_rx).await;
    let _first = recv_json(&mut client_rx).await;

    broker.delete_queue("RPC_CLIENT_QUEUE_PREFIX.q5");
    tokio::time::sleep(Duration::from_millis(120)).await;

    assert!(logs_contain("reap cycle collected orphaned subscriptions"));
    gateway.close().await;
}
