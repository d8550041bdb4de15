//! End-to-end exchange cycles, driving `MessageStore`, `MessageExchange`
//! and `BrokerServer` together over a `FakeTransport` and a virtual clock,
//! without any per-module mocking of the pieces in between.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use exchange_core::exchange::{ExchangeConfig, MessageExchange};
use exchange_core::identity::Identity;
use exchange_core::message::{FieldType, Message, Schema};
use exchange_core::reactor::{Event, Reactor, Topic, VirtualReactor};
use exchange_core::store::MessageStore;
use exchange_core::transport::FakeTransport;
use exchange_core::BrokerServer;

fn build(transport: Arc<FakeTransport>) -> (Arc<MessageExchange>, Arc<VirtualReactor>) {
    let reactor = Arc::new(VirtualReactor::new());
    let mut store = MessageStore::new(reactor.clone());
    store.add_schema(Schema::new("data", [("value".to_string(), FieldType::Int)]));
    store
        .set_accepted_types(["data".to_string(), "resynchronize".to_string()])
        .unwrap();
    let identity = Identity::new();
    let exchange = MessageExchange::new(reactor.clone(), transport, store, identity, ExchangeConfig::default());
    (exchange, reactor)
}

#[tokio::test]
async fn enqueued_message_is_sent_and_acknowledged() {
    let transport = Arc::new(FakeTransport::new());
    transport.push_response(Some(serde_json::json!({"next-expected-sequence": 1, "messages": []})));
    let (exchange, _reactor) = build(transport.clone());

    exchange.send(Message::new("data").with_field("value", 1), false).unwrap();
    exchange.exchange().await;

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    let sent = requests[0].0.get("messages").and_then(|v| v.as_array()).unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].get("type").and_then(|v| v.as_str()), Some("data"));
}

#[tokio::test]
async fn server_repeating_its_own_expectation_does_not_set_urgent_mode() {
    let transport = Arc::new(FakeTransport::new());
    transport.push_response(Some(serde_json::json!({"next-expected-sequence": 0, "messages": []})));
    let (exchange, _reactor) = build(transport.clone());

    exchange.send(Message::new("data").with_field("value", 1), false).unwrap();
    exchange.exchange().await;

    // The server echoed back the same sequence it was already at (0), and
    // we did send a message this cycle — a busy-loop risk the exchange
    // must not react to by setting urgent mode.
    assert!(!exchange.is_urgent());
}

#[tokio::test]
async fn server_rewind_triggers_resynchronize_and_urgent_mode() {
    let transport = Arc::new(FakeTransport::new());
    transport.push_response(Some(serde_json::json!({"next-expected-sequence": 1, "messages": []})));
    transport.push_response(Some(serde_json::json!({"next-expected-sequence": 2, "messages": []})));
    transport.push_response(Some(serde_json::json!({"next-expected-sequence": 0, "messages": []})));
    let (exchange, reactor) = build(transport.clone());

    let resynced = Arc::new(AtomicUsize::new(0));
    let counter = resynced.clone();
    reactor.call_on(
        Topic::ResynchronizeClients,
        Arc::new(move |_: &Event| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    );

    // Two acknowledged exchanges advance the store's sequence to 2 before
    // the server claims to have lost everything sent so far.
    exchange.send(Message::new("data").with_field("value", 1), false).unwrap();
    exchange.exchange().await;
    exchange.send(Message::new("data").with_field("value", 2), false).unwrap();
    exchange.exchange().await;
    assert!(!exchange.is_urgent());
    assert_eq!(resynced.load(Ordering::SeqCst), 0);

    exchange.exchange().await;

    assert_eq!(resynced.load(Ordering::SeqCst), 1);
    assert!(exchange.is_urgent());
}

#[tokio::test]
async fn broker_send_message_is_observable_as_pending_until_acknowledged() {
    let transport = Arc::new(FakeTransport::new());
    let (exchange, _reactor) = build(transport.clone());
    let broker = BrokerServer::new(exchange.clone());

    let id = broker.send_message(Message::new("data").with_field("value", 7), false).unwrap();
    assert!(broker.is_message_pending(id));

    transport.push_response(Some(serde_json::json!({"next-expected-sequence": 1, "messages": []})));
    exchange.exchange().await;

    assert!(!broker.is_message_pending(id));
}

#[tokio::test]
async fn failed_transport_leaves_message_pending_and_fires_no_acknowledgement() {
    let transport = Arc::new(FakeTransport::new());
    transport.push_response(None);
    let (exchange, _reactor) = build(transport.clone());

    let id = exchange.send(Message::new("data").with_field("value", 1), false).unwrap();
    exchange.exchange().await;

    assert!(exchange.is_message_pending(id));
}
