use std::sync::{Arc, Mutex};
use std::time::Duration;

use perpetual_ws::core::{
    ConnectTarget, ConnectionConfig, JsonCodec, WebSocketError, WsFrame, WsOutbound, WsPayload,
};
use perpetual_ws::testing::{MockAcceptor, MockServer, MockTransport};
use perpetual_ws::ws::{ConnectionFactory, FnHandler, HandlerChain, WebSocket, WsHandler};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Available(&'static str),
    Message(&'static str, String),
    Unavailable(&'static str),
}

fn recording_stage(
    label: &'static str,
    events: mpsc::UnboundedSender<Event>,
) -> Arc<dyn WsHandler> {
    let on_open = events.clone();
    let on_msg = events.clone();
    FnHandler::new()
        .on_available(move |_ws| {
            let _ = on_open.send(Event::Available(label));
        })
        .on_message(move |_ws, payload| {
            let text = String::from_utf8_lossy(payload.as_bytes()).into_owned();
            let _ = on_msg.send(Event::Message(label, text));
        })
        .on_unavailable(move |_ws| {
            let _ = events.send(Event::Unavailable(label));
        })
        .build()
}

fn setup() -> (ConnectionFactory<MockTransport>, MockTransport, MockAcceptor) {
    let (transport, acceptor) = MockTransport::new();
    (ConnectionFactory::new(transport.clone()), transport, acceptor)
}

async fn open(
    factory: &ConnectionFactory<MockTransport>,
    acceptor: &mut MockAcceptor,
    config: ConnectionConfig,
    chain: HandlerChain,
) -> (WebSocket, MockServer) {
    let ws = factory
        .connect("test", ConnectTarget::new("ws://mock/feed"), config, chain)
        .expect("valid config");
    let server = acceptor.accept().await.expect("connection accepted");
    (ws, server)
}

#[tokio::test]
async fn one_stage_chain_is_initialized_and_advancing_closes_normally() {
    let (factory, _transport, mut acceptor) = setup();
    let (tx, mut events) = mpsc::unbounded_channel();
    let chain = HandlerChain::single(recording_stage("only", tx));
    let (ws, mut server) = open(&factory, &mut acceptor, ConnectionConfig::default(), chain).await;

    assert_eq!(events.recv().await, Some(Event::Available("only")));
    assert!(ws.is_initialized());

    ws.advance().unwrap();
    let reason = ws.closed().await;
    assert_eq!(reason, WebSocketError::closed(1000, "End of HandlerChain"));
    assert_eq!(events.recv().await, Some(Event::Unavailable("only")));

    match server.recv_data().await {
        Some(WsFrame::Close(Some(frame))) => {
            assert_eq!(frame.code, 1000);
            assert_eq!(frame.reason_lossy(), "End of HandlerChain");
        }
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn close_is_idempotent_and_keeps_first_reason() {
    let (factory, _transport, mut acceptor) = setup();
    let (tx, mut events) = mpsc::unbounded_channel();
    let chain = HandlerChain::single(recording_stage("only", tx));
    let (ws, _server) = open(&factory, &mut acceptor, ConnectionConfig::default(), chain).await;
    assert_eq!(events.recv().await, Some(Event::Available("only")));

    ws.close_normal("first");
    ws.close(WebSocketError::ConnectionFailed("second".to_string()));
    ws.close_normal("third");

    assert_eq!(ws.closed().await, WebSocketError::normal_close("first"));
    assert_eq!(events.recv().await, Some(Event::Unavailable("only")));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_err(), "unavailable fired more than once");
    assert_eq!(ws.closed_reason(), Some(WebSocketError::normal_close("first")));
    assert!(ws.advance().is_err());
}

#[tokio::test(start_paused = true)]
async fn queued_sends_complete_in_order_with_one_in_flight() {
    let (factory, transport, mut acceptor) = setup();
    transport.set_write_delay(Duration::from_millis(10));
    let (tx, _events) = mpsc::unbounded_channel();
    let chain = HandlerChain::single(recording_stage("only", tx));
    let (ws, mut server) = open(&factory, &mut acceptor, ConnectionConfig::default(), chain).await;

    let completions: Vec<_> = (0..8).map(|i| ws.send(format!("msg-{i}"))).collect();
    for completion in completions {
        completion.await.unwrap();
    }

    for i in 0..8 {
        let frame = server.recv_data().await.unwrap();
        assert_eq!(frame, WsFrame::Text(format!("msg-{i}").into()));
    }
    let probe = transport.probe();
    assert_eq!(probe.max_in_flight(), 1);
    assert_eq!(probe.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_write_closes_and_fails_sends_never_attempted() {
    let (factory, transport, mut acceptor) = setup();
    transport.set_write_delay(Duration::from_secs(1));
    transport.fail_next_writes(1);
    let (tx, mut events) = mpsc::unbounded_channel();
    let chain = HandlerChain::single(recording_stage("only", tx));
    let (ws, mut server) = open(&factory, &mut acceptor, ConnectionConfig::default(), chain).await;
    assert_eq!(events.recv().await, Some(Event::Available("only")));

    let first = ws.send("one");
    let second = ws.send("two");
    let third = ws.send("three");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.probe().in_flight(), 1);

    let reason = WebSocketError::ConnectionFailed(
        "send failed: Transport error (mock_transport_write): injected write failure".to_string(),
    );
    assert_eq!(first.await, Err(reason.clone()));
    assert_eq!(second.await, Err(reason.clone()));
    assert_eq!(third.await, Err(reason.clone()));
    assert_eq!(ws.closed().await, reason);
    assert_eq!(events.recv().await, Some(Event::Unavailable("only")));

    // Only the close frame follows the failed write; the queued sends never reach the socket.
    match server.recv_data().await {
        Some(WsFrame::Close(Some(frame))) => assert_eq!(frame.code, 1011),
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn write_in_flight_at_close_still_reports_success() {
    let (factory, transport, mut acceptor) = setup();
    transport.set_write_delay(Duration::from_millis(50));
    let (tx, _events) = mpsc::unbounded_channel();
    let chain = HandlerChain::single(recording_stage("only", tx));
    let (ws, mut server) = open(&factory, &mut acceptor, ConnectionConfig::default(), chain).await;

    let last = ws.send("last");
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(transport.probe().in_flight(), 1);

    ws.close_normal("bye");
    assert_eq!(last.await, Ok(()));
    assert_eq!(server.recv_data().await, Some(WsFrame::text_static("last")));
    assert_eq!(ws.closed().await, WebSocketError::normal_close("bye"));
}

#[tokio::test]
async fn sends_before_open_are_flushed_after_open() {
    let (factory, _transport, mut acceptor) = setup();
    let (tx, _events) = mpsc::unbounded_channel();
    let ws = factory
        .connect(
            "early",
            ConnectTarget::new("ws://mock/feed"),
            ConnectionConfig::default(),
            HandlerChain::single(recording_stage("only", tx)),
        )
        .unwrap();
    let completion = ws.send("hello");
    let mut server = acceptor.accept().await.unwrap();

    completion.await.unwrap();
    assert_eq!(server.recv_data().await, Some(WsFrame::text_static("hello")));
}

#[tokio::test(start_paused = true)]
async fn read_timeout_closes_idle_connection() {
    let (factory, _transport, mut acceptor) = setup();
    let config = ConnectionConfig {
        ping_after: Duration::from_millis(50),
        read_timeout: Duration::from_millis(100),
        ..ConnectionConfig::default()
    };
    let (tx, _events) = mpsc::unbounded_channel();
    let (ws, mut server) = open(
        &factory,
        &mut acceptor,
        config,
        HandlerChain::single(recording_stage("only", tx)),
    )
    .await;
    let started = Instant::now();

    let reason = ws.closed().await;
    let elapsed = started.elapsed();
    assert_eq!(reason, WebSocketError::ConnectionFailed("read timeout".to_string()));
    assert!(elapsed >= Duration::from_millis(100), "closed early: {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(150), "closed late: {elapsed:?}");

    assert!(matches!(server.recv_outbound().await, Some(WsFrame::Ping(_))));
}

#[tokio::test(start_paused = true)]
async fn inbound_activity_keeps_connection_alive() {
    let (factory, _transport, mut acceptor) = setup();
    let config = ConnectionConfig {
        ping_after: Duration::from_millis(50),
        read_timeout: Duration::from_millis(100),
        ..ConnectionConfig::default()
    };
    let (tx, _events) = mpsc::unbounded_channel();
    let (ws, server) = open(
        &factory,
        &mut acceptor,
        config,
        HandlerChain::single(recording_stage("only", tx)),
    )
    .await;

    for _ in 0..10 {
        tokio::time::sleep(Duration::from_millis(60)).await;
        server.send_pong().unwrap();
    }
    assert!(ws.is_open());
}

#[tokio::test]
async fn peer_close_and_drop_report_transport_codes() {
    let (factory, _transport, mut acceptor) = setup();
    let (tx, _events) = mpsc::unbounded_channel();
    let stage = recording_stage("only", tx);

    let (ws, mut server) = open(
        &factory,
        &mut acceptor,
        ConnectionConfig::default(),
        HandlerChain::single(Arc::clone(&stage)),
    )
    .await;
    server.close(4001, "going away").unwrap();
    assert_eq!(ws.closed().await, WebSocketError::closed(4001, "going away"));

    let (ws, mut server) = open(
        &factory,
        &mut acceptor,
        ConnectionConfig::default(),
        HandlerChain::single(stage),
    )
    .await;
    server.drop_socket();
    assert_eq!(ws.closed().await.close_code(), 1006);
}

#[tokio::test]
async fn advancing_hands_events_to_next_stage() {
    let (factory, _transport, mut acceptor) = setup();
    let (tx, mut events) = mpsc::unbounded_channel();
    let chain = HandlerChain::new(vec![
        recording_stage("auth", tx.clone()),
        recording_stage("feed", tx),
    ])
    .unwrap();
    let (ws, server) = open(&factory, &mut acceptor, ConnectionConfig::default(), chain).await;

    assert_eq!(events.recv().await, Some(Event::Available("auth")));
    assert!(!ws.is_initialized());
    server.send_text("welcome").unwrap();
    assert_eq!(
        events.recv().await,
        Some(Event::Message("auth", "welcome".to_string()))
    );

    ws.advance().unwrap();
    assert_eq!(events.recv().await, Some(Event::Unavailable("auth")));
    assert_eq!(events.recv().await, Some(Event::Available("feed")));
    assert!(ws.is_initialized());
    assert_eq!(ws.cursor(), 1);

    server.send_text("tick").unwrap();
    assert_eq!(
        events.recv().await,
        Some(Event::Message("feed", "tick".to_string()))
    );
}

#[tokio::test]
async fn repeated_stage_object_gets_no_transition_callbacks() {
    let (factory, _transport, mut acceptor) = setup();
    let (tx, mut events) = mpsc::unbounded_channel();
    let stage = recording_stage("same", tx);
    let chain = HandlerChain::new(vec![Arc::clone(&stage), stage]).unwrap();
    let (ws, _server) = open(&factory, &mut acceptor, ConnectionConfig::default(), chain).await;

    assert_eq!(events.recv().await, Some(Event::Available("same")));
    ws.advance().unwrap();
    ws.close_normal("done");
    ws.closed().await;
    assert_eq!(events.recv().await, Some(Event::Unavailable("same")));
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn init_timeout_closes_chain_that_never_advances() {
    let (factory, _transport, mut acceptor) = setup();
    let config = ConnectionConfig {
        init_timeout: Duration::from_millis(200),
        ..ConnectionConfig::default()
    };
    let (tx, _events) = mpsc::unbounded_channel();
    let chain = HandlerChain::new(vec![
        recording_stage("auth", tx.clone()),
        recording_stage("feed", tx),
    ])
    .unwrap();
    let (ws, server) = open(&factory, &mut acceptor, config, chain).await;

    // Keep the read timer quiet so only the init timer can fire.
    let keepalive = tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if server.send_pong().is_err() {
                break;
            }
        }
    });

    assert_eq!(
        ws.closed().await,
        WebSocketError::Initialization("initialization timeout".to_string())
    );
    keepalive.abort();
}

#[tokio::test]
async fn failed_transport_closes_with_creation_error() {
    let (factory, transport, _acceptor) = setup();
    transport.fail_next_connects(1);
    let events = Arc::new(Mutex::new(0usize));
    let seen = Arc::clone(&events);
    let stage = FnHandler::new()
        .on_available(move |_ws| *seen.lock().unwrap() += 1)
        .build();

    let ws = factory
        .connect(
            "refused",
            ConnectTarget::new("ws://mock/down"),
            ConnectionConfig::default(),
            HandlerChain::single(stage),
        )
        .unwrap();
    let pending = ws.send("never");

    assert!(matches!(ws.closed().await, WebSocketError::CreationFailed(_)));
    assert!(matches!(pending.await, Err(WebSocketError::CreationFailed(_))));
    assert_eq!(*events.lock().unwrap(), 0);
    assert!(matches!(
        ws.send("late").await,
        Err(WebSocketError::CreationFailed(_))
    ));
}

#[tokio::test]
async fn panicking_callback_does_not_break_the_connection() {
    let (factory, _transport, mut acceptor) = setup();
    let (tx, mut events) = mpsc::unbounded_channel();
    let stage = FnHandler::new()
        .on_message(move |_ws, payload| {
            if payload.as_text() == Some("boom") {
                panic!("handler failure");
            }
            let _ = tx.send(payload.clone());
        })
        .build();
    let (ws, server) = open(
        &factory,
        &mut acceptor,
        ConnectionConfig::default(),
        HandlerChain::single(stage),
    )
    .await;

    server.send_text("boom").unwrap();
    server.send_text("after").unwrap();
    assert_eq!(events.recv().await, Some(WsPayload::from("after")));
    assert!(ws.is_open());
}

#[derive(Debug, Serialize, Deserialize)]
struct Subscribe {
    channel: String,
}

#[tokio::test]
async fn objects_are_encoded_by_active_stage() {
    let (factory, _transport, mut acceptor) = setup();
    let stage = FnHandler::new()
        .with_serializer(Arc::new(JsonCodec::<Subscribe>::new()))
        .build();
    let (ws, mut server) = open(
        &factory,
        &mut acceptor,
        ConnectionConfig::default(),
        HandlerChain::single(stage),
    )
    .await;

    ws.send(WsOutbound::object(Subscribe {
        channel: "trades".to_string(),
    }))
    .await
    .unwrap();
    assert_eq!(
        server.recv_data().await,
        Some(WsFrame::text_static(r#"{"channel":"trades"}"#))
    );

    let err = ws.send(WsOutbound::object(7u8)).await.unwrap_err();
    assert!(matches!(err, WebSocketError::Serialization(_)));
    assert!(ws.is_open());
}

#[tokio::test]
async fn attributes_live_with_the_connection() {
    use perpetual_ws::core::AttributeKey;
    const SEQ: AttributeKey<u64> = AttributeKey::new("seq");

    let (factory, _transport, mut acceptor) = setup();
    let stage = FnHandler::new()
        .on_message(|ws, _payload| {
            let next = ws.attributes().get(&SEQ).unwrap_or(0) + 1;
            ws.attributes().insert(&SEQ, next);
        })
        .build();
    let (ws, server) = open(
        &factory,
        &mut acceptor,
        ConnectionConfig::default(),
        HandlerChain::single(stage),
    )
    .await;

    for _ in 0..3 {
        server.send_text("x").unwrap();
    }
    let probe = ws.clone();
    tokio::time::timeout(Duration::from_secs(1), async move {
        while probe.attributes().get(&SEQ) != Some(3) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("three messages counted");
}
