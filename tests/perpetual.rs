use std::sync::{Arc, Mutex};
use std::time::Duration;

use perpetual_ws::core::{
    ConnectTarget, ConnectionConfig, PerpetualConfig, WebSocketError, WsFrame, WsPayload,
};
use perpetual_ws::perpetual::{
    ClientConnector, OPENED_AT, PerpetualHandler, PerpetualSocket, PerpetualStatus,
};
use perpetual_ws::testing::{MockAcceptor, MockServer, MockTransport};
use perpetual_ws::ws::{ConnectionFactory, Initialization, WebSocket, WsInitializer};
use tokio::sync::mpsc;
use tokio::time::Instant;

const SHIFT: Duration = Duration::from_secs(4 * 60 * 60);
const SWITCH: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Available,
    Message(String),
    Unavailable(WebSocketError),
}

struct Recorder {
    events: mpsc::UnboundedSender<Event>,
}

impl PerpetualHandler for Recorder {
    fn on_available(&self, _socket: &PerpetualSocket) {
        let _ = self.events.send(Event::Available);
    }

    fn on_message(&self, _socket: &PerpetualSocket, payload: &WsPayload) {
        let text = String::from_utf8_lossy(payload.as_bytes()).into_owned();
        let _ = self.events.send(Event::Message(text));
    }

    fn on_unavailable(&self, _socket: &PerpetualSocket, reason: &WebSocketError) {
        let _ = self.events.send(Event::Unavailable(reason.clone()));
    }
}

/// Timeouts long enough that only rotation closes connections.
fn quiet_config() -> ConnectionConfig {
    ConnectionConfig {
        ping_after: Duration::from_secs(24 * 60 * 60),
        read_timeout: Duration::from_secs(48 * 60 * 60),
        ..ConnectionConfig::default()
    }
}

struct Harness {
    socket: PerpetualSocket,
    transport: MockTransport,
    acceptor: MockAcceptor,
    events: mpsc::UnboundedReceiver<Event>,
}

fn connector(transport: &MockTransport) -> ClientConnector<MockTransport> {
    ClientConnector::new(ConnectionFactory::new(transport.clone()), || {
        ConnectTarget::new("ws://mock/stream")
    })
    .with_config(quiet_config())
}

fn start(config: PerpetualConfig) -> Harness {
    let (transport, acceptor) = MockTransport::new();
    let (tx, events) = mpsc::unbounded_channel();
    let recorder = Recorder { events: tx };
    let socket = PerpetualSocket::builder("stream", connector(&transport), recorder)
        .config(config)
        .start()
        .unwrap();
    Harness {
        socket,
        transport,
        acceptor,
        events,
    }
}

async fn wait_for_status(socket: &PerpetualSocket, status: PerpetualStatus) {
    let mut rx = socket.watch_status();
    rx.wait_for(|current| *current == status).await.unwrap();
}

async fn next_message(events: &mut mpsc::UnboundedReceiver<Event>) -> String {
    loop {
        match events.recv().await.expect("events channel open") {
            Event::Message(text) => return text,
            Event::Available => continue,
            other => panic!("unexpected event {other:?}"),
        }
    }
}

async fn wait_for_close(server: &mut MockServer) -> (u16, String) {
    loop {
        let frame = server
            .recv_outbound()
            .await
            .expect("connection closed without close frame");
        match frame {
            WsFrame::Close(Some(frame)) => return (frame.code, frame.reason_lossy()),
            WsFrame::Close(None) => return (1005, String::new()),
            _ => continue,
        }
    }
}

#[tokio::test]
async fn send_before_first_connection_is_queued() {
    let mut h = start(PerpetualConfig::new(SHIFT));
    let pending = h.socket.send("hello");
    assert!(!h.socket.is_connected());

    let mut server = h.acceptor.accept().await.unwrap();
    pending.await.unwrap();
    assert_eq!(server.recv_data().await, Some(WsFrame::text_static("hello")));
    assert_eq!(h.events.recv().await, Some(Event::Available));
    assert!(h.socket.is_connected());
}

#[tokio::test]
async fn single_connection_delivers_repeats() {
    let mut h = start(PerpetualConfig::new(SHIFT));
    let server = h.acceptor.accept().await.unwrap();
    h.socket.connected().await;

    server.send_text("same").unwrap();
    server.send_text("same").unwrap();
    assert_eq!(next_message(&mut h.events).await, "same");
    assert_eq!(next_message(&mut h.events).await, "same");
}

#[tokio::test(start_paused = true)]
async fn shift_rotation_overlaps_then_retires_old_connection() {
    let mut h = start(PerpetualConfig::new(SHIFT).with_switch_duration(SWITCH));

    let mut a = h.acceptor.accept().await.unwrap();
    h.socket.connected().await;
    let t0 = Instant::now();
    assert_eq!(h.events.recv().await, Some(Event::Available));
    let a_conn = h.socket.primary().unwrap();
    assert!(a_conn.attributes().get(&OPENED_AT).is_some());

    // Nothing happens before the shift elapses.
    tokio::time::sleep(SHIFT - Duration::from_secs(1)).await;
    assert!(h.acceptor.try_accept().is_none());

    let mut b = h.acceptor.accept().await.unwrap();
    wait_for_status(&h.socket, PerpetualStatus::Overlapping).await;
    let t1 = Instant::now();
    assert!(t1.duration_since(t0) >= SHIFT);
    let b_conn = h.socket.primary().unwrap();
    assert_ne!(a_conn.id(), b_conn.id());
    assert_eq!(h.socket.live_connections().await.unwrap().len(), 2);

    // Overlap duplicates surface once, whichever side saw them first.
    a.send_text("dup").unwrap();
    assert_eq!(next_message(&mut h.events).await, "dup");
    b.send_text("dup").unwrap();
    b.send_text("b-only").unwrap();
    assert_eq!(next_message(&mut h.events).await, "b-only");
    a.send_text("seen-on-a").unwrap();
    assert_eq!(next_message(&mut h.events).await, "seen-on-a");

    // Outbound traffic moves to the newest connection.
    h.socket.send("order").await.unwrap();
    assert_eq!(b.recv_data().await, Some(WsFrame::text_static("order")));

    let (code, reason) = wait_for_close(&mut a).await;
    let retired_after = Instant::now().duration_since(t1);
    assert_eq!((code, reason.as_str()), (1000, "Shift terminated"));
    assert!(retired_after >= SWITCH, "retired early: {retired_after:?}");
    assert!(
        retired_after < SWITCH + Duration::from_millis(100),
        "retired late: {retired_after:?}"
    );

    wait_for_status(&h.socket, PerpetualStatus::Connected).await;
    assert_eq!(
        a_conn.closed().await,
        WebSocketError::normal_close("Shift terminated")
    );

    // B is the sole survivor: earlier duplicates are delivered again.
    b.send_text("seen-on-a").unwrap();
    assert_eq!(next_message(&mut h.events).await, "seen-on-a");
    assert!(h.events.try_recv().is_err(), "rotation must not signal unavailability");
}

#[tokio::test(start_paused = true)]
async fn losing_the_primary_reconnects_immediately() {
    let mut h = start(PerpetualConfig::new(SHIFT));
    let mut a = h.acceptor.accept().await.unwrap();
    h.socket.connected().await;
    assert_eq!(h.events.recv().await, Some(Event::Available));

    let dropped_at = Instant::now();
    a.drop_socket();
    assert!(matches!(
        h.events.recv().await,
        Some(Event::Unavailable(WebSocketError::Closed { code: 1006, .. }))
    ));

    let _b = h.acceptor.accept().await.unwrap();
    assert!(dropped_at.elapsed() < Duration::from_millis(100));
    assert_eq!(h.events.recv().await, Some(Event::Available));
    assert_eq!(h.transport.connect_attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_attempt_waits_for_reconnect_delay() {
    let (transport, mut acceptor) = MockTransport::new();
    transport.fail_next_connects(2);
    let (tx, _events) = mpsc::unbounded_channel();
    let started = Instant::now();
    let recorder = Recorder { events: tx };
    let socket = PerpetualSocket::builder("retry", connector(&transport), recorder)
        .config(PerpetualConfig::new(SHIFT).with_reconnect_delay(Duration::from_secs(2)))
        .start()
        .unwrap();

    let _server = acceptor.accept().await.unwrap();
    socket.connected().await;
    assert!(started.elapsed() >= Duration::from_secs(4));
    assert_eq!(transport.connect_attempts(), 3);
}

#[tokio::test]
async fn failed_send_is_resubmitted_on_next_connection() {
    let mut h = start(PerpetualConfig::new(SHIFT));
    let a = h.acceptor.accept().await.unwrap();
    h.socket.connected().await;

    // Dropping the server end makes both the write and the read side fail.
    drop(a);
    let pending = h.socket.send("survives");

    let mut b = h.acceptor.accept().await.unwrap();
    pending.await.unwrap();
    assert_eq!(b.recv_data().await, Some(WsFrame::text_static("survives")));
}

#[tokio::test]
async fn shutdown_closes_connections_and_rejects_sends() {
    let mut h = start(PerpetualConfig::new(SHIFT));
    let mut server = h.acceptor.accept().await.unwrap();
    h.socket.connected().await;
    assert_eq!(h.events.recv().await, Some(Event::Available));

    h.socket.shutdown().await.unwrap();
    assert_eq!(
        wait_for_close(&mut server).await,
        (1000, "Perpetual socket shut down".to_string())
    );
    assert_eq!(
        h.events.recv().await,
        Some(Event::Unavailable(WebSocketError::normal_close(
            "Perpetual socket shut down"
        )))
    );
    assert_eq!(h.socket.status(), PerpetualStatus::Disconnected);
    assert!(h.socket.send("late").await.is_err());
    assert!(h.acceptor.try_accept().is_none());
}

#[test]
fn builder_rejects_bad_configuration() {
    let (transport, _acceptor) = MockTransport::new();
    let (tx, _rx) = mpsc::unbounded_channel();
    let recorder = Recorder { events: tx.clone() };
    let missing = PerpetualSocket::builder("bad", connector(&transport), recorder).start();
    assert!(matches!(missing, Err(WebSocketError::InvalidConfig(_))));

    let recorder = Recorder { events: tx };
    let inverted = PerpetualSocket::builder("bad", connector(&transport), recorder)
        .config(PerpetualConfig::new(Duration::from_secs(1)).with_switch_duration(SWITCH))
        .start();
    assert!(matches!(inverted, Err(WebSocketError::InvalidConfig(_))));
}

struct TokenHandshake {
    seen: Arc<Mutex<Vec<String>>>,
}

impl WsInitializer for TokenHandshake {
    fn on_connected(&self, ws: &WebSocket, _init: &Initialization) {
        let _ = ws.send("login");
    }

    fn on_message(&self, _ws: &WebSocket, payload: &WsPayload, init: &Initialization) {
        if let Some(text) = payload.as_text() {
            self.seen.lock().unwrap().push(text.to_string());
            if text == "welcome" {
                init.complete();
            }
        }
    }
}

#[tokio::test]
async fn initializer_gates_each_connection() {
    let (transport, mut acceptor) = MockTransport::new();
    let (tx, mut events) = mpsc::unbounded_channel();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Recorder { events: tx };
    let socket = PerpetualSocket::builder("gated", connector(&transport), recorder)
        .config(PerpetualConfig::new(SHIFT))
        .initializer(
            TokenHandshake {
                seen: Arc::clone(&seen),
            },
            Duration::from_secs(5),
        )
        .start()
        .unwrap();

    let mut server = acceptor.accept().await.unwrap();
    assert_eq!(server.recv_data().await, Some(WsFrame::text_static("login")));
    assert_ne!(socket.status(), PerpetualStatus::Connected);

    server.send_text("welcome").unwrap();
    socket.connected().await;
    server.send_text("tick").unwrap();
    assert_eq!(next_message(&mut events).await, "tick");
    assert_eq!(*seen.lock().unwrap(), vec!["welcome".to_string()]);
}
