//! Reusable test utilities for driving connections without a real socket.
//!
//! [`MockTransport`] hands every established connection to a [`MockAcceptor`] as a
//! [`MockServer`], which tests use to push inbound frames, observe outbound frames, or drop the
//! socket. Writes can be slowed down to expose pipelining bugs, and connect attempts and writes
//! can be made to fail.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::Sink;
use tokio::sync::mpsc;
use tokio::time::Sleep;

use crate::core::{ConnectRequest, ConnectTarget, WebSocketError, WsFrame};
use crate::transport::{WsTransport, WsTransportConnectFuture};

/// Counts writes in flight on the mock sink.
#[derive(Debug, Default)]
pub struct WriteProbe {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    completed: AtomicUsize,
}

impl WriteProbe {
    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of writes ever started but not yet flushed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

struct MockShared {
    accept_tx: mpsc::UnboundedSender<MockServer>,
    write_delay: Mutex<Duration>,
    failures: AtomicUsize,
    write_failures: Arc<AtomicUsize>,
    attempts: AtomicUsize,
    probe: Arc<WriteProbe>,
}

/// A transport backed by in-memory channels.
#[derive(Clone)]
pub struct MockTransport {
    shared: Arc<MockShared>,
}

impl MockTransport {
    /// Build a transport and the acceptor that receives its connections.
    pub fn new() -> (Self, MockAcceptor) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (
            Self {
                shared: Arc::new(MockShared {
                    accept_tx,
                    write_delay: Mutex::new(Duration::ZERO),
                    failures: AtomicUsize::new(0),
                    write_failures: Arc::new(AtomicUsize::new(0)),
                    attempts: AtomicUsize::new(0),
                    probe: Arc::new(WriteProbe::default()),
                }),
            },
            MockAcceptor { rx: accept_rx },
        )
    }

    /// Every write takes `delay` before it is flushed.
    pub fn set_write_delay(&self, delay: Duration) {
        *self
            .shared
            .write_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Fail the next `count` connect attempts.
    pub fn fail_next_connects(&self, count: usize) {
        self.shared.failures.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` writes on any connection. The read side stays open.
    pub fn fail_next_writes(&self, count: usize) {
        self.shared.write_failures.store(count, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Write probe shared by all connections of this transport.
    pub fn probe(&self) -> Arc<WriteProbe> {
        Arc::clone(&self.shared.probe)
    }

    fn write_delay(&self) -> Duration {
        *self
            .shared
            .write_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn take_failure(&self) -> bool {
        self.shared
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Build a connected reader/writer pair outside of any connect call, for
    /// [`crate::ws::ConnectionFactory::attach`].
    pub fn pair(&self, target: ConnectTarget) -> (MockReader, MockWriter, MockServer) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let server = MockServer {
            target,
            outbound_rx,
            inbound_tx: Some(inbound_tx),
        };
        let reader = MockReader { rx: inbound_rx };
        let writer = MockWriter {
            outbound_tx,
            delay: self.write_delay(),
            probe: Arc::clone(&self.shared.probe),
            write_failures: Arc::clone(&self.shared.write_failures),
            pending: None,
            sleep: None,
        };
        (reader, writer, server)
    }
}

impl WsTransport for MockTransport {
    type Reader = MockReader;
    type Writer = MockWriter;

    fn connect(
        &self,
        request: ConnectRequest,
    ) -> WsTransportConnectFuture<Self::Reader, Self::Writer> {
        let transport = self.clone();
        Box::pin(async move {
            transport.shared.attempts.fetch_add(1, Ordering::SeqCst);
            if transport.take_failure() {
                return Err(WebSocketError::ConnectionFailed(format!(
                    "mock connect to {} refused",
                    request.target.url
                )));
            }
            let (reader, writer, server) = transport.pair(request.target);
            transport.shared.accept_tx.send(server).map_err(|_| {
                WebSocketError::ConnectionFailed("mock acceptor dropped".to_string())
            })?;
            Ok((reader, writer))
        })
    }
}

/// Receives the server side of each connection established through a [`MockTransport`].
pub struct MockAcceptor {
    rx: mpsc::UnboundedReceiver<MockServer>,
}

impl MockAcceptor {
    pub async fn accept(&mut self) -> Option<MockServer> {
        self.rx.recv().await
    }

    pub fn try_accept(&mut self) -> Option<MockServer> {
        self.rx.try_recv().ok()
    }
}

/// Error surface for operations on [`MockServer`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MockServerError {
    /// The inbound socket side was intentionally dropped.
    SocketDropped,
    /// The connection is no longer reading inbound frames.
    ChannelClosed,
}

impl std::fmt::Display for MockServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MockServerError::SocketDropped => f.write_str("mock socket already dropped"),
            MockServerError::ChannelClosed => f.write_str("mock connection is closed"),
        }
    }
}

impl std::error::Error for MockServerError {}

/// Server-side handle of one mock connection.
pub struct MockServer {
    target: ConnectTarget,
    outbound_rx: mpsc::UnboundedReceiver<WsFrame>,
    inbound_tx: Option<mpsc::UnboundedSender<WsFrame>>,
}

impl MockServer {
    /// The target the client connected to, including request headers.
    pub fn target(&self) -> &ConnectTarget {
        &self.target
    }

    /// Receive a frame flushed by the connection.
    pub async fn recv_outbound(&mut self) -> Option<WsFrame> {
        self.outbound_rx.recv().await
    }

    /// Receive a frame with a timeout.
    pub async fn recv_outbound_timeout(&mut self, timeout: Duration) -> Option<WsFrame> {
        tokio::time::timeout(timeout, self.outbound_rx.recv())
            .await
            .unwrap_or_default()
    }

    /// Next data frame, skipping keepalive pings.
    pub async fn recv_data(&mut self) -> Option<WsFrame> {
        loop {
            match self.outbound_rx.recv().await? {
                WsFrame::Ping(_) | WsFrame::Pong(_) => continue,
                frame => return Some(frame),
            }
        }
    }

    /// Push an inbound frame to the connection.
    pub fn send_inbound(&self, frame: WsFrame) -> Result<(), MockServerError> {
        let Some(tx) = self.inbound_tx.as_ref() else {
            return Err(MockServerError::SocketDropped);
        };
        tx.send(frame).map_err(|_| MockServerError::ChannelClosed)
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), MockServerError> {
        self.send_inbound(WsFrame::Text(Bytes::from(text.into())))
    }

    pub fn send_binary(&self, bytes: impl Into<Bytes>) -> Result<(), MockServerError> {
        self.send_inbound(WsFrame::Binary(bytes.into()))
    }

    pub fn send_pong(&self) -> Result<(), MockServerError> {
        self.send_inbound(WsFrame::Pong(Bytes::new()))
    }

    /// Send a close frame and stop the inbound side.
    pub fn close(&mut self, code: u16, reason: &str) -> Result<(), MockServerError> {
        let result = self.send_inbound(WsFrame::close(code, reason.to_string()));
        self.inbound_tx = None;
        result
    }

    /// Simulate a server-side socket drop without a close frame.
    pub fn drop_socket(&mut self) {
        self.inbound_tx = None;
    }

    /// Whether the client side of the inbound channel is gone.
    pub fn is_disconnected(&self) -> bool {
        self.inbound_tx.as_ref().is_none_or(|tx| tx.is_closed())
    }
}

/// Reader side for [`MockTransport`].
pub struct MockReader {
    rx: mpsc::UnboundedReceiver<WsFrame>,
}

impl futures_util::Stream for MockReader {
    type Item = Result<WsFrame, WebSocketError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.rx).poll_recv(cx) {
            Poll::Ready(Some(frame)) => Poll::Ready(Some(Ok(frame))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Writer side for [`MockTransport`]. A frame counts as in flight from `start_send` until its
/// flush completes.
pub struct MockWriter {
    outbound_tx: mpsc::UnboundedSender<WsFrame>,
    delay: Duration,
    probe: Arc<WriteProbe>,
    write_failures: Arc<AtomicUsize>,
    pending: Option<WsFrame>,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl MockWriter {
    fn poll_pending(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), WebSocketError>> {
        let Some(frame) = self.pending.take() else {
            return Poll::Ready(Ok(()));
        };
        let delay = self.delay;
        if !delay.is_zero() {
            let sleep = self
                .sleep
                .get_or_insert_with(|| Box::pin(tokio::time::sleep(delay)));
            if sleep.as_mut().poll(cx).is_pending() {
                self.pending = Some(frame);
                return Poll::Pending;
            }
            self.sleep = None;
        }
        self.probe.exit();
        let failed = self
            .write_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Poll::Ready(Err(WebSocketError::TransportError {
                context: "mock_transport_write",
                error: "injected write failure".to_string(),
            }));
        }
        Poll::Ready(self.outbound_tx.send(frame).map_err(|_| {
            WebSocketError::TransportError {
                context: "mock_transport_write",
                error: "mock outbound channel closed".to_string(),
            }
        }))
    }
}

impl Sink<WsFrame> for MockWriter {
    type Error = WebSocketError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.get_mut().poll_pending(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: WsFrame) -> Result<(), Self::Error> {
        let this = self.get_mut();
        this.probe.enter();
        this.pending = Some(item);
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.get_mut().poll_pending(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.get_mut().poll_pending(cx)
    }
}

impl Drop for MockWriter {
    fn drop(&mut self) {
        if self.pending.take().is_some() {
            self.probe.exit();
        }
    }
}
