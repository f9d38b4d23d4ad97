//! Per-connection state machine.
//!
//! Each physical socket is owned by one [`ConnectionActor`]. The read loop runs in a plain tokio
//! task and forwards frames into the actor; writes go through a linked [`WsWriterActor`]. All
//! state transitions and stage callbacks run inside the actor, one message at a time.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::task::{Context as TaskContext, Poll};

use bytes::Bytes;
use futures_util::{Sink, Stream, StreamExt};
use kameo::actor::{ActorId, WeakActorRef};
use kameo::error::{ActorStopReason, PanicError, SendError};
use kameo::mailbox;
use kameo::prelude::{Actor, ActorRef, Context, Message as KameoMessage};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::handler::{HandlerChain, WsHandler, guarded, same_stage};
use super::writer::{WriterClose, WriterWrite, WsWriterActor};
use crate::core::{
    ABNORMAL_CLOSE_CODE, Attributes, ConnectTarget, ConnectionConfig, NO_STATUS_CLOSE_CODE,
    ScheduledTask, WebSocketError, WebSocketResult, WsFrame, WsOutbound, WsPayload,
    schedule_tell,
};

pub type BoxWsReader = Pin<Box<dyn Stream<Item = Result<WsFrame, WebSocketError>> + Send>>;
pub type BoxWsWriter = Pin<Box<dyn Sink<WsFrame, Error = WebSocketError> + Send>>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_connection_id() -> u64 {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// State readable from any handle without a round trip through the actor.
pub(crate) struct ConnectionShared {
    id: u64,
    name: String,
    target: ConnectTarget,
    chain: HandlerChain,
    opened: AtomicBool,
    cursor: AtomicUsize,
    closed: watch::Sender<Option<WebSocketError>>,
    attributes: Attributes,
}

impl ConnectionShared {
    pub(crate) fn new(id: u64, name: String, target: ConnectTarget, chain: HandlerChain) -> Self {
        let (closed, _) = watch::channel(None);
        Self {
            id,
            name,
            target,
            chain,
            opened: AtomicBool::new(false),
            cursor: AtomicUsize::new(0),
            closed,
            attributes: Attributes::new(),
        }
    }

    fn closed_reason(&self) -> Option<WebSocketError> {
        self.closed.borrow().clone()
    }
}

/// Cloneable handle to one physical connection.
#[derive(Clone)]
pub struct WebSocket {
    shared: Arc<ConnectionShared>,
    actor: ActorRef<ConnectionActor>,
}

impl WebSocket {
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn target(&self) -> &ConnectTarget {
        &self.shared.target
    }

    /// Per-connection attribute bag, dropped with the connection.
    pub fn attributes(&self) -> &Attributes {
        &self.shared.attributes
    }

    pub fn is_open(&self) -> bool {
        self.shared.opened.load(Ordering::Acquire) && !self.is_closed()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.borrow().is_some()
    }

    /// Open and positioned on the last stage of its chain.
    pub fn is_initialized(&self) -> bool {
        self.is_open() && self.cursor() == self.shared.chain.last_index()
    }

    /// Index of the active stage.
    pub fn cursor(&self) -> usize {
        self.shared.cursor.load(Ordering::Acquire)
    }

    pub fn closed_reason(&self) -> Option<WebSocketError> {
        self.shared.closed_reason()
    }

    /// The active stage.
    pub fn stage(&self) -> Arc<dyn WsHandler> {
        let chain = &self.shared.chain;
        Arc::clone(&chain[self.cursor().min(chain.last_index())])
    }

    /// Resolves with the close reason once the connection is closed.
    pub async fn closed(&self) -> WebSocketError {
        let mut rx = self.shared.closed.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(reason) => reason
                .clone()
                .unwrap_or_else(|| WebSocketError::InvalidState("close reason missing".into())),
            Err(_) => WebSocketError::InvalidState("connection state dropped".to_string()),
        }
    }

    /// Queue `message` for sending.
    ///
    /// Application objects are encoded with the active stage's serializer. The returned
    /// [`Completion`] resolves once the frame reached the transport, or with the close reason if
    /// the connection closes first.
    pub fn send(&self, message: impl Into<WsOutbound>) -> Completion {
        if let Some(reason) = self.closed_reason() {
            return Completion::ready(Err(reason));
        }
        let (reply, rx) = oneshot::channel();
        let msg = SendOutbound {
            outbound: message.into(),
            reply,
        };
        if self.actor.tell(msg).try_send().is_err() {
            return Completion::ready(Err(self.stopped_reason()));
        }
        Completion::pending(rx, Arc::clone(&self.shared))
    }

    /// Request a close. Only the first reason is kept.
    pub fn close(&self, reason: WebSocketError) {
        if self.is_closed() {
            return;
        }
        let _ = self.actor.tell(CloseConnection { reason }).try_send();
    }

    /// Close with code 1000.
    pub fn close_normal(&self, reason: impl Into<String>) {
        self.close(WebSocketError::normal_close(reason));
    }

    /// Hand control to the next stage of the chain. On the last stage this closes the
    /// connection normally.
    ///
    /// Safe to call from inside stage callbacks; the transition runs after the current callback
    /// returns.
    pub fn advance(&self) -> WebSocketResult<()> {
        if let Some(reason) = self.closed_reason() {
            return Err(reason);
        }
        if !self.shared.opened.load(Ordering::Acquire) {
            return Err(WebSocketError::InvalidState(
                "cannot advance a connection that is not open".to_string(),
            ));
        }
        self.actor
            .tell(AdvanceHandler)
            .try_send()
            .map_err(|_| self.stopped_reason())
    }

    /// Run `f` inside the connection's execution context. Skipped if the connection is closed by
    /// the time it runs.
    pub fn execute(&self, f: impl FnOnce(&WebSocket) + Send + 'static) -> WebSocketResult<()> {
        if let Some(reason) = self.closed_reason() {
            return Err(reason);
        }
        self.actor
            .tell(Execute(Box::new(f)))
            .try_send()
            .map_err(|_| self.stopped_reason())
    }

    fn stopped_reason(&self) -> WebSocketError {
        self.closed_reason()
            .unwrap_or_else(|| WebSocketError::ConnectionFailed("connection actor stopped".into()))
    }

    pub(crate) fn actor(&self) -> &ActorRef<ConnectionActor> {
        &self.actor
    }
}

impl fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocket")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("url", &self.shared.target.url)
            .field("open", &self.is_open())
            .field("cursor", &self.cursor())
            .finish()
    }
}

impl PartialEq for WebSocket {
    fn eq(&self, other: &Self) -> bool {
        self.shared.id == other.shared.id
    }
}

impl Eq for WebSocket {}

/// Outcome of a queued send.
#[must_use = "a Completion does nothing unless awaited; dropping it does not cancel the send"]
pub struct Completion {
    state: CompletionState,
}

enum CompletionState {
    Ready(Option<WebSocketResult<()>>),
    Pending {
        rx: oneshot::Receiver<WebSocketResult<()>>,
        shared: Arc<ConnectionShared>,
    },
}

impl Completion {
    pub(crate) fn ready(result: WebSocketResult<()>) -> Self {
        Self {
            state: CompletionState::Ready(Some(result)),
        }
    }

    fn pending(rx: oneshot::Receiver<WebSocketResult<()>>, shared: Arc<ConnectionShared>) -> Self {
        Self {
            state: CompletionState::Pending { rx, shared },
        }
    }
}

impl Future for Completion {
    type Output = WebSocketResult<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            CompletionState::Ready(result) => Poll::Ready(result.take().unwrap_or_else(|| {
                Err(WebSocketError::InvalidState(
                    "completion polled after ready".to_string(),
                ))
            })),
            CompletionState::Pending { rx, shared } => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(result)) => Poll::Ready(result),
                Poll::Ready(Err(_)) => Poll::Ready(Err(shared.closed_reason().unwrap_or_else(
                    || WebSocketError::ConnectionFailed("send abandoned".to_string()),
                ))),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            CompletionState::Ready(result) => f.debug_tuple("Completion").field(result).finish(),
            CompletionState::Pending { .. } => f.write_str("Completion(pending)"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TimerKind {
    Ping,
    ReadTimeout,
    InitTimeout,
}

struct ArmedTimer {
    generation: u64,
    _task: ScheduledTask,
}

struct PendingSend {
    frame: WsFrame,
    reply: Option<oneshot::Sender<WebSocketResult<()>>>,
}

pub struct ConnectionArgs {
    pub(crate) shared: Arc<ConnectionShared>,
    pub(crate) config: ConnectionConfig,
    pub(crate) chain: HandlerChain,
}

pub struct ConnectionActor {
    ws: WebSocket,
    config: ConnectionConfig,
    chain: HandlerChain,
    cursor: usize,
    opened: bool,
    closed: Option<WebSocketError>,
    writer: Option<ActorRef<WsWriterActor<BoxWsWriter>>>,
    reader_task: Option<JoinHandle<()>>,
    sending: bool,
    queue: VecDeque<PendingSend>,
    ping_timer: Option<ArmedTimer>,
    read_timer: Option<ArmedTimer>,
    init_timer: Option<ArmedTimer>,
    timer_generation: u64,
}

impl Actor for ConnectionActor {
    type Args = ConnectionArgs;
    type Error = WebSocketError;

    fn name() -> &'static str {
        "ConnectionActor"
    }

    async fn on_start(args: Self::Args, actor_ref: ActorRef<Self>) -> WebSocketResult<Self> {
        let ConnectionArgs {
            shared,
            config,
            chain,
        } = args;
        Ok(Self {
            ws: WebSocket {
                shared,
                actor: actor_ref,
            },
            config,
            chain,
            cursor: 0,
            opened: false,
            closed: None,
            writer: None,
            reader_task: None,
            sending: false,
            queue: VecDeque::new(),
            ping_timer: None,
            read_timer: None,
            init_timer: None,
            timer_generation: 0,
        })
    }

    async fn on_panic(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        err: PanicError,
    ) -> Result<ControlFlow<ActorStopReason>, Self::Error> {
        error!(connection = %self.ws.name(), id = self.ws.id(), error = ?err, "ConnectionActor panicked");
        Ok(ControlFlow::Break(ActorStopReason::Panicked(err)))
    }

    async fn on_link_died(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        _id: ActorId,
        reason: ActorStopReason,
    ) -> Result<ControlFlow<ActorStopReason>, Self::Error> {
        if self.closed.is_none() {
            self.close_with(
                WebSocketError::ConnectionFailed(format!("writer stopped: {reason:?}")),
                true,
            );
        }
        Ok(ControlFlow::Continue(()))
    }

    async fn on_stop(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        _reason: ActorStopReason,
    ) -> WebSocketResult<()> {
        if self.closed.is_none() {
            self.close_with(
                WebSocketError::ConnectionFailed("connection actor stopped".to_string()),
                false,
            );
        }
        if let Some(reader) = self.reader_task.take() {
            reader.abort();
        }
        Ok(())
    }
}

impl ConnectionActor {
    /// Spawn the actor for a connection that has not opened yet.
    pub(crate) fn spawn_for(
        name: String,
        target: ConnectTarget,
        config: ConnectionConfig,
        chain: HandlerChain,
    ) -> WebSocket {
        let shared = Arc::new(ConnectionShared::new(
            next_connection_id(),
            name,
            target,
            chain.clone(),
        ));
        let actor = ConnectionActor::spawn_with_mailbox(
            ConnectionArgs {
                shared: Arc::clone(&shared),
                config,
                chain,
            },
            mailbox::unbounded(),
        );
        WebSocket { shared, actor }
    }

    fn last_index(&self) -> usize {
        self.chain.last_index()
    }

    fn is_initialized(&self) -> bool {
        self.cursor == self.last_index()
    }

    fn current_stage(&self) -> Arc<dyn WsHandler> {
        Arc::clone(&self.chain[self.cursor])
    }

    fn arm(&mut self, kind: TimerKind, delay: std::time::Duration) -> ArmedTimer {
        self.timer_generation = self.timer_generation.wrapping_add(1);
        let generation = self.timer_generation;
        ArmedTimer {
            generation,
            _task: schedule_tell(&self.ws.actor, delay, TimerFired { kind, generation }),
        }
    }

    fn rearm_activity_timers(&mut self) {
        self.ping_timer = Some(self.arm(TimerKind::Ping, self.config.ping_after));
        self.read_timer = Some(self.arm(TimerKind::ReadTimeout, self.config.read_timeout));
    }

    fn cancel_timers(&mut self) {
        self.ping_timer = None;
        self.read_timer = None;
        self.init_timer = None;
    }

    async fn open(&mut self, reader: BoxWsReader, writer: BoxWsWriter) {
        if self.opened || self.closed.is_some() {
            debug!(connection = %self.ws.name(), id = self.ws.id(), "ignoring open on a used connection");
            return;
        }

        let writer = WsWriterActor::spawn(WsWriterActor::new(writer, self.ws.name()));
        writer.link(&self.ws.actor).await;
        self.writer = Some(writer);

        self.opened = true;
        self.ws.shared.opened.store(true, Ordering::Release);
        self.reader_task = Some(spawn_reader(
            self.ws.actor.clone(),
            reader,
            self.config.activity_debounce,
        ));
        debug!(connection = %self.ws.name(), id = self.ws.id(), url = %self.ws.target().url, "websocket opened");

        if !self.is_initialized() {
            self.init_timer = Some(self.arm(TimerKind::InitTimeout, self.config.init_timeout));
        }
        self.rearm_activity_timers();
        self.pump();

        let stage = self.current_stage();
        guarded(&self.ws, "on_available", || stage.on_available(&self.ws));
    }

    /// Terminal transition. `stop_actor` is false when already stopping.
    fn close_with(&mut self, reason: WebSocketError, stop_actor: bool) {
        if self.closed.is_some() {
            return;
        }
        self.closed = Some(reason.clone());
        self.ws.shared.closed.send_replace(Some(reason.clone()));
        debug!(connection = %self.ws.name(), id = self.ws.id(), reason = %reason, "websocket closed");

        self.cancel_timers();
        if let Some(reader) = self.reader_task.take() {
            reader.abort();
        }
        for pending in self.queue.drain(..) {
            if let Some(reply) = pending.reply {
                let _ = reply.send(Err(reason.clone()));
            }
        }

        if let Some(writer) = self.writer.take() {
            let frame = WsFrame::close(reason.close_code(), close_reason_text(&reason));
            tokio::spawn(async move {
                let _ = writer.ask(WriterClose { frame }).await;
                let _ = writer.stop_gracefully().await;
            });
        }

        if self.opened {
            let stage = self.current_stage();
            guarded(&self.ws, "on_unavailable", || stage.on_unavailable(&self.ws));
        }

        if stop_actor {
            let actor = self.ws.actor.clone();
            tokio::spawn(async move {
                let _ = actor.stop_gracefully().await;
            });
        }
    }

    fn accept_message(&mut self, payload: WsPayload) {
        if self.closed.is_some() {
            return;
        }
        let stage = self.current_stage();
        guarded(&self.ws, "on_message", || stage.on_message(&self.ws, &payload));
    }

    fn enqueue(
        &mut self,
        outbound: WsOutbound,
        reply: oneshot::Sender<WebSocketResult<()>>,
    ) {
        if let Some(reason) = &self.closed {
            let _ = reply.send(Err(reason.clone()));
            return;
        }
        let frame = match outbound {
            WsOutbound::Payload(payload) => payload.into_frame(),
            WsOutbound::Object(object) => {
                let stage = self.current_stage();
                let Some(serializer) = stage.serializer() else {
                    let _ = reply.send(Err(WebSocketError::Serialization(format!(
                        "stage {} has no serializer",
                        self.cursor
                    ))));
                    return;
                };
                match serializer.serialize(object.as_ref()) {
                    Ok(payload) => payload.into_frame(),
                    Err(err) => {
                        let _ = reply.send(Err(err));
                        return;
                    }
                }
            }
        };
        self.queue.push_back(PendingSend {
            frame,
            reply: Some(reply),
        });
        self.pump();
    }

    /// Dispatch the head of the queue unless a send is already in flight.
    fn pump(&mut self) {
        if self.sending || !self.opened || self.closed.is_some() {
            return;
        }
        let Some(writer) = self.writer.clone() else {
            return;
        };
        let Some(PendingSend { frame, reply }) = self.queue.pop_front() else {
            return;
        };
        self.sending = true;
        let actor = self.ws.actor.clone();
        tokio::spawn(async move {
            let result = writer
                .ask(WriterWrite { frame })
                .await
                .map_err(|err| {
                    let err = match err {
                        SendError::HandlerError(err) => err,
                        _ => WebSocketError::ConnectionFailed("writer stopped".to_string()),
                    };
                    WebSocketError::ConnectionFailed(format!("send failed: {err}"))
                });
            // The reply must not wait on the actor, which may already be stopping.
            if let Some(reply) = reply {
                let _ = reply.send(result.clone());
            }
            let _ = actor.tell(SendCompleted { result }).send().await;
        });
    }

    fn complete_send(&mut self, result: WebSocketResult<()>) {
        self.sending = false;
        match result {
            Ok(()) => self.pump(),
            Err(reason) => {
                warn!(connection = %self.ws.name(), id = self.ws.id(), reason = %reason, "websocket send failed");
                self.close_with(reason, true);
            }
        }
    }

    fn advance(&mut self) {
        if self.closed.is_some() || !self.opened {
            warn!(connection = %self.ws.name(), id = self.ws.id(), "advance on a connection that is not open");
            return;
        }
        if self.is_initialized() {
            self.close_with(WebSocketError::normal_close("End of HandlerChain"), true);
            return;
        }

        let old = self.current_stage();
        self.cursor += 1;
        self.ws.shared.cursor.store(self.cursor, Ordering::Release);
        if self.is_initialized() {
            self.init_timer = None;
        }
        debug!(connection = %self.ws.name(), id = self.ws.id(), cursor = self.cursor, "handler chain advanced");

        let new = self.current_stage();
        if !same_stage(&old, &new) {
            guarded(&self.ws, "on_unavailable", || old.on_unavailable(&self.ws));
            guarded(&self.ws, "on_available", || new.on_available(&self.ws));
        }
    }

    fn timer_fired(&mut self, kind: TimerKind, generation: u64) {
        let slot = match kind {
            TimerKind::Ping => &mut self.ping_timer,
            TimerKind::ReadTimeout => &mut self.read_timer,
            TimerKind::InitTimeout => &mut self.init_timer,
        };
        if slot.as_ref().map(|timer| timer.generation) != Some(generation) {
            return;
        }
        *slot = None;
        if self.closed.is_some() {
            return;
        }

        match kind {
            TimerKind::Ping => {
                debug!(connection = %self.ws.name(), id = self.ws.id(), "sending keepalive ping");
                self.queue.push_front(PendingSend {
                    frame: WsFrame::Ping(Bytes::new()),
                    reply: None,
                });
                self.pump();
            }
            TimerKind::ReadTimeout => {
                warn!(
                    connection = %self.ws.name(),
                    id = self.ws.id(),
                    timeout = ?self.config.read_timeout,
                    "no inbound activity; closing"
                );
                self.close_with(
                    WebSocketError::ConnectionFailed("read timeout".to_string()),
                    true,
                );
            }
            TimerKind::InitTimeout => {
                warn!(
                    connection = %self.ws.name(),
                    id = self.ws.id(),
                    cursor = self.cursor,
                    "handler chain not advanced in time; closing"
                );
                self.close_with(
                    WebSocketError::Initialization("initialization timeout".to_string()),
                    true,
                );
            }
        }
    }
}

fn close_reason_text(reason: &WebSocketError) -> String {
    let text = match reason {
        WebSocketError::Closed { reason, .. } => reason.clone(),
        other => other.to_string(),
    };
    // Close frame reasons are capped at 123 bytes.
    let mut end = text.len().min(123);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

fn spawn_reader(
    actor: ActorRef<ConnectionActor>,
    mut reader: BoxWsReader,
    debounce: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_activity: Option<Instant> = None;
        let reason = loop {
            let frame = match reader.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(err)) => break WebSocketError::ConnectionFailed(err.to_string()),
                None => {
                    break WebSocketError::closed(ABNORMAL_CLOSE_CODE, "connection dropped");
                }
            };

            let now = Instant::now();
            if last_activity.is_none_or(|at| now.duration_since(at) >= debounce) {
                last_activity = Some(now);
                if actor.tell(InboundActivity).send().await.is_err() {
                    return;
                }
            }

            match frame {
                WsFrame::Close(close) => {
                    break match close {
                        Some(close) => WebSocketError::closed(close.code, close.reason_lossy()),
                        None => WebSocketError::closed(NO_STATUS_CLOSE_CODE, "closed by peer"),
                    };
                }
                WsFrame::Ping(_) | WsFrame::Pong(_) => {}
                data => {
                    if let Some(payload) = WsPayload::from_frame(data) {
                        if actor.tell(Inbound(payload)).send().await.is_err() {
                            return;
                        }
                    }
                }
            }
        };
        let _ = actor.tell(TransportClosed { reason }).send().await;
    })
}

/// Transport established; start serving.
pub struct Open {
    pub reader: BoxWsReader,
    pub writer: BoxWsWriter,
}

impl KameoMessage<Open> for ConnectionActor {
    type Reply = ();

    async fn handle(&mut self, msg: Open, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.open(msg.reader, msg.writer).await;
    }
}

pub(crate) struct CloseConnection {
    pub(crate) reason: WebSocketError,
}

impl KameoMessage<CloseConnection> for ConnectionActor {
    type Reply = ();

    async fn handle(
        &mut self,
        msg: CloseConnection,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.close_with(msg.reason, true);
    }
}

struct TransportClosed {
    reason: WebSocketError,
}

impl KameoMessage<TransportClosed> for ConnectionActor {
    type Reply = ();

    async fn handle(
        &mut self,
        msg: TransportClosed,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.close_with(msg.reason, true);
    }
}

struct Inbound(WsPayload);

impl KameoMessage<Inbound> for ConnectionActor {
    type Reply = ();

    async fn handle(&mut self, msg: Inbound, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.accept_message(msg.0);
    }
}

struct InboundActivity;

impl KameoMessage<InboundActivity> for ConnectionActor {
    type Reply = ();

    async fn handle(
        &mut self,
        _msg: InboundActivity,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if self.opened && self.closed.is_none() {
            self.rearm_activity_timers();
        }
    }
}

struct SendOutbound {
    outbound: WsOutbound,
    reply: oneshot::Sender<WebSocketResult<()>>,
}

impl KameoMessage<SendOutbound> for ConnectionActor {
    type Reply = ();

    async fn handle(
        &mut self,
        msg: SendOutbound,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.enqueue(msg.outbound, msg.reply);
    }
}

struct SendCompleted {
    result: WebSocketResult<()>,
}

impl KameoMessage<SendCompleted> for ConnectionActor {
    type Reply = ();

    async fn handle(
        &mut self,
        msg: SendCompleted,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.complete_send(msg.result);
    }
}

struct AdvanceHandler;

impl KameoMessage<AdvanceHandler> for ConnectionActor {
    type Reply = ();

    async fn handle(
        &mut self,
        _msg: AdvanceHandler,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.advance();
    }
}

struct TimerFired {
    kind: TimerKind,
    generation: u64,
}

impl KameoMessage<TimerFired> for ConnectionActor {
    type Reply = ();

    async fn handle(
        &mut self,
        msg: TimerFired,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.timer_fired(msg.kind, msg.generation);
    }
}

struct Execute(Box<dyn FnOnce(&WebSocket) + Send>);

impl KameoMessage<Execute> for ConnectionActor {
    type Reply = ();

    async fn handle(&mut self, msg: Execute, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        if self.closed.is_some() {
            return;
        }
        let f = msg.0;
        guarded(&self.ws, "execute", || f(&self.ws));
    }
}
