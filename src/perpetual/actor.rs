use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use kameo::actor::WeakActorRef;
use kameo::error::{ActorStopReason, PanicError};
use kameo::prelude::{Actor, ActorRef, Context, Message as KameoMessage};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{
    ConnectionSpawner, PerpetualHandler, PerpetualShared, PerpetualSocket, PerpetualStatus,
    guarded,
};
use crate::core::{
    AttributeKey, MessageDeduplicator, PerpetualConfig, ScheduledTask, WebSocketError,
    WebSocketResult, WsOutbound, WsPayload, schedule_tell,
};
use crate::ws::{WebSocket, WsHandler, WsInitializer, initializable};

/// When a connection joined its perpetual socket's rotation.
pub const OPENED_AT: AttributeKey<Instant> = AttributeKey::new("perpetual.opened_at");

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TimerKind {
    Shift,
    Switch,
    Reconnect,
}

struct ArmedTimer {
    generation: u64,
    _task: ScheduledTask,
}

struct QueuedSend {
    payload: WsPayload,
    reply: oneshot::Sender<WebSocketResult<()>>,
}

pub struct PerpetualArgs {
    pub(crate) shared: Arc<PerpetualShared>,
    pub(crate) config: PerpetualConfig,
    pub(crate) handler: Arc<dyn PerpetualHandler>,
    pub(crate) spawner: Arc<dyn ConnectionSpawner>,
    pub(crate) initializer: Option<(Arc<dyn WsInitializer>, Duration)>,
}

/// Owns the rotation of one perpetual socket.
pub struct PerpetualSocketActor {
    socket: PerpetualSocket,
    config: PerpetualConfig,
    handler: Arc<dyn PerpetualHandler>,
    spawner: Arc<dyn ConnectionSpawner>,
    tail: Arc<dyn WsHandler>,
    /// Oldest first; the back is the primary.
    live: VecDeque<WebSocket>,
    connecting: Option<u64>,
    dedup: MessageDeduplicator,
    queue: VecDeque<QueuedSend>,
    shift_timer: Option<ArmedTimer>,
    switch_timer: Option<ArmedTimer>,
    reconnect_timer: Option<ArmedTimer>,
    timer_generation: u64,
    stopped: bool,
}

impl Actor for PerpetualSocketActor {
    type Args = PerpetualArgs;
    type Error = WebSocketError;

    fn name() -> &'static str {
        "PerpetualSocketActor"
    }

    async fn on_start(args: Self::Args, actor_ref: ActorRef<Self>) -> WebSocketResult<Self> {
        let PerpetualArgs {
            shared,
            config,
            handler,
            spawner,
            initializer,
        } = args;

        let proxy: Arc<dyn WsHandler> = Arc::new(RotationStage {
            actor: actor_ref.downgrade(),
        });
        let tail = match initializer {
            Some((initializer, timeout)) => initializable(proxy, initializer, timeout)?,
            None => proxy,
        };

        Ok(Self {
            socket: PerpetualSocket {
                shared,
                actor: actor_ref,
            },
            config,
            handler,
            spawner,
            tail,
            live: VecDeque::new(),
            connecting: None,
            dedup: MessageDeduplicator::new(),
            queue: VecDeque::new(),
            shift_timer: None,
            switch_timer: None,
            reconnect_timer: None,
            timer_generation: 0,
            stopped: false,
        })
    }

    async fn on_panic(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        err: PanicError,
    ) -> Result<ControlFlow<ActorStopReason>, Self::Error> {
        error!(socket = %self.socket.name(), error = ?err, "PerpetualSocketActor panicked");
        Ok(ControlFlow::Break(ActorStopReason::Panicked(err)))
    }

    async fn on_stop(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        _reason: ActorStopReason,
    ) -> WebSocketResult<()> {
        if !self.stopped {
            self.shutdown();
        }
        Ok(())
    }
}

impl PerpetualSocketActor {
    fn label(&self) -> &str {
        self.socket.name()
    }

    fn arm(&mut self, kind: TimerKind, delay: Duration) -> ArmedTimer {
        self.timer_generation = self.timer_generation.wrapping_add(1);
        let generation = self.timer_generation;
        ArmedTimer {
            generation,
            _task: schedule_tell(&self.socket.actor, delay, RotationTimer { kind, generation }),
        }
    }

    fn publish(&self) {
        let status = match (self.live.len(), self.connecting.is_some()) {
            (0, false) => PerpetualStatus::Disconnected,
            (0, true) => PerpetualStatus::Connecting,
            (1, _) => PerpetualStatus::Connected,
            _ => PerpetualStatus::Overlapping,
        };
        self.socket.shared.status.send_replace(status);
        self.socket
            .shared
            .primary
            .send_replace(self.live.back().cloned());
    }

    /// Open a successor unless one is already on its way.
    fn start_connection(&mut self) {
        if self.stopped || self.connecting.is_some() {
            return;
        }
        self.reconnect_timer = None;

        match self.spawner.spawn(self.socket.name(), Arc::clone(&self.tail)) {
            Ok(ws) => {
                debug!(socket = %self.label(), connection = ws.id(), live = self.live.len(), "connecting successor");
                self.connecting = Some(ws.id());
                self.watch_termination(ws);
            }
            Err(err) => {
                warn!(socket = %self.label(), error = %err, "could not start connection");
                self.schedule_reconnect();
            }
        }
        self.publish();
    }

    fn schedule_reconnect(&mut self) {
        if self.stopped {
            return;
        }
        debug!(socket = %self.label(), delay = ?self.config.reconnect_delay, "reconnect scheduled");
        self.reconnect_timer = Some(self.arm(TimerKind::Reconnect, self.config.reconnect_delay));
    }

    fn watch_termination(&self, ws: WebSocket) {
        let actor = self.socket.actor.downgrade();
        tokio::spawn(async move {
            let reason = ws.closed().await;
            if let Some(actor) = actor.upgrade() {
                let _ = actor
                    .tell(ConnectionTerminated {
                        id: ws.id(),
                        reason,
                    })
                    .send()
                    .await;
            }
        });
    }

    fn connection_available(&mut self, ws: WebSocket) {
        if self.stopped {
            ws.close_normal("Perpetual socket shut down");
            return;
        }
        if self.connecting == Some(ws.id()) {
            self.connecting = None;
        }
        if self.live.iter().any(|live| live.id() == ws.id()) {
            return;
        }

        ws.attributes().insert(&OPENED_AT, Instant::now());
        self.live.push_back(ws.clone());
        info!(socket = %self.label(), connection = ws.id(), live = self.live.len(), "connection joined rotation");
        self.publish();

        if self.live.len() == 1 {
            let socket = self.socket.clone();
            let handler = Arc::clone(&self.handler);
            guarded(&socket, "on_available", || handler.on_available(&socket));
        }

        for queued in std::mem::take(&mut self.queue) {
            self.dispatch(queued.payload, queued.reply);
        }

        self.shift_timer = Some(self.arm(TimerKind::Shift, self.config.shift_duration));
        if self.live.len() > 1 {
            self.switch_timer = Some(self.arm(TimerKind::Switch, self.config.switch_duration));
        }
    }

    fn connection_message(&mut self, id: u64, payload: WsPayload) {
        if !self.live.iter().any(|ws| ws.id() == id) {
            return;
        }
        if self.live.len() > 1 && !self.dedup.accept(&payload, id) {
            return;
        }
        let socket = self.socket.clone();
        let handler = Arc::clone(&self.handler);
        guarded(&socket, "on_message", || handler.on_message(&socket, &payload));
    }

    fn connection_terminated(&mut self, id: u64, reason: WebSocketError) {
        if self.connecting == Some(id) {
            self.connecting = None;
            warn!(socket = %self.label(), connection = id, reason = %reason, "connection failed before joining rotation");
            self.schedule_reconnect();
            self.publish();
            return;
        }

        let Some(position) = self.live.iter().position(|ws| ws.id() == id) else {
            return;
        };
        let was_primary = position + 1 == self.live.len();
        self.live.remove(position);
        info!(socket = %self.label(), connection = id, reason = %reason, live = self.live.len(), "connection left rotation");

        match self.live.len() {
            0 => {
                self.dedup.reset();
                self.shift_timer = None;
                self.switch_timer = None;
                let socket = self.socket.clone();
                let handler = Arc::clone(&self.handler);
                guarded(&socket, "on_unavailable", || {
                    handler.on_unavailable(&socket, &reason)
                });
            }
            1 => {
                self.dedup.reset();
                self.switch_timer = None;
            }
            _ => {}
        }
        self.publish();

        if was_primary {
            self.start_connection();
        }
    }

    fn close_superseded(&mut self) {
        let Some(primary) = self.live.back() else {
            return;
        };
        let primary_id = primary.id();
        for ws in self.live.iter().filter(|ws| ws.id() != primary_id) {
            let age = ws
                .attributes()
                .get(&OPENED_AT)
                .map(|opened_at| opened_at.elapsed());
            info!(socket = %self.label(), connection = ws.id(), age = ?age, "closing superseded connection");
            ws.close_normal("Shift terminated");
        }
    }

    fn enqueue(&mut self, outbound: WsOutbound, reply: oneshot::Sender<WebSocketResult<()>>) {
        if self.stopped {
            let _ = reply.send(Err(WebSocketError::InvalidState(
                "perpetual socket stopped".to_string(),
            )));
            return;
        }
        let payload = match outbound {
            WsOutbound::Payload(payload) => payload,
            WsOutbound::Object(object) => {
                let encoded = match self.handler.serializer() {
                    Some(serializer) => serializer.serialize(object.as_ref()),
                    None => Err(WebSocketError::Serialization(
                        "perpetual handler has no serializer".to_string(),
                    )),
                };
                match encoded {
                    Ok(payload) => payload,
                    Err(err) => {
                        let _ = reply.send(Err(err));
                        return;
                    }
                }
            }
        };
        self.dispatch(payload, reply);
    }

    /// Hand a send to the primary, or queue it until one opens.
    fn dispatch(&mut self, payload: WsPayload, reply: oneshot::Sender<WebSocketResult<()>>) {
        let Some(primary) = self.live.back().filter(|ws| ws.is_open()).cloned() else {
            self.queue.push_back(QueuedSend { payload, reply });
            return;
        };
        let completion = primary.send(payload.clone());
        let actor = self.socket.actor.clone();
        tokio::spawn(async move {
            let result = completion.await;
            let _ = actor
                .tell(SendSettled {
                    payload,
                    reply,
                    result,
                })
                .send()
                .await;
        });
    }

    fn shutdown(&mut self) {
        self.stopped = true;
        self.shift_timer = None;
        self.switch_timer = None;
        self.reconnect_timer = None;
        self.connecting = None;
        for queued in self.queue.drain(..) {
            let _ = queued.reply.send(Err(WebSocketError::InvalidState(
                "perpetual socket stopped".to_string(),
            )));
        }

        let reason = WebSocketError::normal_close("Perpetual socket shut down");
        let had_live = !self.live.is_empty();
        for ws in self.live.drain(..) {
            ws.close(reason.clone());
        }
        self.dedup.reset();
        self.publish();
        info!(socket = %self.label(), "perpetual socket shut down");

        if had_live {
            let socket = self.socket.clone();
            let handler = Arc::clone(&self.handler);
            guarded(&socket, "on_unavailable", || {
                handler.on_unavailable(&socket, &reason)
            });
        }
    }
}

/// Last stage of every connection's chain: forwards into the owning perpetual socket.
struct RotationStage {
    actor: WeakActorRef<PerpetualSocketActor>,
}

impl WsHandler for RotationStage {
    fn on_available(&self, ws: &WebSocket) {
        match self.actor.upgrade() {
            Some(actor) => {
                let _ = actor.tell(ConnectionAvailable(ws.clone())).try_send();
            }
            None => ws.close_normal("Perpetual socket shut down"),
        }
    }

    fn on_message(&self, ws: &WebSocket, payload: &WsPayload) {
        if let Some(actor) = self.actor.upgrade() {
            let _ = actor
                .tell(ConnectionMessage {
                    id: ws.id(),
                    payload: payload.clone(),
                })
                .try_send();
        }
    }
}

pub(crate) struct Start;

impl KameoMessage<Start> for PerpetualSocketActor {
    type Reply = ();

    async fn handle(&mut self, _msg: Start, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.start_connection();
    }
}

struct ConnectionAvailable(WebSocket);

impl KameoMessage<ConnectionAvailable> for PerpetualSocketActor {
    type Reply = ();

    async fn handle(
        &mut self,
        msg: ConnectionAvailable,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.connection_available(msg.0);
    }
}

struct ConnectionMessage {
    id: u64,
    payload: WsPayload,
}

impl KameoMessage<ConnectionMessage> for PerpetualSocketActor {
    type Reply = ();

    async fn handle(
        &mut self,
        msg: ConnectionMessage,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.connection_message(msg.id, msg.payload);
    }
}

struct ConnectionTerminated {
    id: u64,
    reason: WebSocketError,
}

impl KameoMessage<ConnectionTerminated> for PerpetualSocketActor {
    type Reply = ();

    async fn handle(
        &mut self,
        msg: ConnectionTerminated,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.connection_terminated(msg.id, msg.reason);
    }
}

struct RotationTimer {
    kind: TimerKind,
    generation: u64,
}

impl KameoMessage<RotationTimer> for PerpetualSocketActor {
    type Reply = ();

    async fn handle(
        &mut self,
        msg: RotationTimer,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let slot = match msg.kind {
            TimerKind::Shift => &mut self.shift_timer,
            TimerKind::Switch => &mut self.switch_timer,
            TimerKind::Reconnect => &mut self.reconnect_timer,
        };
        if slot.as_ref().map(|timer| timer.generation) != Some(msg.generation) {
            return;
        }
        *slot = None;

        match msg.kind {
            TimerKind::Shift => {
                info!(socket = %self.label(), "shift elapsed; rotating");
                self.start_connection();
            }
            TimerKind::Switch => self.close_superseded(),
            TimerKind::Reconnect => self.start_connection(),
        }
    }
}

pub(crate) struct SendMessage {
    pub(crate) outbound: WsOutbound,
    pub(crate) reply: oneshot::Sender<WebSocketResult<()>>,
}

impl KameoMessage<SendMessage> for PerpetualSocketActor {
    type Reply = ();

    async fn handle(
        &mut self,
        msg: SendMessage,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.enqueue(msg.outbound, msg.reply);
    }
}

struct SendSettled {
    payload: WsPayload,
    reply: oneshot::Sender<WebSocketResult<()>>,
    result: WebSocketResult<()>,
}

impl KameoMessage<SendSettled> for PerpetualSocketActor {
    type Reply = ();

    async fn handle(
        &mut self,
        msg: SendSettled,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        match msg.result {
            Ok(()) => {
                let _ = msg.reply.send(Ok(()));
            }
            Err(err) if !self.stopped => {
                debug!(socket = %self.label(), error = %err, "send failed; resubmitting");
                self.dispatch(msg.payload, msg.reply);
            }
            Err(err) => {
                let _ = msg.reply.send(Err(err));
            }
        }
    }
}

pub(crate) struct LiveConnections;

impl KameoMessage<LiveConnections> for PerpetualSocketActor {
    type Reply = WebSocketResult<Vec<WebSocket>>;

    async fn handle(
        &mut self,
        _msg: LiveConnections,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self.live.iter().cloned().collect())
    }
}

pub(crate) struct Shutdown;

impl KameoMessage<Shutdown> for PerpetualSocketActor {
    type Reply = WebSocketResult<()>;

    async fn handle(&mut self, _msg: Shutdown, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        if !self.stopped {
            self.shutdown();
        }
        let actor = self.socket.actor.clone();
        tokio::spawn(async move {
            let _ = actor.stop_gracefully().await;
        });
        Ok(())
    }
}
