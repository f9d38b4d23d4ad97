//! Handshake gate in front of a handler stage.
//!
//! [`initializable`] wraps a stage so that, once the connection is available, an initializer
//! negotiates with the peer first. Every message received before [`Initialization::complete`]
//! is handed to the initializer and buffered. Completing replays the buffer to the wrapped stage
//! and then tells it the connection is available.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use super::connection::WebSocket;
use super::handler::WsHandler;
use crate::core::{WebSocketError, WebSocketResult, WsDeserializer, WsPayload, WsSerializer};

/// Drives the negotiation of one connection.
pub trait WsInitializer: Send + Sync + 'static {
    fn on_connected(&self, _ws: &WebSocket, _init: &Initialization) {}

    fn on_message(&self, _ws: &WebSocket, _payload: &WsPayload, _init: &Initialization) {}

    fn on_initialized(&self, _ws: &WebSocket) {}

    fn on_canceled(&self, _ws: &WebSocket, _reason: &WebSocketError) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Negotiating,
    /// `complete()` was called; the promotion is queued on the connection.
    Completing,
    Ready,
}

struct InitState {
    phase: Phase,
    buffered: Vec<WsPayload>,
    timer: Option<JoinHandle<()>>,
}

impl InitState {
    fn new() -> Self {
        Self {
            phase: Phase::Negotiating,
            buffered: Vec::new(),
            timer: None,
        }
    }
}

type SharedState = Arc<Mutex<InitState>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct InitCore {
    inner: Arc<dyn WsHandler>,
    initializer: Arc<dyn WsInitializer>,
    timeout: Duration,
    states: Mutex<HashMap<u64, SharedState>>,
}

/// Handle given to the initializer to finish or abort the negotiation.
#[derive(Clone)]
pub struct Initialization {
    ws: WebSocket,
    state: SharedState,
    core: Arc<InitCore>,
}

impl Initialization {
    /// Promote the connection to ready. Ignored once completed or closed.
    pub fn complete(&self) {
        {
            let mut state = lock(&self.state);
            if state.phase != Phase::Negotiating {
                return;
            }
            state.phase = Phase::Completing;
        }
        let this = self.clone();
        let _ = self.ws.execute(move |ws| this.finish(ws));
    }

    /// Abort the negotiation and close the connection. Ignored once completed.
    pub fn cancel(&self, reason: Option<&str>) {
        let reason = reason.unwrap_or("Canceled").to_string();
        self.abort(WebSocketError::Initialization(reason));
    }

    pub fn is_complete(&self) -> bool {
        lock(&self.state).phase == Phase::Ready
    }

    pub fn socket(&self) -> &WebSocket {
        &self.ws
    }

    fn abort(&self, reason: WebSocketError) {
        let state = Arc::clone(&self.state);
        let _ = self.ws.execute(move |ws| {
            if lock(&state).phase == Phase::Negotiating {
                ws.close(reason);
            }
        });
    }

    fn finish(&self, ws: &WebSocket) {
        let buffered = {
            let mut state = lock(&self.state);
            if state.phase != Phase::Completing {
                return;
            }
            state.phase = Phase::Ready;
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            std::mem::take(&mut state.buffered)
        };

        self.core.initializer.on_initialized(ws);
        debug!(connection = %ws.name(), id = ws.id(), replayed = buffered.len(), "websocket ready");
        for payload in &buffered {
            self.core.inner.on_message(ws, payload);
        }
        self.core.inner.on_available(ws);
    }
}

impl fmt::Debug for Initialization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Initialization")
            .field("connection", &self.ws.id())
            .field("complete", &self.is_complete())
            .finish()
    }
}

struct InitializingHandler {
    core: Arc<InitCore>,
}

impl InitializingHandler {
    fn state_of(&self, ws: &WebSocket) -> Option<SharedState> {
        lock(&self.core.states).get(&ws.id()).cloned()
    }

    fn initialization(&self, ws: &WebSocket, state: SharedState) -> Initialization {
        Initialization {
            ws: ws.clone(),
            state,
            core: Arc::clone(&self.core),
        }
    }
}

impl WsHandler for InitializingHandler {
    fn on_available(&self, ws: &WebSocket) {
        let state: SharedState = Arc::new(Mutex::new(InitState::new()));
        lock(&self.core.states).insert(ws.id(), Arc::clone(&state));
        let init = self.initialization(ws, Arc::clone(&state));

        let timeout = self.core.timeout;
        let on_timeout = init.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            on_timeout.abort(WebSocketError::Initialization(
                "Initialization timeout".to_string(),
            ));
        });
        lock(&state).timer = Some(timer);

        debug!(connection = %ws.name(), id = ws.id(), "websocket initializing");
        self.core.initializer.on_connected(ws, &init);
    }

    fn on_message(&self, ws: &WebSocket, payload: &WsPayload) {
        let Some(state) = self.state_of(ws) else {
            self.core.inner.on_message(ws, payload);
            return;
        };
        let phase = {
            let mut guard = lock(&state);
            if guard.phase != Phase::Ready {
                guard.buffered.push(payload.clone());
            }
            guard.phase
        };
        match phase {
            Phase::Negotiating => {
                let init = self.initialization(ws, state);
                self.core.initializer.on_message(ws, payload, &init);
            }
            Phase::Completing => {}
            Phase::Ready => self.core.inner.on_message(ws, payload),
        }
    }

    fn on_unavailable(&self, ws: &WebSocket) {
        let Some(state) = lock(&self.core.states).remove(&ws.id()) else {
            return;
        };
        let phase = {
            let mut guard = lock(&state);
            if let Some(timer) = guard.timer.take() {
                timer.abort();
            }
            guard.buffered.clear();
            guard.phase
        };
        match phase {
            Phase::Ready => self.core.inner.on_unavailable(ws),
            Phase::Negotiating | Phase::Completing => {
                let reason = ws.closed_reason().unwrap_or_else(|| {
                    WebSocketError::Initialization("stage left before initialization".to_string())
                });
                debug!(connection = %ws.name(), id = ws.id(), reason = %reason, "websocket initialization canceled");
                self.core.initializer.on_canceled(ws, &reason);
            }
        }
    }

    fn serializer(&self) -> Option<&dyn WsSerializer> {
        self.core.inner.serializer()
    }

    fn deserializer(&self) -> Option<&dyn WsDeserializer> {
        self.core.inner.deserializer()
    }
}

/// Wrap `stage` so that it only becomes available after `initializer` completes, within
/// `timeout` of the connection opening.
pub fn initializable(
    stage: Arc<dyn WsHandler>,
    initializer: Arc<dyn WsInitializer>,
    timeout: Duration,
) -> WebSocketResult<Arc<dyn WsHandler>> {
    if timeout.is_zero() {
        return Err(WebSocketError::InvalidConfig(
            "initialization timeout must be positive".to_string(),
        ));
    }
    Ok(Arc::new(InitializingHandler {
        core: Arc::new(InitCore {
            inner: stage,
            initializer,
            timeout,
            states: Mutex::new(HashMap::new()),
        }),
    }))
}
