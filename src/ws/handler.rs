//! Handler stages and the ordered chain a connection walks through.

use std::fmt;
use std::ops::Deref;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::error;

use super::connection::WebSocket;
use crate::core::{WebSocketError, WebSocketResult, WsDeserializer, WsPayload, WsSerializer};

/// One stage of a connection's handler chain.
///
/// A stage only sees events while it is the active one. Every callback is optional.
pub trait WsHandler: Send + Sync + 'static {
    fn on_available(&self, _ws: &WebSocket) {}

    fn on_message(&self, _ws: &WebSocket, _payload: &WsPayload) {}

    fn on_unavailable(&self, _ws: &WebSocket) {}

    /// Encodes application objects sent while this stage is active.
    fn serializer(&self) -> Option<&dyn WsSerializer> {
        None
    }

    fn deserializer(&self) -> Option<&dyn WsDeserializer> {
        None
    }
}

/// Immutable, non-empty, ordered list of stages.
#[derive(Clone)]
pub struct HandlerChain {
    stages: Arc<[Arc<dyn WsHandler>]>,
}

impl HandlerChain {
    pub fn new(stages: Vec<Arc<dyn WsHandler>>) -> WebSocketResult<Self> {
        if stages.is_empty() {
            return Err(WebSocketError::InvalidConfig(
                "handler chain needs at least one stage".to_string(),
            ));
        }
        Ok(Self {
            stages: stages.into(),
        })
    }

    pub fn single(stage: Arc<dyn WsHandler>) -> Self {
        Self {
            stages: Arc::from(vec![stage]),
        }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn last_index(&self) -> usize {
        self.stages.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&Arc<dyn WsHandler>> {
        self.stages.get(index)
    }
}

impl Deref for HandlerChain {
    type Target = [Arc<dyn WsHandler>];

    fn deref(&self) -> &Self::Target {
        &self.stages
    }
}

impl fmt::Debug for HandlerChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerChain")
            .field("stages", &self.stages.len())
            .finish()
    }
}

impl From<Arc<dyn WsHandler>> for HandlerChain {
    fn from(stage: Arc<dyn WsHandler>) -> Self {
        Self::single(stage)
    }
}

/// Two chain entries are the same stage when they point at the same object.
pub fn same_stage(a: &Arc<dyn WsHandler>, b: &Arc<dyn WsHandler>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Run a user callback, logging and swallowing a panic.
pub(crate) fn guarded(ws: &WebSocket, callback: &'static str, f: impl FnOnce()) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(f)) {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        error!(
            connection = %ws.name(),
            id = ws.id(),
            callback,
            panic = %message,
            "websocket callback panicked"
        );
    }
}

type AvailableFn = Box<dyn Fn(&WebSocket) + Send + Sync>;
type MessageFn = Box<dyn Fn(&WebSocket, &WsPayload) + Send + Sync>;

/// Stage assembled from closures.
#[derive(Default)]
pub struct FnHandler {
    available: Option<AvailableFn>,
    message: Option<MessageFn>,
    unavailable: Option<AvailableFn>,
    serializer: Option<Arc<dyn WsSerializer>>,
    deserializer: Option<Arc<dyn WsDeserializer>>,
}

impl FnHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_available(mut self, f: impl Fn(&WebSocket) + Send + Sync + 'static) -> Self {
        self.available = Some(Box::new(f));
        self
    }

    pub fn on_message(
        mut self,
        f: impl Fn(&WebSocket, &WsPayload) + Send + Sync + 'static,
    ) -> Self {
        self.message = Some(Box::new(f));
        self
    }

    pub fn on_unavailable(mut self, f: impl Fn(&WebSocket) + Send + Sync + 'static) -> Self {
        self.unavailable = Some(Box::new(f));
        self
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn WsSerializer>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    pub fn with_deserializer(mut self, deserializer: Arc<dyn WsDeserializer>) -> Self {
        self.deserializer = Some(deserializer);
        self
    }

    pub fn build(self) -> Arc<dyn WsHandler> {
        Arc::new(self)
    }
}

impl WsHandler for FnHandler {
    fn on_available(&self, ws: &WebSocket) {
        if let Some(f) = &self.available {
            f(ws);
        }
    }

    fn on_message(&self, ws: &WebSocket, payload: &WsPayload) {
        if let Some(f) = &self.message {
            f(ws, payload);
        }
    }

    fn on_unavailable(&self, ws: &WebSocket) {
        if let Some(f) = &self.unavailable {
            f(ws);
        }
    }

    fn serializer(&self) -> Option<&dyn WsSerializer> {
        self.serializer.as_deref()
    }

    fn deserializer(&self) -> Option<&dyn WsDeserializer> {
        self.deserializer.as_deref()
    }
}
