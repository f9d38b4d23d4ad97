//! Groups of live connections that can be addressed together.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::warn;

use super::connection::{Completion, WebSocket};
use super::handler::WsHandler;
use crate::core::{WebSocketError, WebSocketResult, WsDeserializer, WsOutbound, WsPayload, WsSerializer};

/// Set of connections, keyed by connection id.
///
/// Closed connections are pruned lazily whenever the collection is read.
#[derive(Clone, Default)]
pub struct WebSocketCollection {
    sockets: Arc<Mutex<BTreeMap<u64, WebSocket>>>,
}

impl WebSocketCollection {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u64, WebSocket>> {
        let mut sockets = self.sockets.lock().unwrap_or_else(PoisonError::into_inner);
        sockets.retain(|_, ws| !ws.is_closed());
        sockets
    }

    pub fn add(&self, ws: WebSocket) -> bool {
        if ws.is_closed() {
            return false;
        }
        self.lock().insert(ws.id(), ws).is_none()
    }

    pub fn remove(&self, ws: &WebSocket) -> bool {
        self.lock().remove(&ws.id()).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn sockets(&self) -> Vec<WebSocket> {
        self.lock().values().cloned().collect()
    }

    /// Send `message` to every open connection accepted by `filter`.
    ///
    /// Application objects are encoded once per distinct serializer among the targeted
    /// connections' active stages. Connections whose encoding fails get a failed completion.
    pub fn broadcast<F>(&self, message: impl Into<WsOutbound>, filter: F) -> Vec<(u64, Completion)>
    where
        F: Fn(&WebSocket) -> bool,
    {
        let targets: Vec<WebSocket> = self
            .lock()
            .values()
            .filter(|ws| ws.is_open() && filter(ws))
            .cloned()
            .collect();

        match message.into() {
            WsOutbound::Payload(payload) => targets
                .iter()
                .map(|ws| (ws.id(), ws.send(payload.clone())))
                .collect(),
            WsOutbound::Object(object) => {
                let mut encoded: HashMap<usize, WebSocketResult<WsPayload>> = HashMap::new();
                targets
                    .iter()
                    .map(|ws| {
                        let stage = ws.stage();
                        let result = match stage.serializer() {
                            Some(serializer) => {
                                let key = std::ptr::from_ref(serializer).cast::<()>() as usize;
                                encoded
                                    .entry(key)
                                    .or_insert_with(|| serializer.serialize(object.as_ref()))
                                    .clone()
                            }
                            None => Err(WebSocketError::Serialization(
                                "active stage has no serializer".to_string(),
                            )),
                        };
                        let completion = match result {
                            Ok(payload) => ws.send(payload),
                            Err(err) => {
                                warn!(connection = %ws.name(), id = ws.id(), error = %err, "broadcast encoding failed");
                                Completion::ready(Err(err))
                            }
                        };
                        (ws.id(), completion)
                    })
                    .collect()
            }
        }
    }

    /// Wrap `stage` so connections join this collection while the stage is active.
    pub fn track(&self, stage: Arc<dyn WsHandler>) -> Arc<dyn WsHandler> {
        Arc::new(TrackingHandler {
            collection: self.clone(),
            inner: stage,
        })
    }
}

struct TrackingHandler {
    collection: WebSocketCollection,
    inner: Arc<dyn WsHandler>,
}

impl WsHandler for TrackingHandler {
    fn on_available(&self, ws: &WebSocket) {
        self.collection.add(ws.clone());
        self.inner.on_available(ws);
    }

    fn on_message(&self, ws: &WebSocket, payload: &WsPayload) {
        self.inner.on_message(ws, payload);
    }

    fn on_unavailable(&self, ws: &WebSocket) {
        self.collection.remove(ws);
        self.inner.on_unavailable(ws);
    }

    fn serializer(&self) -> Option<&dyn WsSerializer> {
        self.inner.serializer()
    }

    fn deserializer(&self) -> Option<&dyn WsDeserializer> {
        self.inner.deserializer()
    }
}
