//! Logical sockets that outlive any single physical connection.
//!
//! A [`PerpetualSocket`] keeps one identity alive by opening a fresh connection every shift,
//! overlapping it briefly with the outgoing one and merging inbound traffic through a
//! deduplicator while both are live.

use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use kameo::mailbox;
use kameo::prelude::{Actor, ActorRef};
use tokio::sync::{oneshot, watch};
use tracing::error;

use crate::core::{
    PerpetualConfig, WebSocketError, WebSocketResult, WsOutbound, WsPayload, WsSerializer,
};
use crate::ws::{WebSocket, WsInitializer};

mod actor;
mod spawner;

pub use actor::{OPENED_AT, PerpetualSocketActor};
pub use spawner::{ClientConnector, ConnectionSpawner};

use actor::{LiveConnections, PerpetualArgs, SendMessage, Shutdown, Start};

/// Application-facing callbacks of a perpetual socket. All optional.
pub trait PerpetualHandler: Send + Sync + 'static {
    /// The socket went from no open connection to one.
    fn on_available(&self, _socket: &PerpetualSocket) {}

    /// A deduplicated inbound message.
    fn on_message(&self, _socket: &PerpetualSocket, _payload: &WsPayload) {}

    /// The last live connection closed.
    fn on_unavailable(&self, _socket: &PerpetualSocket, _reason: &WebSocketError) {}

    /// Encodes application objects passed to [`PerpetualSocket::send`].
    fn serializer(&self) -> Option<&dyn WsSerializer> {
        None
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PerpetualStatus {
    Disconnected,
    Connecting,
    Connected,
    /// A successor is live alongside the connection it replaces.
    Overlapping,
}

static NEXT_PERPETUAL_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) struct PerpetualShared {
    id: u64,
    name: String,
    status: watch::Sender<PerpetualStatus>,
    primary: watch::Sender<Option<WebSocket>>,
}

/// Cloneable handle to a perpetual socket.
#[derive(Clone)]
pub struct PerpetualSocket {
    shared: Arc<PerpetualShared>,
    actor: ActorRef<PerpetualSocketActor>,
}

impl PerpetualSocket {
    pub fn builder(
        name: impl Into<String>,
        spawner: impl ConnectionSpawner,
        handler: impl PerpetualHandler,
    ) -> PerpetualSocketBuilder {
        PerpetualSocketBuilder {
            name: name.into(),
            spawner: Arc::new(spawner),
            handler: Arc::new(handler),
            config: None,
            initializer: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn status(&self) -> PerpetualStatus {
        *self.shared.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<PerpetualStatus> {
        self.shared.status.subscribe()
    }

    /// Whether the most recent connection is open.
    pub fn is_connected(&self) -> bool {
        self.shared
            .primary
            .borrow()
            .as_ref()
            .is_some_and(WebSocket::is_open)
    }

    /// The connection sends currently go to.
    pub fn primary(&self) -> Option<WebSocket> {
        self.shared.primary.borrow().clone()
    }

    /// Wait until at least one connection is live.
    pub async fn connected(&self) {
        let mut rx = self.watch_status();
        let _ = rx
            .wait_for(|status| {
                matches!(
                    status,
                    PerpetualStatus::Connected | PerpetualStatus::Overlapping
                )
            })
            .await;
    }

    /// Send `message` on the most recent connection.
    ///
    /// The message is queued while no connection is open and resubmitted if a connection fails
    /// to send it, so the returned future only fails if the socket is shut down or the message
    /// cannot be encoded.
    pub fn send(
        &self,
        message: impl Into<WsOutbound>,
    ) -> impl Future<Output = WebSocketResult<()>> + Send + 'static {
        let (reply, rx) = oneshot::channel();
        let queued = self
            .actor
            .tell(SendMessage {
                outbound: message.into(),
                reply,
            })
            .try_send()
            .map_err(|_| stopped());
        async move {
            queued?;
            rx.await.map_err(|_| stopped())?
        }
    }

    /// Live connections, oldest first.
    pub async fn live_connections(&self) -> WebSocketResult<Vec<WebSocket>> {
        self.actor
            .ask(LiveConnections)
            .await
            .map_err(|_| stopped())
    }

    /// Stop rotating and close every live connection.
    pub async fn shutdown(&self) -> WebSocketResult<()> {
        self.actor.ask(Shutdown).await.map_err(|_| stopped())?;
        self.actor.wait_for_shutdown().await;
        Ok(())
    }
}

fn stopped() -> WebSocketError {
    WebSocketError::InvalidState("perpetual socket stopped".to_string())
}

impl fmt::Debug for PerpetualSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerpetualSocket")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("status", &self.status())
            .finish()
    }
}

pub struct PerpetualSocketBuilder {
    name: String,
    spawner: Arc<dyn ConnectionSpawner>,
    handler: Arc<dyn PerpetualHandler>,
    config: Option<PerpetualConfig>,
    initializer: Option<(Arc<dyn WsInitializer>, Duration)>,
}

impl PerpetualSocketBuilder {
    pub fn config(mut self, config: PerpetualConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Gate every connection behind `initializer` before it joins the rotation.
    pub fn initializer(mut self, initializer: impl WsInitializer, timeout: Duration) -> Self {
        self.initializer = Some((Arc::new(initializer), timeout));
        self
    }

    /// Validate the configuration and start connecting.
    pub fn start(self) -> WebSocketResult<PerpetualSocket> {
        let config = self.config.ok_or_else(|| {
            WebSocketError::InvalidConfig("perpetual socket needs a shift duration".to_string())
        })?;
        config.validate()?;
        if let Some((_, timeout)) = &self.initializer {
            if timeout.is_zero() {
                return Err(WebSocketError::InvalidConfig(
                    "initialization timeout must be positive".to_string(),
                ));
            }
        }

        let (status, _) = watch::channel(PerpetualStatus::Disconnected);
        let (primary, _) = watch::channel(None);
        let shared = Arc::new(PerpetualShared {
            id: NEXT_PERPETUAL_ID.fetch_add(1, Ordering::Relaxed),
            name: self.name,
            status,
            primary,
        });
        let actor = PerpetualSocketActor::spawn_with_mailbox(
            PerpetualArgs {
                shared: Arc::clone(&shared),
                config,
                handler: self.handler,
                spawner: self.spawner,
                initializer: self.initializer,
            },
            mailbox::unbounded(),
        );
        actor.tell(Start).try_send().map_err(|_| stopped())?;
        Ok(PerpetualSocket { shared, actor })
    }
}

/// Run an application callback, logging and swallowing a panic.
pub(crate) fn guarded(socket: &PerpetualSocket, callback: &'static str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!(
            socket = %socket.name(),
            id = socket.id(),
            callback,
            "perpetual socket callback panicked"
        );
    }
}
