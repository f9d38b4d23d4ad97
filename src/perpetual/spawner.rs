use std::sync::Arc;

use crate::core::{ConnectTarget, ConnectionConfig, WebSocketResult};
use crate::transport::WsTransport;
use crate::transport::tungstenite::TungsteniteTransport;
use crate::ws::{ConnectionFactory, HandlerChain, WebSocket, WsHandler};

/// Opens the physical connections behind a perpetual socket.
pub trait ConnectionSpawner: Send + Sync + 'static {
    /// Start a connection whose handler chain ends with `tail`.
    fn spawn(&self, name: &str, tail: Arc<dyn WsHandler>) -> WebSocketResult<WebSocket>;
}

type TargetFn = Arc<dyn Fn() -> ConnectTarget + Send + Sync>;

/// Client-side spawner. The target is re-evaluated for every connection so headers such as auth
/// tokens can change between rotations.
pub struct ClientConnector<T: WsTransport = TungsteniteTransport> {
    factory: ConnectionFactory<T>,
    target: TargetFn,
    config: ConnectionConfig,
    stages: Vec<Arc<dyn WsHandler>>,
}

impl<T: WsTransport> ClientConnector<T> {
    pub fn new(
        factory: ConnectionFactory<T>,
        target: impl Fn() -> ConnectTarget + Send + Sync + 'static,
    ) -> Self {
        Self {
            factory,
            target: Arc::new(target),
            config: ConnectionConfig::default(),
            stages: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a stage that runs before the perpetual socket sees the connection.
    pub fn with_stage(mut self, stage: Arc<dyn WsHandler>) -> Self {
        self.stages.push(stage);
        self
    }
}

impl<T: WsTransport> ConnectionSpawner for ClientConnector<T> {
    fn spawn(&self, name: &str, tail: Arc<dyn WsHandler>) -> WebSocketResult<WebSocket> {
        let mut stages = self.stages.clone();
        stages.push(tail);
        let chain = HandlerChain::new(stages)?;
        self.factory
            .connect(name, (self.target)(), self.config, chain)
    }
}
