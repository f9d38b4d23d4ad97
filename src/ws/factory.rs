use futures_util::{Sink, Stream};
use tracing::{debug, warn};

use super::connection::{BoxWsReader, BoxWsWriter, ConnectionActor, Open, WebSocket};
use super::handler::HandlerChain;
use crate::core::{ConnectRequest, ConnectTarget, ConnectionConfig, WebSocketError, WebSocketResult, WsFrame};
use crate::transport::WsTransport;
use crate::transport::tungstenite::TungsteniteTransport;

/// Creates connections over a transport.
#[derive(Clone, Default)]
pub struct ConnectionFactory<T: WsTransport = TungsteniteTransport> {
    transport: T,
}

impl<T: WsTransport> ConnectionFactory<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Start connecting to `target` and return the handle immediately.
    ///
    /// The connection opens once the transport is established. If it never is, the handle closes
    /// with [`WebSocketError::CreationFailed`] and no stage callback fires.
    pub fn connect(
        &self,
        name: impl Into<String>,
        target: ConnectTarget,
        config: ConnectionConfig,
        chain: HandlerChain,
    ) -> WebSocketResult<WebSocket> {
        config.validate()?;
        let request = ConnectRequest {
            target: target.clone(),
            buffers: config.buffers,
            tls: config.tls,
            timeout: config.connect_timeout,
        };
        let ws = ConnectionActor::spawn_for(name.into(), target, config, chain);
        debug!(connection = %ws.name(), id = ws.id(), url = %ws.target().url, "connecting websocket");

        let transport = self.transport.clone();
        let handle = ws.clone();
        tokio::spawn(async move {
            match transport.connect(request).await {
                Ok((reader, writer)) => {
                    let open = Open {
                        reader: Box::pin(reader),
                        writer: Box::pin(writer),
                    };
                    if handle.actor().tell(open).send().await.is_err() {
                        debug!(connection = %handle.name(), id = handle.id(), "connection stopped before transport opened");
                    }
                }
                Err(err) => {
                    warn!(connection = %handle.name(), id = handle.id(), error = %err, "websocket connect failed");
                    handle.close(WebSocketError::CreationFailed(err.to_string()));
                }
            }
        });
        Ok(ws)
    }

    /// Adopt an already established socket, e.g. one accepted by a server.
    pub async fn attach<R, W>(
        &self,
        name: impl Into<String>,
        target: ConnectTarget,
        config: ConnectionConfig,
        chain: HandlerChain,
        reader: R,
        writer: W,
    ) -> WebSocketResult<WebSocket>
    where
        R: Stream<Item = Result<WsFrame, WebSocketError>> + Send + 'static,
        W: Sink<WsFrame, Error = WebSocketError> + Send + 'static,
    {
        config.validate()?;
        let ws = ConnectionActor::spawn_for(name.into(), target, config, chain);
        let reader: BoxWsReader = Box::pin(reader);
        let writer: BoxWsWriter = Box::pin(writer);
        ws.actor()
            .tell(Open { reader, writer })
            .send()
            .await
            .map_err(|_| WebSocketError::CreationFailed("connection actor stopped".to_string()))?;
        Ok(ws)
    }
}
