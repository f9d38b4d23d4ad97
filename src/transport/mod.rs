use std::future::Future;
use std::pin::Pin;

use futures_util::{Sink, Stream};

use crate::core::{ConnectRequest, WebSocketError, WsFrame};

pub mod tungstenite;

pub type WsTransportConnectFuture<R, W> =
    Pin<Box<dyn Future<Output = Result<(R, W), WebSocketError>> + Send>>;

/// Transport boundary for websocket IO.
///
/// The read loop lives outside kameo; the connection actor owns state and policies and the
/// writer actor owns the sink.
pub trait WsTransport: Clone + Send + Sync + 'static {
    type Reader: Stream<Item = Result<WsFrame, WebSocketError>> + Send + Unpin + 'static;
    type Writer: Sink<WsFrame, Error = WebSocketError> + Send + Unpin + 'static;

    fn connect(&self, request: ConnectRequest)
    -> WsTransportConnectFuture<Self::Reader, Self::Writer>;
}
