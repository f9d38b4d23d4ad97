use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, accept_async_with_config as tungstenite_accept,
    connect_async as tungstenite_connect, tungstenite::client::IntoClientRequest,
};

use crate::core::{ConnectTarget, WebSocketBufferConfig, WebSocketError, WsFrame};
use crate::transport::tungstenite::{
    TungsteniteReader, TungsteniteWriter, frame_to_msg, install_rustls_crypto_provider,
    map_ws_error, msg_to_frame, split_stream, websocket_config,
};

/// Thin wrapper around a websocket stream that hides tungstenite types.
///
/// Useful on its own for tests and small tools; [`WsClient::into_split`] hands the halves to
/// [`crate::ws::ConnectionFactory::attach`].
pub struct WsClient {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    pub async fn send(&mut self, frame: WsFrame) -> Result<(), WebSocketError> {
        self.inner
            .send(frame_to_msg(frame))
            .await
            .map_err(|e| map_ws_error("write", e))
    }

    pub async fn next(&mut self) -> Option<Result<WsFrame, WebSocketError>> {
        StreamExt::next(&mut self.inner)
            .await
            .map(|res| res.map(msg_to_frame).map_err(|e| map_ws_error("read", e)))
    }

    pub fn into_split(self) -> (TungsteniteReader, TungsteniteWriter) {
        split_stream(self.inner)
    }
}

impl Stream for WsClient {
    type Item = Result<WsFrame, WebSocketError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(msg))) => Poll::Ready(Some(Ok(msg_to_frame(msg)))),
            Poll::Ready(Some(Err(err))) => Poll::Ready(Some(Err(map_ws_error("read", err)))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Sink<WsFrame> for WsClient {
    type Error = WebSocketError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_ready(cx)
            .map_err(|e| map_ws_error("write", e))
    }

    fn start_send(mut self: Pin<&mut Self>, item: WsFrame) -> Result<(), Self::Error> {
        Pin::new(&mut self.inner)
            .start_send(frame_to_msg(item))
            .map_err(|e| map_ws_error("write", e))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_flush(cx)
            .map_err(|e| map_ws_error("write", e))
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_close(cx)
            .map_err(|e| map_ws_error("write", e))
    }
}

/// Connect to a websocket URL using default configuration.
pub async fn connect_async(url: impl AsRef<str>) -> Result<WsClient, WebSocketError> {
    connect_target(ConnectTarget::new(url.as_ref())).await
}

/// Connect with the target's extra request headers.
pub async fn connect_target(target: ConnectTarget) -> Result<WsClient, WebSocketError> {
    install_rustls_crypto_provider();
    let mut request = target
        .url
        .as_str()
        .into_client_request()
        .map_err(|err| WebSocketError::ConnectionFailed(err.to_string()))?;
    request.headers_mut().extend(target.headers);
    let (stream, _) = tungstenite_connect(request)
        .await
        .map_err(|err| WebSocketError::ConnectionFailed(err.to_string()))?;
    Ok(WsClient { inner: stream })
}

/// Accept an incoming websocket connection.
pub async fn accept_async(stream: TcpStream) -> Result<WsClient, WebSocketError> {
    accept_async_with_buffers(stream, WebSocketBufferConfig::default()).await
}

pub async fn accept_async_with_buffers(
    stream: TcpStream,
    buffers: WebSocketBufferConfig,
) -> Result<WsClient, WebSocketError> {
    let ws = tungstenite_accept(MaybeTlsStream::Plain(stream), Some(websocket_config(buffers)))
        .await
        .map_err(|err| WebSocketError::ConnectionFailed(err.to_string()))?;
    Ok(WsClient { inner: ws })
}
