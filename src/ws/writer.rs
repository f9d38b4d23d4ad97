use std::ops::ControlFlow;

use futures_util::{Sink, SinkExt};
use kameo::error::{ActorStopReason, PanicError};
use kameo::actor::{ActorId, WeakActorRef};
use kameo::prelude::{Actor, ActorRef, Context, Message as KameoMessage};
use tracing::{debug, error};

use crate::core::{WebSocketError, WebSocketResult, WsFrame};

/// Writer actor that owns the transport sink and serializes writes.
pub struct WsWriterActor<W>
where
    W: Sink<WsFrame, Error = WebSocketError> + Send + Unpin + 'static,
{
    writer: W,
    label: String,
    closed: bool,
}

impl<W> WsWriterActor<W>
where
    W: Sink<WsFrame, Error = WebSocketError> + Send + Unpin + 'static,
{
    pub fn new(writer: W, label: impl Into<String>) -> Self {
        Self {
            writer,
            label: label.into(),
            closed: false,
        }
    }
}

impl<W> Actor for WsWriterActor<W>
where
    W: Sink<WsFrame, Error = WebSocketError> + Send + Unpin + 'static,
{
    type Args = Self;
    type Error = WebSocketError;

    fn name() -> &'static str {
        "WsWriterActor"
    }

    async fn on_start(args: Self::Args, _ctx: ActorRef<Self>) -> Result<Self, Self::Error> {
        Ok(args)
    }

    async fn on_panic(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        err: PanicError,
    ) -> Result<ControlFlow<ActorStopReason>, Self::Error> {
        error!(connection = %self.label, error = ?err, "WsWriterActor panicked");
        Ok(ControlFlow::Break(ActorStopReason::Panicked(err)))
    }

    /// The writer never outlives the connection it is linked to.
    async fn on_link_died(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        id: ActorId,
        reason: ActorStopReason,
    ) -> Result<ControlFlow<ActorStopReason>, Self::Error> {
        debug!(connection = %self.label, %id, "connection stopped; stopping writer");
        Ok(ControlFlow::Break(ActorStopReason::LinkDied {
            id,
            reason: Box::new(reason),
        }))
    }

    async fn on_stop(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        _reason: ActorStopReason,
    ) -> Result<(), Self::Error> {
        if !self.closed {
            self.closed = true;
            let _ = self.writer.close().await;
        }
        Ok(())
    }
}

/// Write one frame and flush it.
pub struct WriterWrite {
    pub frame: WsFrame,
}

impl<W> KameoMessage<WriterWrite> for WsWriterActor<W>
where
    W: Sink<WsFrame, Error = WebSocketError> + Send + Unpin + 'static,
{
    type Reply = WebSocketResult<()>;

    async fn handle(
        &mut self,
        msg: WriterWrite,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if self.closed {
            return Err(WebSocketError::InvalidState("writer closed".to_string()));
        }
        self.writer.send(msg.frame).await
    }
}

/// Send a close frame, then close the sink. Later writes fail.
pub struct WriterClose {
    pub frame: WsFrame,
}

impl<W> KameoMessage<WriterClose> for WsWriterActor<W>
where
    W: Sink<WsFrame, Error = WebSocketError> + Send + Unpin + 'static,
{
    type Reply = WebSocketResult<()>;

    async fn handle(
        &mut self,
        msg: WriterClose,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        debug!(connection = %self.label, "sending close frame");
        let sent = self.writer.send(msg.frame).await;
        let closed = self.writer.close().await;
        sent.and(closed)
    }
}
