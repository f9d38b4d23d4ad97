//! Kameo-based WebSocket connections with staged handler chains, initialization handshakes and
//! perpetual sockets that rotate their physical connection without losing messages.

pub mod client;
pub mod core;
pub mod perpetual;
pub mod testing;
pub mod transport;
pub mod ws;

pub use core::{
    ConnectTarget, ConnectionConfig, JsonCodec, PerpetualConfig, WebSocketError, WebSocketResult,
    WsFrame, WsOutbound, WsPayload,
};
pub use perpetual::{
    ClientConnector, ConnectionSpawner, PerpetualHandler, PerpetualSocket, PerpetualStatus,
};
pub use ws::{
    Completion, ConnectionFactory, FnHandler, HandlerChain, Initialization, WebSocket,
    WebSocketCollection, WsHandler, WsInitializer, initializable,
};
