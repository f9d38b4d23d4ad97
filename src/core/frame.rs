use std::any::Any;
use std::fmt;

use bytes::Bytes;

/// Transport-neutral websocket frame type.
///
/// Transports convert their native frame representation into/from `WsFrame`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WsFrame {
    Text(Bytes),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<WsCloseFrame>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WsCloseFrame {
    pub code: u16,
    pub reason: Bytes,
}

impl WsCloseFrame {
    pub fn reason_lossy(&self) -> String {
        String::from_utf8_lossy(self.reason.as_ref()).into_owned()
    }
}

impl WsFrame {
    #[inline]
    pub fn text_static(s: &'static str) -> Self {
        Self::Text(Bytes::from_static(s.as_bytes()))
    }

    #[inline]
    pub fn close(code: u16, reason: impl Into<Bytes>) -> Self {
        Self::Close(Some(WsCloseFrame {
            code,
            reason: reason.into(),
        }))
    }
}

/// Borrow the underlying bytes from frames without allocation.
#[inline]
pub fn frame_bytes(frame: &WsFrame) -> Option<&[u8]> {
    match frame {
        WsFrame::Text(bytes) => Some(bytes.as_ref()),
        WsFrame::Binary(bytes) => Some(bytes.as_ref()),
        WsFrame::Ping(bytes) => Some(bytes.as_ref()),
        WsFrame::Pong(bytes) => Some(bytes.as_ref()),
        WsFrame::Close(_) => None,
    }
}

/// A complete application message as seen by handler stages: text or binary, never a control
/// frame.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum WsPayload {
    Text(String),
    Binary(Bytes),
}

impl WsPayload {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            WsPayload::Text(text) => Some(text.as_str()),
            WsPayload::Binary(_) => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            WsPayload::Text(text) => text.as_bytes(),
            WsPayload::Binary(bytes) => bytes.as_ref(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    /// Convert a data frame into a payload. Control frames yield `None`; text frames that are
    /// not valid UTF-8 are surfaced as binary.
    pub fn from_frame(frame: WsFrame) -> Option<Self> {
        match frame {
            WsFrame::Text(bytes) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => Some(WsPayload::Text(text)),
                Err(_) => Some(WsPayload::Binary(bytes)),
            },
            WsFrame::Binary(bytes) => Some(WsPayload::Binary(bytes)),
            _ => None,
        }
    }

    pub fn into_frame(self) -> WsFrame {
        match self {
            WsPayload::Text(text) => WsFrame::Text(Bytes::from(text)),
            WsPayload::Binary(bytes) => WsFrame::Binary(bytes),
        }
    }
}

impl fmt::Display for WsPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WsPayload::Text(text) => f.write_str(text),
            WsPayload::Binary(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

impl From<String> for WsPayload {
    fn from(value: String) -> Self {
        WsPayload::Text(value)
    }
}

impl From<&str> for WsPayload {
    fn from(value: &str) -> Self {
        WsPayload::Text(value.to_string())
    }
}

impl From<Bytes> for WsPayload {
    fn from(value: Bytes) -> Self {
        WsPayload::Binary(value)
    }
}

impl From<Vec<u8>> for WsPayload {
    fn from(value: Vec<u8>) -> Self {
        WsPayload::Binary(Bytes::from(value))
    }
}

/// Something the application wants to send: either an already encoded payload, or an
/// application object that the active stage's serializer must encode.
pub enum WsOutbound {
    Payload(WsPayload),
    Object(Box<dyn Any + Send>),
}

impl WsOutbound {
    pub fn object<T: Any + Send>(value: T) -> Self {
        WsOutbound::Object(Box::new(value))
    }
}

impl fmt::Debug for WsOutbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WsOutbound::Payload(payload) => f.debug_tuple("Payload").field(payload).finish(),
            WsOutbound::Object(_) => f.write_str("Object(..)"),
        }
    }
}

impl From<WsPayload> for WsOutbound {
    fn from(value: WsPayload) -> Self {
        WsOutbound::Payload(value)
    }
}

macro_rules! outbound_from_payload {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for WsOutbound {
                fn from(value: $ty) -> Self {
                    WsOutbound::Payload(WsPayload::from(value))
                }
            }
        )*
    };
}

outbound_from_payload!(String, &str, Bytes, Vec<u8>);
