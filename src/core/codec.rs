//! Serializer / deserializer contract used by handler stages.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::frame::WsPayload;
use super::types::{WebSocketError, WebSocketResult};

/// Encodes application objects into payloads before they reach the wire.
pub trait WsSerializer: Send + Sync + 'static {
    fn serialize(&self, value: &(dyn Any + Send)) -> WebSocketResult<WsPayload>;
}

/// Decodes inbound payloads into application objects.
pub trait WsDeserializer: Send + Sync + 'static {
    fn deserialize(&self, payload: &WsPayload) -> WebSocketResult<Box<dyn Any + Send>>;
}

/// JSON codec for a single message type `T`, backed by `sonic-rs`.
///
/// Serializing accepts `T` itself; anything else is rejected. Text and binary payloads both
/// deserialize as JSON.
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    pub fn encode(&self, value: &T) -> WebSocketResult<WsPayload> {
        sonic_rs::to_string(value)
            .map(WsPayload::Text)
            .map_err(|err| WebSocketError::Serialization(err.to_string()))
    }

    pub fn decode(&self, payload: &WsPayload) -> WebSocketResult<T> {
        sonic_rs::from_slice(payload.as_bytes())
            .map_err(|err| WebSocketError::Serialization(err.to_string()))
    }
}

impl<T> Default for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonCodec")
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> WsSerializer for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    fn serialize(&self, value: &(dyn Any + Send)) -> WebSocketResult<WsPayload> {
        let value = value.downcast_ref::<T>().ok_or_else(|| {
            WebSocketError::Serialization(format!(
                "expected {}, got another type",
                std::any::type_name::<T>()
            ))
        })?;
        self.encode(value)
    }
}

impl<T> WsDeserializer for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    fn deserialize(&self, payload: &WsPayload) -> WebSocketResult<Box<dyn Any + Send>> {
        self.decode(payload)
            .map(|value| Box::new(value) as Box<dyn Any + Send>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Subscribe {
        op: String,
        args: Vec<String>,
    }

    #[test]
    fn serializes_matching_type_only() {
        let codec = JsonCodec::<Subscribe>::new();
        let msg = Subscribe {
            op: "subscribe".to_string(),
            args: vec!["trades".to_string()],
        };
        let payload = codec.serialize(&msg).unwrap();
        assert_eq!(
            payload.as_text(),
            Some(r#"{"op":"subscribe","args":["trades"]}"#)
        );

        let err = codec.serialize(&42u32).unwrap_err();
        assert!(matches!(err, WebSocketError::Serialization(_)));
    }

    #[test]
    fn deserializes_text_payload() {
        let codec = JsonCodec::<Subscribe>::new();
        let decoded = codec
            .deserialize(&WsPayload::from(r#"{"op":"ping","args":[]}"#))
            .unwrap();
        let decoded = decoded.downcast::<Subscribe>().unwrap();
        assert_eq!(decoded.op, "ping");
        assert!(codec.decode(&WsPayload::from("not json")).is_err());
    }
}
