//! Overlap deduplication for rotating connections.
//!
//! While two physical connections of one logical socket overlap, the same message may arrive on
//! both. The deduplicator remembers which connection saw a message first and only lets that
//! connection deliver it.

use std::collections::BTreeMap;
use std::hash::{DefaultHasher, Hash, Hasher};

use super::frame::WsPayload;

#[derive(Debug, Default)]
pub struct MessageDeduplicator {
    text: BTreeMap<String, u64>,
    binary: BTreeMap<u64, u64>,
}

impl MessageDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `payload` as seen on `connection_id`.
    ///
    /// Returns `true` when the payload was never seen before or was first seen on this same
    /// connection, i.e. when the caller should deliver it.
    pub fn accept(&mut self, payload: &WsPayload, connection_id: u64) -> bool {
        let recorder = match payload {
            WsPayload::Text(text) => match self.text.get(text.as_str()) {
                Some(recorder) => *recorder,
                None => {
                    self.text.insert(text.clone(), connection_id);
                    connection_id
                }
            },
            WsPayload::Binary(bytes) => *self
                .binary
                .entry(binary_key(bytes.as_ref()))
                .or_insert(connection_id),
        };
        recorder == connection_id
    }

    pub fn reset(&mut self) {
        self.text.clear();
        self.binary.clear();
    }

    pub fn len(&self) -> usize {
        self.text.len() + self.binary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.binary.is_empty()
    }
}

/// Length in the high half, content hash in the low half. Distinct payloads can collide.
pub fn binary_key(bytes: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    let hash = hasher.finish() as u32;
    ((bytes.len() as u64) << 32) | u64::from(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn first_recorder_keeps_delivering() {
        let mut dedup = MessageDeduplicator::new();
        let msg = WsPayload::from("tick");

        assert!(dedup.accept(&msg, 1));
        assert!(!dedup.accept(&msg, 2));
        assert!(dedup.accept(&msg, 1));
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn binary_payloads_are_keyed_by_length_and_hash() {
        let mut dedup = MessageDeduplicator::new();
        let a = WsPayload::Binary(Bytes::from_static(b"\x01\x02\x03"));
        let b = WsPayload::Binary(Bytes::from_static(b"\x01\x02\x04"));

        assert!(dedup.accept(&a, 7));
        assert!(!dedup.accept(&a.clone(), 8));
        assert!(dedup.accept(&b, 8));
        assert_eq!(binary_key(b"abc") >> 32, 3);
    }

    #[test]
    fn reset_forgets_recorders() {
        let mut dedup = MessageDeduplicator::new();
        let msg = WsPayload::from("tick");
        assert!(dedup.accept(&msg, 1));
        dedup.reset();
        assert!(dedup.is_empty());
        assert!(dedup.accept(&msg, 2));
    }

    #[test]
    fn text_and_binary_with_same_bytes_are_distinct() {
        let mut dedup = MessageDeduplicator::new();
        assert!(dedup.accept(&WsPayload::from("abc"), 1));
        assert!(dedup.accept(&WsPayload::Binary(Bytes::from_static(b"abc")), 2));
    }
}
