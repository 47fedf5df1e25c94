//! Wire envelope types
//!
//! An [`Envelope`] is the record as it travels between the broker and this
//! crate: opaque key/value bytes, ordered headers and the position the broker
//! assigned. Envelopes are immutable once built.

use bytes::Bytes;

/// Ordered header list (string key -> byte value)
///
/// Kafka headers allow duplicate keys and preserve insertion order, so this is
/// a list rather than a map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, Bytes)>,
}

impl Headers {
    /// Create an empty header list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header with a raw byte value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Bytes>) {
        self.entries.push((key.into(), value.into()));
    }

    /// Append a header whose value is the UTF-8 encoding of `value`
    pub fn insert_str(&mut self, key: impl Into<String>, value: &str) {
        self.insert(key, Bytes::copy_from_slice(value.as_bytes()));
    }

    /// Builder-style [`Headers::insert_str`]
    pub fn with_str(mut self, key: impl Into<String>, value: &str) -> Self {
        self.insert_str(key, value);
        self
    }

    /// First value stored under `key`
    pub fn get(&self, key: &str) -> Option<&Bytes> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// First value stored under `key`, decoded as UTF-8
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Iterate headers in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bytes)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Append every header of `other`, keeping order
    pub fn extend(&mut self, other: &Headers) {
        self.entries.extend(other.entries.iter().cloned());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: AsRef<str>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.insert_str(k, v.as_ref());
        }
        headers
    }
}

/// A record on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Message key (None = null key)
    pub key: Option<Bytes>,
    /// Codec-produced value bytes
    pub value: Bytes,
    /// Ordered headers
    pub headers: Headers,
    /// Topic name
    pub topic: String,
    /// Partition the broker placed the record in
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
}

impl Envelope {
    /// Key decoded as UTF-8, if present and valid
    pub fn key_str(&self) -> Option<&str> {
        self.key.as_ref().and_then(|k| std::str::from_utf8(k).ok())
    }

    /// Offset the consumer resumes from once this record is resolved
    pub fn next_offset(&self) -> i64 {
        self.offset + 1
    }
}

/// A message handed to the producer before the broker has placed it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub key: Option<Bytes>,
    pub value: Bytes,
    pub headers: Headers,
    /// Explicit partition (None = let the partitioner decide)
    pub partition: Option<i32>,
}

impl OutboundMessage {
    /// Create a message with a value and no key
    pub fn new(topic: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            value: value.into(),
            headers: Headers::new(),
            partition: None,
        }
    }

    /// Set the key
    pub fn key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set a UTF-8 key
    pub fn key_str(self, key: &str) -> Self {
        self.key(Bytes::copy_from_slice(key.as_bytes()))
    }

    /// Pin the message to a partition
    pub fn partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    /// Replace the headers
    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }
}

/// A record escalated after exhausting its retry budget or failing to decode
///
/// Emitted to a [`DeadLetterSink`](crate::kafka::consumer::DeadLetterSink);
/// never stored by this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterRecord {
    pub envelope: Envelope,
    pub reason: String,
    /// Redeliveries performed before escalation (0 for codec failures)
    pub attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_preserve_order_and_duplicates() {
        let mut headers = Headers::new();
        headers.insert_str("Application", "kafka-delivery");
        headers.insert_str("trace", "a");
        headers.insert_str("trace", "b");

        let keys: Vec<&str> = headers.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["Application", "trace", "trace"]);
        assert_eq!(headers.get_str("trace"), Some("a"));
        assert_eq!(headers.len(), 3);
    }

    #[test]
    fn test_headers_utf8_values() {
        let headers = Headers::new().with_str("HostName", "hôte-1");
        assert_eq!(
            headers.get("HostName").map(|v| v.to_vec()),
            Some("hôte-1".as_bytes().to_vec())
        );
        assert_eq!(headers.get_str("missing"), None);
    }

    #[test]
    fn test_headers_from_pairs() {
        let headers: Headers = vec![("a", "1"), ("b", "2")].into_iter().collect();
        assert_eq!(headers.get_str("b"), Some("2"));
        assert!(!headers.is_empty());
    }

    #[test]
    fn test_envelope_next_offset() {
        let envelope = Envelope {
            key: Some(Bytes::from_static(b"k")),
            value: Bytes::from_static(b"v"),
            headers: Headers::new(),
            topic: "t".to_string(),
            partition: 0,
            offset: 41,
        };
        assert_eq!(envelope.next_offset(), 42);
        assert_eq!(envelope.key_str(), Some("k"));
    }

    #[test]
    fn test_outbound_message_builder() {
        let msg = OutboundMessage::new("orders", "payload")
            .key_str("order-1")
            .partition(3)
            .headers(Headers::new().with_str("h", "v"));

        assert_eq!(msg.topic, "orders");
        assert_eq!(msg.key.as_deref(), Some(&b"order-1"[..]));
        assert_eq!(msg.partition, Some(3));
        assert_eq!(msg.headers.get_str("h"), Some("v"));
    }
}
