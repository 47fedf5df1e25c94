//! Test fixture builders

use bytes::Bytes;

use crate::kafka::envelope::{Envelope, Headers};

/// Envelope at `topic[partition]@offset` with key `key-{offset}`
pub fn envelope(topic: &str, partition: i32, offset: i64, value: &[u8]) -> Envelope {
    Envelope {
        key: Some(Bytes::from(format!("key-{}", offset))),
        value: Bytes::copy_from_slice(value),
        headers: Headers::new(),
        topic: topic.to_string(),
        partition,
        offset,
    }
}

/// Envelope whose value is UTF-8 text
pub fn text_envelope(topic: &str, partition: i32, offset: i64, text: &str) -> Envelope {
    envelope(topic, partition, offset, text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_fixture() {
        let e = text_envelope("orders", 3, 12, "hello");
        assert_eq!(e.key_str(), Some("key-12"));
        assert_eq!(e.value.as_ref(), b"hello");
        assert_eq!((e.partition, e.offset), (3, 12));
    }
}
