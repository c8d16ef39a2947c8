//! Delimiter-framed JSON codec.
//!
//! One frame is the header as a JSON object, `\r\n`, the body as a JSON
//! value, terminated by `\r\n\r\n`. serde_json escapes control characters
//! inside strings, so neither delimiter can occur within the serialized
//! halves and a byte scan is enough to find frame boundaries.

use bytes::Bytes;
use serde_json::Value;

use super::MessageCodec;
use crate::protocol::{Header, Message};

/// Separator between the header and body halves of one frame.
const PART_DELIMITER: &[u8] = b"\r\n";

/// Terminator of a complete frame.
const FRAME_DELIMITER: &[u8] = b"\r\n\r\n";

/// The default Herald codec: JSON header + JSON body, CRLF-framed.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn new() -> Self {
        Self
    }
}

/// Find the first occurrence of `needle` in `haystack` at or after `from`.
fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

impl MessageCodec for JsonCodec {
    fn make_message(&self, message: &Message) -> Option<Bytes> {
        let header = serde_json::to_vec(&message.header).ok()?;
        let body = serde_json::to_vec(&message.body).ok()?;

        let mut frame = Vec::with_capacity(
            header.len() + PART_DELIMITER.len() + body.len() + FRAME_DELIMITER.len(),
        );
        frame.extend_from_slice(&header);
        frame.extend_from_slice(PART_DELIMITER);
        frame.extend_from_slice(&body);
        frame.extend_from_slice(FRAME_DELIMITER);
        Some(Bytes::from(frame))
    }

    fn get_header(&self, frame: &[u8]) -> Option<Header> {
        let end = find(frame, PART_DELIMITER, 0).unwrap_or(frame.len());
        serde_json::from_slice(&frame[..end]).ok()
    }

    fn get_body(&self, frame: &[u8]) -> Option<Value> {
        let start = find(frame, PART_DELIMITER, 0)? + PART_DELIMITER.len();
        serde_json::from_slice(&frame[start..]).ok()
    }

    fn split_messages(&self, buffer: &[u8]) -> (Vec<Bytes>, Bytes) {
        let mut frames = Vec::new();
        let mut start = 0;

        while let Some(end) = find(buffer, FRAME_DELIMITER, start) {
            frames.push(Bytes::copy_from_slice(&buffer[start..end]));
            start = end + FRAME_DELIMITER.len();
        }

        (frames, Bytes::copy_from_slice(&buffer[start..]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Route, DEFAULT_RETRY, DEFAULT_TIMEOUT_MS};
    use serde_json::json;

    fn message(event: &str, body: Value) -> Message {
        Message::new(
            Header {
                name: "app".into(),
                uid: "app_1".into(),
                message_id: 1,
                ack: None,
                retry: DEFAULT_RETRY,
                timeout: DEFAULT_TIMEOUT_MS,
                route: Route::Event {
                    event: event.into(),
                },
            },
            body,
        )
    }

    #[test]
    fn test_make_then_decode() {
        let codec = JsonCodec::new();
        let msg = message("alerts", json!({"level": "high"}));

        let frame = codec.make_message(&msg).unwrap();
        assert!(frame.ends_with(FRAME_DELIMITER));

        let (frames, rest) = codec.split_messages(&frame);
        assert_eq!(frames.len(), 1);
        assert!(rest.is_empty());

        assert_eq!(codec.get_header(&frames[0]).unwrap(), msg.header);
        assert_eq!(codec.get_body(&frames[0]).unwrap(), msg.body);
    }

    #[test]
    fn test_split_batch_preserves_order() {
        let codec = JsonCodec::new();
        let mut wire = Vec::new();
        for i in 0..4 {
            let frame = codec
                .make_message(&message(&format!("e{i}"), json!(i)))
                .unwrap();
            wire.extend_from_slice(&frame);
        }

        let (frames, rest) = codec.split_messages(&wire);
        assert_eq!(frames.len(), 4);
        assert!(rest.is_empty());
        for (i, frame) in frames.iter().enumerate() {
            let header = codec.get_header(frame).unwrap();
            assert_eq!(header.route.event(), Some(format!("e{i}").as_str()));
        }
    }

    #[test]
    fn test_split_keeps_partial_remainder() {
        let codec = JsonCodec::new();
        let frame = codec.make_message(&message("x", json!(null))).unwrap();
        let cut = frame.len() - 3;

        let (frames, rest) = codec.split_messages(&frame[..cut]);
        assert!(frames.is_empty());
        assert_eq!(&rest[..], &frame[..cut]);
    }

    #[test]
    fn test_split_empty_buffer() {
        let codec = JsonCodec::new();
        let (frames, rest) = codec.split_messages(b"");
        assert!(frames.is_empty());
        assert!(rest.is_empty());
    }

    #[test]
    fn test_garbage_frame_yields_no_header() {
        let codec = JsonCodec::new();
        assert!(codec.get_header(b"not json\r\nnull").is_none());
        assert!(codec.get_header(b"").is_none());
    }

    #[test]
    fn test_delimiter_safe_inside_strings() {
        // CRLF inside a body string must be escaped, not framed.
        let codec = JsonCodec::new();
        let msg = message("raw", json!("line one\r\n\r\nline two"));
        let frame = codec.make_message(&msg).unwrap();

        let (frames, rest) = codec.split_messages(&frame);
        assert_eq!(frames.len(), 1);
        assert!(rest.is_empty());
        assert_eq!(codec.get_body(&frames[0]).unwrap(), msg.body);
    }

    #[test]
    fn test_body_missing_part_delimiter() {
        let codec = JsonCodec::new();
        assert!(codec.get_body(b"{\"just\":\"header\"}").is_none());
    }
}
