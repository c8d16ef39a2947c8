//! Codec module - turning messages into wire frames and back.
//!
//! The engine treats the byte-level codec as a collaborator behind the
//! [`MessageCodec`] trait: it encodes a header/body pair into one wire
//! frame, decodes the two halves back out, and splits an accumulated
//! receive buffer into complete frames plus the unterminated remainder.
//! Implementations own the frame boundary scheme (and any encryption);
//! the engine never inspects frame bytes itself.
//!
//! [`JsonCodec`] is the default: delimiter-framed JSON text.

mod json;

use bytes::Bytes;
use serde_json::Value;

use crate::protocol::{Header, Message};

pub use json::JsonCodec;

/// Contract the engine requires from a codec.
pub trait MessageCodec: Send + Sync + 'static {
    /// Encode a message into one wire frame.
    ///
    /// `None` means the codec refused to encode; the send is aborted with
    /// an encode failure.
    fn make_message(&self, message: &Message) -> Option<Bytes>;

    /// Decode the header of a complete frame. `None` marks the frame as
    /// protocol garbage.
    fn get_header(&self, frame: &[u8]) -> Option<Header>;

    /// Decode the body of a complete frame.
    fn get_body(&self, frame: &[u8]) -> Option<Value>;

    /// Split a receive buffer into complete frames, in order, plus the
    /// trailing unterminated remainder (empty when the buffer ended on a
    /// frame boundary).
    fn split_messages(&self, buffer: &[u8]) -> (Vec<Bytes>, Bytes);
}
