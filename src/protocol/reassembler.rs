//! Frame reassembler for accumulating partial reads.
//!
//! Socket reads hand over arbitrary byte chunks; this buffer appends them
//! to a tail, asks the codec's splitter for complete frames and keeps the
//! unterminated remainder for the next read.
//!
//! If the tail outgrows [`MAX_TAIL_BYTES`] without completing a frame the
//! stream is desynchronized; the only safe recovery is to drop the tail
//! and let the next frame boundary resynchronize. Any message embedded in
//! the discarded tail is lost — there is no side channel to report it, so
//! the discard is logged at `warn` and that data loss is a documented edge
//! case of the protocol.

use bytes::{Bytes, BytesMut};
use std::sync::Arc;

use crate::codec::MessageCodec;

/// Cap on an unterminated tail before it is declared a desync (1 MiB).
pub const MAX_TAIL_BYTES: usize = 1_048_576;

/// Accumulates incoming chunks and extracts complete frames.
pub struct FrameReassembler {
    codec: Arc<dyn MessageCodec>,
    tail: BytesMut,
    max_tail: usize,
}

impl FrameReassembler {
    /// Create a reassembler with the default tail cap.
    pub fn new(codec: Arc<dyn MessageCodec>) -> Self {
        Self::with_max_tail(codec, MAX_TAIL_BYTES)
    }

    /// Create a reassembler with a custom tail cap.
    pub fn with_max_tail(codec: Arc<dyn MessageCodec>, max_tail: usize) -> Self {
        Self {
            codec,
            tail: BytesMut::new(),
            max_tail,
        }
    }

    /// Feed one chunk, returning every frame completed by it, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.tail.extend_from_slice(chunk);

        let (frames, rest) = self.codec.split_messages(&self.tail);
        self.tail.clear();
        self.tail.extend_from_slice(&rest);

        if self.tail.len() > self.max_tail {
            tracing::warn!(
                tail_bytes = self.tail.len(),
                cap = self.max_tail,
                "unterminated frame exceeded tail cap, discarding buffered bytes"
            );
            self.tail.clear();
        }

        frames
    }

    /// Number of buffered tail bytes.
    pub fn tail_len(&self) -> usize {
        self.tail.len()
    }
}
