//! Outbound send queue.
//!
//! All send-initiating calls funnel into one ordered queue; frames leave it
//! for the connection writer in exactly enqueue order. While the transport
//! is down, frames simply accumulate here — a later connect + authenticate
//! cycle flushes them — unless their per-message timeout expires first, in
//! which case the frame is dropped unwritten and its completion fires with
//! a send-timeout error.
//!
//! Each frame's completion is owned by the queue until the frame is either
//! written or timed out; whichever path takes the completion out of the map
//! first is the only one that fires it.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::error::Result;
use crate::rpc::CallReply;

/// What to do once a frame's hand-off to the transport settles.
pub(crate) enum OnSent {
    /// Fire-and-forget; a failure only reaches the error channel.
    Forget,
    /// Resolve the caller once the frame is written (write/publish/whisper).
    Complete(oneshot::Sender<Result<()>>),
    /// Register a pending rpc call once the frame is written.
    Call {
        action_id: u64,
        timeout: Duration,
        reply: CallReply,
    },
}

/// Ordered outbound queue plus the per-message completion map.
#[derive(Default)]
pub(crate) struct SendQueue {
    frames: VecDeque<(u64, Bytes)>,
    pending: HashMap<u64, OnSent>,
}

impl SendQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a frame and take ownership of its completion.
    pub(crate) fn push(&mut self, message_id: u64, frame: Bytes, on_sent: OnSent) {
        self.pending.insert(message_id, on_sent);
        self.frames.push_back((message_id, frame));
    }

    /// Track a completion for a frame handed straight to the writer,
    /// bypassing the queue (connection handshake traffic).
    pub(crate) fn push_inflight(&mut self, message_id: u64, on_sent: OnSent) {
        self.pending.insert(message_id, on_sent);
    }

    /// Next frame to hand to the writer. The completion stays in the map
    /// until the writer confirms the write.
    pub(crate) fn pop_front(&mut self) -> Option<(u64, Bytes)> {
        self.frames.pop_front()
    }

    /// Put a frame back at the head after a refused hand-off.
    pub(crate) fn push_front(&mut self, message_id: u64, frame: Bytes) {
        self.frames.push_front((message_id, frame));
    }

    /// Take the completion for a written frame. `None` if the send timeout
    /// already claimed it.
    pub(crate) fn complete(&mut self, message_id: u64) -> Option<OnSent> {
        self.pending.remove(&message_id)
    }

    /// Send timeout fired: drop the frame if it is still queued and take
    /// the completion. `None` if the write already claimed it.
    pub(crate) fn expire(&mut self, message_id: u64) -> Option<OnSent> {
        let on_sent = self.pending.remove(&message_id)?;
        self.frames.retain(|(id, _)| *id != message_id);
        Some(on_sent)
    }

    /// Drain every completion, queued or in flight, in no particular order.
    pub(crate) fn drain_all(&mut self) -> Vec<OnSent> {
        self.frames.clear();
        self.pending.drain().map(|(_, on_sent)| on_sent).collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[cfg(test)]
    fn queued(&self) -> usize {
        self.frames.len()
    }
}
