//! RPC correlation table.
//!
//! Maps each outstanding `actionId` to the party waiting on it. An entry
//! is registered only after the call frame was actually written (hand-off
//! success) and is removed on the first completion — matching response,
//! response timeout, or close — so exactly one outcome is ever delivered
//! per call, regardless of how the response and the timer race.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::Result;

/// Who is waiting on a call's outcome.
#[derive(Debug)]
pub(crate) enum CallReply {
    /// A facade caller awaiting the result.
    Caller(oneshot::Sender<Result<Value>>),
    /// The engine's authorize call for one connection generation.
    Authorize { generation: u64 },
    /// A subscription replayed after reconnect; failures are only logged.
    Resubscribe { event: String },
}

/// Pending calls keyed by action id.
#[derive(Default)]
pub(crate) struct RpcTable {
    calls: HashMap<u64, CallReply>,
}

impl RpcTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a call after its frame was handed to the transport.
    pub(crate) fn register(&mut self, action_id: u64, reply: CallReply) {
        self.calls.insert(action_id, reply);
    }

    /// Take the waiter for a settled call. `None` when the other outcome
    /// already claimed it (or the id was never registered).
    pub(crate) fn complete(&mut self, action_id: u64) -> Option<CallReply> {
        self.calls.remove(&action_id)
    }

    /// Take every outstanding waiter (connection-collapse on close).
    pub(crate) fn drain_all(&mut self) -> Vec<CallReply> {
        self.calls.drain().map(|(_, reply)| reply).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.len()
    }
}
