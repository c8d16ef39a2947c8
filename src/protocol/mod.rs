//! Protocol module - headers, routing, messages, and frame reassembly.

mod header;
mod identity;
mod message;
mod reassembler;

pub use header::{Header, Route, DEFAULT_RETRY, DEFAULT_TIMEOUT_MS};
pub use identity::Identity;
pub use message::{
    CallBody, Message, ResultBody, ACTION_AUTHORIZE, ACTION_PING, ACTION_SUBSCRIBE,
    ACTION_UNSUBSCRIBE, BROKER_NAME, EVENT_PONG,
};
pub use reassembler::{FrameReassembler, MAX_TAIL_BYTES};
