//! Transport module - TCP connection and the per-connection reader task.

mod tcp;

pub use tcp::Endpoint;

pub(crate) use tcp::{connect, spawn_reader};
