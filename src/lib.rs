//! # herald-client
//!
//! Client engine for the Herald pub/sub + RPC messaging protocol.
//!
//! Many independent processes connect to a central broker over TCP; this
//! crate lets an application call named actions on other peers, publish
//! and subscribe to named events, and answer inbound calls — all
//! multiplexed over one connection with automatic reconnection.
//!
//! ## Architecture
//!
//! - **Codec** ([`codec`]): encodes header/body pairs into wire frames and
//!   splits the receive stream back into them. JSON-framed by default,
//!   pluggable via [`codec::MessageCodec`].
//! - **Engine** (internal): one task per client owning the connection
//!   state machine, the ordered outbound queue and the rpc correlation
//!   table. Per-connection reader/writer tasks feed it events.
//! - **Facade** ([`HeraldClient`]): cheap-to-clone handle exposing
//!   connect/close, rpc, publish/whisper, subscribe and worker
//!   registration.
//!
//! ## Example
//!
//! ```ignore
//! use herald_client::{ActionCall, HeraldClient, Options};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> herald_client::Result<()> {
//!     let client = HeraldClient::builder().name("sensor").start();
//!     client.wait_connected().await;
//!
//!     client
//!         .subscribe("config-changed", |sender, body| {
//!             println!("{sender}: {body}");
//!         })
//!         .await?;
//!
//!     client.publish("boot", json!({"version": 3})).await?;
//!
//!     let reply = client
//!         .rpc("storage", ActionCall::new("get", json!({"key": "mode"})), Options::default())
//!         .await?;
//!     println!("mode = {reply}");
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod error;
pub mod protocol;
pub mod transport;

mod client;
mod conn;
mod queue;
mod rpc;
mod subscription;
mod worker;
mod writer;

pub use client::{
    ActionCall, ClientBuilder, HeraldClient, Options, DEFAULT_RECONNECT_DELAY,
    DEFAULT_WELL_KNOWN_PHRASE, DEFAULT_WRITER_CAPACITY,
};
pub use conn::ConnState;
pub use error::{HeraldError, Result};
pub use protocol::{Identity, Route};
pub use subscription::EventHandler;
pub use transport::Endpoint;
pub use worker::{BoxFuture, Responder};
