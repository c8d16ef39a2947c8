//! TCP transport: endpoint config, connect, and the read loop.
//!
//! The reader task owns the connection's read half and its frame
//! reassembler. Every complete frame is decoded through the codec and
//! posted to the engine; frames whose header does not decode are protocol
//! garbage and get dropped here. EOF and read errors surface as a single
//! close event.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::codec::MessageCodec;
use crate::conn::{Command, TransportEvent};
use crate::protocol::{FrameReassembler, Message};

/// Read buffer size for the socket loop.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Broker endpoint to connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Open a TCP connection to the broker.
pub(crate) async fn connect(endpoint: &Endpoint) -> std::io::Result<TcpStream> {
    TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await
}

/// Spawn the read loop for one connection generation.
pub(crate) fn spawn_reader<R>(
    generation: u64,
    reader: R,
    codec: Arc<dyn MessageCodec>,
    events: mpsc::Sender<Command>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(read_loop(generation, reader, codec, events))
}

async fn read_loop<R>(
    generation: u64,
    mut reader: R,
    codec: Arc<dyn MessageCodec>,
    events: mpsc::Sender<Command>,
) where
    R: AsyncRead + Unpin,
{
    let mut reassembler = FrameReassembler::new(codec.clone());
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let error = match reader.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                for frame in reassembler.feed(&buf[..n]) {
                    let Some(header) = codec.get_header(&frame) else {
                        tracing::trace!(bytes = frame.len(), "dropping undecodable frame");
                        continue;
                    };
                    let body = codec.get_body(&frame).unwrap_or(Value::Null);
                    let event = TransportEvent::Frame {
                        generation,
                        message: Message::new(header, body),
                    };
                    if events.send(Command::Transport(event)).await.is_err() {
                        return;
                    }
                }
                continue;
            }
            Err(error) => Some(error),
        };

        let event = TransportEvent::Closed { generation, error };
        let _ = events.send(Command::Transport(event)).await;
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{JsonCodec, MessageCodec as _};
    use crate::protocol::{Header, Route, DEFAULT_RETRY, DEFAULT_TIMEOUT_MS};
    use serde_json::json;
    use tokio::io::{duplex, AsyncWriteExt};

    fn wire_frame(event: &str) -> bytes::Bytes {
        let msg = Message::new(
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
            json!(1),
        );
        JsonCodec::new().make_message(&msg).unwrap()
    }

    #[tokio::test]
    async fn test_frames_decoded_and_close_reported() {
        let (near, mut far) = duplex(4096);
        let (events_tx, mut events_rx) = mpsc::channel(16);
        spawn_reader(3, near, Arc::new(JsonCodec::new()), events_tx);

        far.write_all(&wire_frame("alerts")).await.unwrap();
        far.write_all(b"garbage that is not a frame\r\n\r\n")
            .await
            .unwrap();
        far.write_all(&wire_frame("metrics")).await.unwrap();
        drop(far);

        let mut events_seen = Vec::new();
        loop {
            match events_rx.recv().await.unwrap() {
                Command::Transport(TransportEvent::Frame {
                    generation,
                    message,
                }) => {
                    assert_eq!(generation, 3);
                    events_seen.push(message.header.route.event().unwrap().to_owned());
                }
                Command::Transport(TransportEvent::Closed { generation, error }) => {
                    assert_eq!(generation, 3);
                    assert!(error.is_none());
                    break;
                }
                other => panic!("unexpected command: {other:?}"),
            }
        }

        // The garbage frame is dropped; the rest arrive in order.
        assert_eq!(events_seen, ["alerts", "metrics"]);
    }
}
