//! Dedicated writer task, one per connection.
//!
//! The engine never touches the socket's write half directly: frames are
//! handed over an mpsc channel to this task, which writes them in exactly
//! hand-off order and reports a completion event per frame. The bounded
//! channel is the transport's writability signal — when it is full, frames
//! stay in the engine's send queue until completions free capacity.
//!
//! Ready frames are drained in small batches so a burst is flushed with a
//! single flush call.

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::conn::{Command, TransportEvent};

/// Maximum frames written between flushes.
const MAX_BATCH_SIZE: usize = 64;

/// A frame handed to the writer task.
#[derive(Debug)]
pub(crate) struct WriteJob {
    pub(crate) message_id: u64,
    pub(crate) frame: Bytes,
}

/// Spawn the writer task for one connection generation.
///
/// Dropping the returned sender ends the task; a write failure ends it
/// after reporting the failed frame.
pub(crate) fn spawn_writer<W>(
    generation: u64,
    writer: W,
    capacity: usize,
    events: mpsc::Sender<Command>,
) -> mpsc::Sender<WriteJob>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity);
    tokio::spawn(writer_loop(generation, rx, writer, events));
    tx
}

async fn writer_loop<W>(
    generation: u64,
    mut rx: mpsc::Receiver<WriteJob>,
    mut writer: W,
    events: mpsc::Sender<Command>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        // Connection torn down once every sender is gone.
        let Some(first) = rx.recv().await else { return };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(job) => batch.push(job),
                Err(_) => break,
            }
        }

        for job in batch {
            let result = writer.write_all(&job.frame).await;
            let failed = result.is_err();
            let event = TransportEvent::Wrote {
                generation,
                message_id: job.message_id,
                result,
            };
            let _ = events.send(Command::Transport(event)).await;
            if failed {
                return;
            }
        }

        if let Err(error) = writer.flush().await {
            let event = TransportEvent::Closed {
                generation,
                error: Some(error),
            };
            let _ = events.send(Command::Transport(event)).await;
            return;
        }
    }
}
