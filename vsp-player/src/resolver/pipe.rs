//! Bounded in-memory buffer between a producer and the transport
//!
//! A pump task copies chunks from an `AsyncRead` into a bounded channel. The
//! channel holds at most `high_water_mark / chunk` chunks, so a slow
//! transport back-pressures the producer. Producer failures are delivered
//! as an `Err` item on the stream rather than panicking the pump, which lets
//! the consumer react asynchronously.

use std::io;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::ReaderStream;

use crate::config::BufferConfig;

/// Stream of audio chunks as consumed by the transport
pub type ChunkStream = BoxStream<'static, io::Result<Bytes>>;

/// How a pump run ended
#[derive(Debug)]
pub enum PumpOutcome {
    /// The producer reached end of file
    Finished,
    /// The consumer dropped its end of the pipe
    ReceiverGone,
    /// Reading from the producer failed
    ReadError(io::Error),
}

/// Producer side of a bounded pipe
#[derive(Debug, Clone)]
pub struct PipeSender {
    tx: mpsc::Sender<io::Result<Bytes>>,
    chunk_bytes: usize,
}

/// Create a bounded pipe sized from the buffer configuration
pub fn bounded_pipe(config: &BufferConfig) -> (PipeSender, ChunkStream) {
    let slots = slot_count(config);
    let (tx, rx) = mpsc::channel(slots);
    let sender = PipeSender {
        tx,
        chunk_bytes: config.chunk_bytes.max(1),
    };
    (sender, ReceiverStream::new(rx).boxed())
}

/// Number of chunks that fit under the high-water mark (at least one)
pub fn slot_count(config: &BufferConfig) -> usize {
    (config.high_water_mark_bytes / config.chunk_bytes.max(1)).max(1)
}

impl PipeSender {
    /// Copy `reader` into the pipe until end of file or until the consumer
    /// goes away, whichever happens first.
    pub async fn pump<R>(&self, reader: R) -> PumpOutcome
    where
        R: AsyncRead + Send + Unpin,
    {
        let mut chunks = ReaderStream::with_capacity(reader, self.chunk_bytes);
        loop {
            let next = tokio::select! {
                _ = self.tx.closed() => return PumpOutcome::ReceiverGone,
                next = chunks.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    if self.tx.send(Ok(chunk)).await.is_err() {
                        return PumpOutcome::ReceiverGone;
                    }
                }
                Some(Err(e)) => return PumpOutcome::ReadError(e),
                None => return PumpOutcome::Finished,
            }
        }
    }

    /// Deliver a failure to the consumer as the final stream item
    pub async fn fail(&self, error: io::Error) {
        let _ = self.tx.send(Err(error)).await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
