//! Stream resolution
//!
//! Turns an [`AudioSourceDescriptor`] into a [`PlayableResource`] the
//! transport can consume. URL descriptors go through the external transcoder
//! and a bounded pipe. Stream descriptors are chunked directly with their
//! declared container.
//!
//! Every resource reports its end or its first failure on a side channel
//! ([`StreamEvent`]) so the session can react without polling the transport.

pub mod pipe;
pub mod transcoder;

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;

use crate::config::{BufferConfig, PlayerConfig, TranscoderConfig};
use crate::error::Result;
use crate::source::{AudioSourceDescriptor, ContainerType, SourceReader};

pub use pipe::ChunkStream;

/// One step of the processing chain feeding the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformStage {
    /// Bytes as produced by the source
    Raw,
    /// External transcoder
    Transcode,
    /// Container framing handed to the transport
    Container,
}

impl fmt::Display for TransformStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformStage::Raw => write!(f, "raw"),
            TransformStage::Transcode => write!(f, "transcode"),
            TransformStage::Container => write!(f, "container"),
        }
    }
}

/// Component a stream failure originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOrigin {
    Transcoder,
    Source,
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorOrigin::Transcoder => write!(f, "transcoder"),
            ErrorOrigin::Source => write!(f, "source"),
        }
    }
}

/// Terminal events of a playable resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The stream was consumed to its end
    End,
    /// The stream failed; no further data follows
    Error { origin: ErrorOrigin, message: String },
}

/// Stream wrapper that reports the first terminal condition exactly once
struct TrackedStream {
    inner: ChunkStream,
    events: mpsc::UnboundedSender<StreamEvent>,
    origin: ErrorOrigin,
    done: bool,
}

impl Stream for TrackedStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Err(e))) => {
                this.done = true;
                let _ = this.events.send(StreamEvent::Error {
                    origin: this.origin,
                    message: e.to_string(),
                });
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.done = true;
                let _ = this.events.send(StreamEvent::End);
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

/// Audio ready to be handed to a transport
pub struct PlayableResource {
    stream: TrackedStream,
    container: ContainerType,
    edges: Vec<TransformStage>,
    events: Option<mpsc::UnboundedReceiver<StreamEvent>>,
}

impl PlayableResource {
    pub fn new(
        stream: ChunkStream,
        container: ContainerType,
        edges: Vec<TransformStage>,
        origin: ErrorOrigin,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            stream: TrackedStream {
                inner: stream,
                events: tx,
                origin,
                done: false,
            },
            container,
            edges,
            events: Some(rx),
        }
    }

    /// Wrap a reader that already carries `container` framing
    pub fn from_reader(reader: SourceReader, container: ContainerType, chunk_bytes: usize) -> Self {
        let chunks = ReaderStream::with_capacity(reader, chunk_bytes.max(1)).boxed();
        Self::new(
            chunks,
            container,
            vec![TransformStage::Raw, TransformStage::Container],
            ErrorOrigin::Source,
        )
    }

    /// Take the end/error notification channel. Returns `None` once taken.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<StreamEvent>> {
        self.events.take()
    }

    pub fn container(&self) -> ContainerType {
        self.container
    }

    pub fn edges(&self) -> &[TransformStage] {
        &self.edges
    }

    /// Processing chain rendered as `raw -> transcode -> container`
    pub fn describe_edges(&self) -> String {
        self.edges
            .iter()
            .map(|stage| stage.to_string())
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    /// Consume the resource into its byte stream
    pub fn into_stream(self) -> ChunkStream {
        Box::pin(self.stream)
    }
}

impl fmt::Debug for PlayableResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayableResource")
            .field("container", &self.container)
            .field("edges", &self.describe_edges())
            .finish_non_exhaustive()
    }
}

/// Converts source descriptors into playable resources
#[derive(Debug, Clone)]
pub struct StreamResolver {
    transcoder: TranscoderConfig,
    buffer: BufferConfig,
}

impl StreamResolver {
    pub fn new(transcoder: TranscoderConfig, buffer: BufferConfig) -> Self {
        Self { transcoder, buffer }
    }

    pub fn from_config(config: &PlayerConfig) -> Self {
        Self::new(config.transcoder.clone(), config.buffer.clone())
    }

    /// Resolve a descriptor.
    ///
    /// URL descriptors spawn the transcoder, so this must run inside a tokio
    /// runtime. Spawn failures surface as [`crate::Error::TranscoderSpawn`].
    pub fn resolve(&self, descriptor: AudioSourceDescriptor) -> Result<PlayableResource> {
        match descriptor {
            AudioSourceDescriptor::Url { url } => {
                let stream = transcoder::spawn_transcoder(&self.transcoder, &self.buffer, &url)?;
                Ok(PlayableResource::new(
                    stream,
                    transcoder::output_container(&self.transcoder),
                    vec![
                        TransformStage::Raw,
                        TransformStage::Transcode,
                        TransformStage::Container,
                    ],
                    ErrorOrigin::Transcoder,
                ))
            }
            AudioSourceDescriptor::Stream { stream, container } => Ok(
                PlayableResource::from_reader(stream, container, self.buffer.chunk_bytes),
            ),
        }
    }
}
