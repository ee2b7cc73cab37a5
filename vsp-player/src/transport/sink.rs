//! Transport that plays into an async writer
//!
//! Used by the command-line player to write the resolved container stream to
//! a file or stdout. Status follows the resource: `Buffering` until the first
//! chunk is written, `Playing` while data flows, `Idle` once the resource is
//! exhausted or stopped.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{Transport, TransportEvent, TransportHandle, TransportStatus};
use crate::error::{Error, Result};
use crate::resolver::{ChunkStream, PlayableResource};

type SharedWriter = Arc<tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Destination backed by an async writer
pub struct SinkTransport {
    writer: SharedWriter,
    connected: AtomicBool,
    handle: Mutex<Option<Arc<SinkHandle>>>,
}

impl SinkTransport {
    /// Wrap a writer; the transport starts connected
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            writer: Arc::new(tokio::sync::Mutex::new(Box::new(writer))),
            connected: AtomicBool::new(true),
            handle: Mutex::new(None),
        }
    }

    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }

    /// Create (truncate) `path` and play into it
    pub async fn create_file(path: &Path) -> Result<Self> {
        let file = tokio::fs::File::create(path).await?;
        Ok(Self::new(file))
    }

    /// Bring the link back up after a disconnect
    pub fn connect(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    /// The destination went away on its own.
    ///
    /// Subscribers of the active handle receive [`TransportEvent::Unsubscribed`].
    pub fn unsubscribe(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(handle) = lock(&self.handle).take() {
            handle.stop(true);
            let _ = handle.shared.events.send(TransportEvent::Unsubscribed);
        }
    }
}

impl Transport for SinkTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn create_connection(&self) -> Result<Arc<dyn TransportHandle>> {
        if !self.is_connected() {
            return Err(Error::Transport("destination is not connected".to_string()));
        }

        let mut slot = lock(&self.handle);
        let handle = slot
            .get_or_insert_with(|| Arc::new(SinkHandle::new(self.writer.clone())))
            .clone();
        Ok(handle)
    }

    fn destroy_connection(&self) -> bool {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        if let Some(handle) = lock(&self.handle).take() {
            handle.stop(true);
        }
        was_connected
    }
}

/// Elapsed playing time, excluding pauses
#[derive(Debug, Default)]
struct PlaybackClock {
    running_since: Option<Instant>,
    accumulated: Duration,
}

impl PlaybackClock {
    fn start(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    fn halt(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += since.elapsed();
        }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn elapsed(&self) -> Duration {
        self.accumulated
            + self
                .running_since
                .map(|since| since.elapsed())
                .unwrap_or_default()
    }
}

struct SinkShared {
    writer: SharedWriter,
    status: watch::Sender<TransportStatus>,
    paused: watch::Sender<bool>,
    events: broadcast::Sender<TransportEvent>,
    clock: Mutex<PlaybackClock>,
    task: Mutex<Option<JoinHandle<()>>>,
    /// Bumped on every play/stop so an outgoing pump cannot touch status
    generation: AtomicU64,
}

impl SinkShared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn set_status(&self, status: TransportStatus) {
        self.status.send_replace(status);
    }
}

/// Player handle of a [`SinkTransport`]
pub struct SinkHandle {
    shared: Arc<SinkShared>,
}

impl SinkHandle {
    fn new(writer: SharedWriter) -> Self {
        let (status, _) = watch::channel(TransportStatus::Idle);
        let (paused, _) = watch::channel(false);
        let (events, _) = broadcast::channel(16);
        Self {
            shared: Arc::new(SinkShared {
                writer,
                status,
                paused,
                events,
                clock: Mutex::new(PlaybackClock::default()),
                task: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    async fn pump(shared: Arc<SinkShared>, generation: u64, mut stream: ChunkStream) {
        let mut paused = shared.paused.subscribe();

        loop {
            if paused.wait_for(|p| !*p).await.map(|_| ()).is_err() {
                return;
            }

            let Some(item) = stream.next().await else {
                break;
            };

            let chunk = match item {
                Ok(chunk) => chunk,
                // Resource failures are reported by the resource itself
                Err(e) => {
                    debug!(error = %e, "Resource failed, ending playback");
                    break;
                }
            };

            let written = {
                let mut writer = shared.writer.lock().await;
                writer.write_all(&chunk).await
            };
            if let Err(e) = written {
                warn!(error = %e, "Sink write failed");
                let _ = shared.events.send(TransportEvent::Error {
                    message: e.to_string(),
                });
                break;
            }

            if shared.is_current(generation) && *shared.status.borrow() == TransportStatus::Buffering
            {
                shared.set_status(TransportStatus::Playing);
                lock(&shared.clock).start();
            }
        }

        if let Err(e) = shared.writer.lock().await.flush().await {
            debug!(error = %e, "Sink flush failed");
        }

        if shared.is_current(generation) {
            lock(&shared.clock).halt();
            shared.set_status(TransportStatus::Idle);
        }
    }
}

#[async_trait]
impl TransportHandle for SinkHandle {
    fn status(&self) -> TransportStatus {
        *self.shared.status.borrow()
    }

    fn watch_status(&self) -> watch::Receiver<TransportStatus> {
        self.shared.status.subscribe()
    }

    fn play(&self, resource: PlayableResource) -> Result<()> {
        self.stop(true);

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.shared.clock).reset();
        self.shared.paused.send_replace(false);
        self.shared.set_status(TransportStatus::Buffering);

        debug!(container = %resource.container(), "Sink playing resource");
        let task = tokio::spawn(Self::pump(
            self.shared.clone(),
            generation,
            resource.into_stream(),
        ));
        *lock(&self.shared.task) = Some(task);
        Ok(())
    }

    /// Sinks have no trailing silence to flush, so `force` changes nothing
    fn stop(&self, _force: bool) -> bool {
        let task = lock(&self.shared.task).take();
        let was_active = self.status() != TransportStatus::Idle || task.is_some();
        if !was_active {
            return false;
        }

        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = task {
            task.abort();
        }
        lock(&self.shared.clock).reset();
        self.shared.paused.send_replace(false);
        self.shared.set_status(TransportStatus::Idle);
        true
    }

    fn pause(&self) -> bool {
        match self.status() {
            TransportStatus::Playing | TransportStatus::Buffering => {
                self.shared.paused.send_replace(true);
                lock(&self.shared.clock).halt();
                self.shared.set_status(TransportStatus::Paused);
                true
            }
            _ => false,
        }
    }

    fn unpause(&self) -> bool {
        if self.status() != TransportStatus::Paused {
            return false;
        }
        lock(&self.shared.clock).start();
        self.shared.set_status(TransportStatus::Playing);
        self.shared.paused.send_replace(false);
        true
    }

    fn playback_duration(&self) -> Duration {
        if self.status() == TransportStatus::Playing {
            lock(&self.shared.clock).elapsed()
        } else {
            Duration::ZERO
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.shared.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{ErrorOrigin, TransformStage};
    use crate::source::ContainerType;
    use bytes::Bytes;

    fn resource(chunks: Vec<&'static [u8]>) -> PlayableResource {
        let items: Vec<std::io::Result<Bytes>> =
            chunks.into_iter().map(|c| Ok(Bytes::from_static(c))).collect();
        PlayableResource::new(
            futures::stream::iter(items).boxed(),
            ContainerType::OggOpus,
            vec![TransformStage::Raw, TransformStage::Container],
            ErrorOrigin::Source,
        )
    }

    #[tokio::test]
    async fn test_connection_lifecycle() {
        let transport = SinkTransport::new(tokio::io::sink());
        assert!(transport.is_connected());

        let first = transport.create_connection().unwrap();
        let second = transport.create_connection().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        assert!(transport.destroy_connection());
        assert!(!transport.is_connected());
        assert!(!transport.destroy_connection());
        assert!(transport.create_connection().is_err());

        transport.connect();
        let third = transport.create_connection().unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[tokio::test]
    async fn test_plays_resource_to_end() {
        let (writer, mut reader) = tokio::io::duplex(64);
        let transport = SinkTransport::new(writer);
        let handle = transport.create_connection().unwrap();

        handle.play(resource(vec![b"Ogg", b"S"])).unwrap();
        handle
            .await_state(TransportStatus::Idle, Duration::from_secs(5))
            .await
            .unwrap();

        let mut buf = [0u8; 4];
        tokio::io::AsyncReadExt::read_exact(&mut reader, &mut buf)
            .await
            .unwrap();
        assert_eq!(&buf, b"OggS");
    }

    #[tokio::test]
    async fn test_pause_and_unpause() {
        let transport = SinkTransport::new(tokio::io::sink());
        let handle = transport.create_connection().unwrap();

        assert!(!handle.pause());
        handle.play(resource(vec![])).unwrap();
        handle.stop(true);
        assert_eq!(handle.status(), TransportStatus::Idle);
        assert!(!handle.unpause());
        assert!(!handle.stop(true));
        assert_eq!(handle.playback_duration(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_paused_stream_holds_until_unpaused() {
        let (writer, _reader) = tokio::io::duplex(1024);
        let transport = SinkTransport::new(writer);
        let handle = transport.create_connection().unwrap();

        let (tx, rx) = tokio::sync::mpsc::channel::<std::io::Result<Bytes>>(4);
        let stream = tokio_stream::wrappers::ReceiverStream::new(rx).boxed();
        handle
            .play(PlayableResource::new(
                stream,
                ContainerType::OggOpus,
                vec![TransformStage::Raw, TransformStage::Container],
                ErrorOrigin::Source,
            ))
            .unwrap();

        tx.send(Ok(Bytes::from_static(b"a"))).await.unwrap();
        handle
            .await_state(TransportStatus::Playing, Duration::from_secs(5))
            .await
            .unwrap();

        assert!(handle.pause());
        assert_eq!(handle.status(), TransportStatus::Paused);
        assert_eq!(handle.playback_duration(), Duration::ZERO);

        assert!(handle.unpause());
        assert_eq!(handle.status(), TransportStatus::Playing);

        drop(tx);
        handle
            .await_state(TransportStatus::Idle, Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unsubscribe_notifies_subscribers() {
        let transport = SinkTransport::new(tokio::io::sink());
        let handle = transport.create_connection().unwrap();
        let mut events = handle.subscribe();

        transport.unsubscribe();

        assert_eq!(events.recv().await.unwrap(), TransportEvent::Unsubscribed);
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_write_failure_is_reported() {
        let (writer, reader) = tokio::io::duplex(8);
        drop(reader);
        let transport = SinkTransport::new(writer);
        let handle = transport.create_connection().unwrap();
        let mut events = handle.subscribe();

        handle.play(resource(vec![b"data"])).unwrap();

        match events.recv().await.unwrap() {
            TransportEvent::Error { .. } => {}
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
