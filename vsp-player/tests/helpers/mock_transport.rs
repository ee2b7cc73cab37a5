//! Scripted transport that records every call
//!
//! Playing a resource only parks its stream. Tests decide when the stream
//! ends (`finish`) or when the transport reports a failure (`fail`).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{broadcast, watch};
use vsp_player::resolver::{ChunkStream, PlayableResource};
use vsp_player::transport::{Transport, TransportEvent, TransportHandle, TransportStatus};
use vsp_player::{Error, Result};

/// Position reported while a mock handle is playing
pub const MOCK_POSITION: Duration = Duration::from_millis(1_500);

pub struct MockTransport {
    connected: AtomicBool,
    confirm_playing: bool,
    handle: Mutex<Option<Arc<MockHandle>>>,
    creations: AtomicUsize,
    destructions: AtomicUsize,
}

impl MockTransport {
    pub fn connected() -> Arc<Self> {
        Arc::new(Self::build(true, true))
    }

    pub fn disconnected() -> Arc<Self> {
        Arc::new(Self::build(false, true))
    }

    /// Handles stay in `Buffering` after `play` and never confirm playback
    pub fn unconfirmed() -> Arc<Self> {
        Arc::new(Self::build(true, false))
    }

    fn build(connected: bool, confirm_playing: bool) -> Self {
        Self {
            connected: AtomicBool::new(connected),
            confirm_playing,
            handle: Mutex::new(None),
            creations: AtomicUsize::new(0),
            destructions: AtomicUsize::new(0),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn current_handle(&self) -> Option<Arc<MockHandle>> {
        self.handle.lock().unwrap().clone()
    }

    /// Handle of the current connection; panics when none was created
    pub fn expect_handle(&self) -> Arc<MockHandle> {
        self.current_handle().expect("no transport handle created")
    }

    pub fn creations(&self) -> usize {
        self.creations.load(Ordering::SeqCst)
    }

    pub fn destructions(&self) -> usize {
        self.destructions.load(Ordering::SeqCst)
    }

    /// The destination dropped the player on its own
    pub fn unsubscribe(&self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.emit(TransportEvent::Unsubscribed);
        }
    }
}

impl Transport for MockTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn create_connection(&self) -> Result<Arc<dyn TransportHandle>> {
        if !self.is_connected() {
            return Err(Error::Transport("mock destination is not connected".to_string()));
        }
        let mut slot = self.handle.lock().unwrap();
        let handle = match slot.as_ref() {
            Some(handle) => handle.clone(),
            None => {
                self.creations.fetch_add(1, Ordering::SeqCst);
                let handle = Arc::new(MockHandle::new(self.confirm_playing));
                *slot = Some(handle.clone());
                handle
            }
        };
        Ok(handle)
    }

    fn destroy_connection(&self) -> bool {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        if was_connected {
            self.destructions.fetch_add(1, Ordering::SeqCst);
        }
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.stop(true);
        }
        was_connected
    }
}

pub struct MockHandle {
    confirm_playing: bool,
    status: watch::Sender<TransportStatus>,
    events: broadcast::Sender<TransportEvent>,
    current: Mutex<Option<ChunkStream>>,
    plays: AtomicUsize,
    stops: AtomicUsize,
}

impl MockHandle {
    fn new(confirm_playing: bool) -> Self {
        let (status, _) = watch::channel(TransportStatus::Idle);
        let (events, _) = broadcast::channel(16);
        Self {
            confirm_playing,
            status,
            events,
            current: Mutex::new(None),
            plays: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    pub fn plays(&self) -> usize {
        self.plays.load(Ordering::SeqCst)
    }

    /// Stop calls that actually stopped something
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    /// Report a transport-level failure of the current resource
    pub fn fail(&self, message: &str) {
        self.emit(TransportEvent::Error {
            message: message.to_string(),
        });
    }

    /// Consume the current resource to its end, then go idle
    pub async fn finish(&self) {
        self.end_stream().await;
        self.status.send_replace(TransportStatus::Idle);
    }

    /// Consume the current resource to its end but keep the current status,
    /// like a transport that never reports going idle
    pub async fn end_stream(&self) {
        let stream = self.current.lock().unwrap().take();
        if let Some(mut stream) = stream {
            while stream.next().await.is_some() {}
        }
    }
}

#[async_trait]
impl TransportHandle for MockHandle {
    fn status(&self) -> TransportStatus {
        *self.status.borrow()
    }

    fn watch_status(&self) -> watch::Receiver<TransportStatus> {
        self.status.subscribe()
    }

    fn play(&self, resource: PlayableResource) -> Result<()> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        *self.current.lock().unwrap() = Some(resource.into_stream());
        let status = if self.confirm_playing {
            TransportStatus::Playing
        } else {
            TransportStatus::Buffering
        };
        self.status.send_replace(status);
        Ok(())
    }

    fn stop(&self, _force: bool) -> bool {
        let had_stream = self.current.lock().unwrap().take().is_some();
        let was_active = had_stream || self.status() != TransportStatus::Idle;
        self.status.send_replace(TransportStatus::Idle);
        if was_active {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
        was_active
    }

    fn pause(&self) -> bool {
        if self.status() != TransportStatus::Playing {
            return false;
        }
        self.status.send_replace(TransportStatus::Paused);
        true
    }

    fn unpause(&self) -> bool {
        if self.status() != TransportStatus::Paused {
            return false;
        }
        self.status.send_replace(TransportStatus::Playing);
        true
    }

    fn playback_duration(&self) -> Duration {
        if self.status() == TransportStatus::Playing {
            MOCK_POSITION
        } else {
            Duration::ZERO
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}
