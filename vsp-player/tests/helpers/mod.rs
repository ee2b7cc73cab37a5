//! Test helper modules for vsp-player session tests
//!
//! - MockTransport / MockHandle: scripted transport recording every call
//! - ScriptedSource: sources with scripted fetch outcomes
//! - RecordingQueue / RecordingBackup: collaborators that count calls

#![allow(dead_code)]

pub mod mock_transport;
pub mod scripted_source;

pub use mock_transport::{MockTransport, MOCK_POSITION};
pub use scripted_source::ScriptedSource;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use vsp_common::events::{DestinationId, EventBus, SessionEvent};
use vsp_player::backup::{SessionSnapshot, StateBackup};
use vsp_player::config::{BufferConfig, TranscoderConfig};
use vsp_player::queue::{Queue, QueueItem, TrackQueue};
use vsp_player::resolver::StreamResolver;
use vsp_player::{PlaybackSession, SessionContext, SessionSettings};

pub const DESTINATION: DestinationId = DestinationId(42);

/// Upper bound for anything a test waits on
pub const WAIT: Duration = Duration::from_secs(5);

/// Queue that counts `next()` calls
#[derive(Default)]
pub struct RecordingQueue {
    inner: TrackQueue,
    next_calls: AtomicUsize,
}

impl RecordingQueue {
    pub fn with_sources(sources: &[Arc<ScriptedSource>]) -> Arc<Self> {
        let queue = Self::default();
        for source in sources {
            queue.inner.push(QueueItem::new(source.clone()));
        }
        Arc::new(queue)
    }

    pub fn push(&self, item: QueueItem) {
        self.inner.push(item);
    }

    pub fn next_calls(&self) -> usize {
        self.next_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Queue for RecordingQueue {
    fn get(&self, index: usize) -> Option<QueueItem> {
        self.inner.get(index)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn total_remaining_seconds(&self) -> u64 {
        self.inner.total_remaining_seconds()
    }

    fn loop_enabled(&self) -> bool {
        self.inner.loop_enabled()
    }

    fn set_loop_enabled(&self, enabled: bool) {
        self.inner.set_loop_enabled(enabled)
    }

    fn queue_loop_enabled(&self) -> bool {
        self.inner.queue_loop_enabled()
    }

    fn set_queue_loop_enabled(&self, enabled: bool) {
        self.inner.set_queue_loop_enabled(enabled)
    }

    fn once_loop_enabled(&self) -> bool {
        self.inner.once_loop_enabled()
    }

    fn set_once_loop_enabled(&self, enabled: bool) {
        self.inner.set_once_loop_enabled(enabled)
    }

    async fn next(&self) {
        self.next_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.next().await;
    }
}

/// Backup that remembers what it was given
#[derive(Default)]
pub struct RecordingBackup {
    data_calls: AtomicUsize,
    status_calls: AtomicUsize,
    last: Mutex<Option<SessionSnapshot>>,
}

impl RecordingBackup {
    pub fn data_calls(&self) -> usize {
        self.data_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn last(&self) -> Option<SessionSnapshot> {
        self.last.lock().unwrap().clone()
    }
}

impl StateBackup for RecordingBackup {
    fn backup_data(&self, snapshot: &SessionSnapshot) -> vsp_player::Result<()> {
        self.data_calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(snapshot.clone());
        Ok(())
    }

    fn backup_status(&self, snapshot: &SessionSnapshot) -> vsp_player::Result<()> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(snapshot.clone());
        Ok(())
    }
}

/// Everything a session test needs, wired together
pub struct Fixture {
    pub session: PlaybackSession,
    pub transport: Arc<MockTransport>,
    pub queue: Arc<RecordingQueue>,
    pub backup: Arc<RecordingBackup>,
    pub events: broadcast::Receiver<SessionEvent>,
}

pub fn settings() -> SessionSettings {
    SessionSettings {
        retry_limit: 3,
        playing_timeout: WAIT,
        idle_timeout: WAIT,
    }
}

/// Context whose transcoder cannot be spawned, so URL sources always fail
/// resolution
pub fn context(settings: SessionSettings, backup: Arc<RecordingBackup>) -> SessionContext {
    let transcoder = TranscoderConfig {
        program: "vsp-test-missing-transcoder".to_string(),
        ..Default::default()
    };
    SessionContext {
        resolver: StreamResolver::new(transcoder, BufferConfig::default()),
        events: EventBus::new(100),
        backup,
        settings,
    }
}

pub fn fixture(transport: Arc<MockTransport>, queue: Arc<RecordingQueue>) -> Fixture {
    fixture_with(transport, queue, settings())
}

pub fn fixture_with(
    transport: Arc<MockTransport>,
    queue: Arc<RecordingQueue>,
    settings: SessionSettings,
) -> Fixture {
    let backup = Arc::new(RecordingBackup::default());
    let ctx = context(settings, backup.clone());
    let events = ctx.events.subscribe();
    let session = PlaybackSession::new(DESTINATION, transport.clone(), queue.clone(), ctx);
    Fixture {
        session,
        transport,
        queue,
        backup,
        events,
    }
}

/// Wait for the first event matching `predicate`, skipping the others
pub async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<SessionEvent>,
    predicate: F,
) -> SessionEvent
where
    F: Fn(&SessionEvent) -> bool,
{
    let found = tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) => continue,
                Err(e) => panic!("event bus closed or lagged: {e}"),
            }
        }
    })
    .await;
    found.expect("timed out waiting for session event")
}

pub async fn wait_for_started(
    events: &mut broadcast::Receiver<SessionEvent>,
    title: &str,
) -> SessionEvent {
    let title = title.to_string();
    wait_for_event(events, move |event| {
        matches!(event, SessionEvent::PlaybackStarted { now_playing, .. } if now_playing.title == title)
    })
    .await
}

/// Every event up to and including the `PlaybackStarted` of `title`
pub async fn collect_until_started(
    events: &mut broadcast::Receiver<SessionEvent>,
    title: &str,
) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    loop {
        let event = wait_for_event(events, |_| true).await;
        let started = matches!(
            &event,
            SessionEvent::PlaybackStarted { now_playing, .. } if now_playing.title == title
        );
        seen.push(event);
        if started {
            return seen;
        }
    }
}

/// Events already delivered and not yet consumed
pub fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

/// Poll `condition` until it holds
pub async fn wait_until<F>(condition: F)
where
    F: Fn() -> bool,
{
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for condition");
}
