//! Per-destination playback session
//!
//! A [`PlaybackSession`] owns the transport handle of one destination and
//! drives the queue through it: resolve the head, hand it to the transport,
//! wait for confirmation, then react to end of stream or failure by retrying,
//! replaying or advancing.
//!
//! # State machine
//!
//! ```text
//! Disconnected -> Idle -> Loading -> Playing <-> Paused
//!                           |          |
//!                           +--> Recovering --> Loading (retry or skip)
//! ```
//!
//! Stream and transport events are funnelled into a per-session signal task
//! and handled one at a time in arrival order. Every attempt is tagged with a
//! generation number; events from an attempt that was stopped or replaced are
//! dropped.

mod play;
mod recovery;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, warn, Instrument, Span};
use vsp_common::events::{DestinationId, EventBus, SessionEvent};

use crate::backup::{JsonFileBackup, NoopBackup, SessionSnapshot, StateBackup};
use crate::config::PlayerConfig;
use crate::queue::{Queue, QueueItem};
use crate::resolver::{StreamEvent, StreamResolver};
use crate::retry::RetryTracker;
use crate::transport::{
    Transport, TransportEvent, TransportHandle, TransportState, TransportStatus,
};

/// Timing and retry knobs of a session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub retry_limit: u32,
    pub playing_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            retry_limit: 3,
            playing_timeout: Duration::from_millis(100_000),
            idle_timeout: Duration::from_millis(100_000),
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &PlayerConfig) -> Self {
        Self {
            retry_limit: config.retry_limit,
            playing_timeout: config.playing_timeout(),
            idle_timeout: config.idle_timeout(),
        }
    }
}

/// Collaborators shared by every session of a process
#[derive(Clone)]
pub struct SessionContext {
    pub resolver: StreamResolver,
    pub events: EventBus,
    pub backup: Arc<dyn StateBackup>,
    pub settings: SessionSettings,
}

impl SessionContext {
    pub fn from_config(config: &PlayerConfig) -> Self {
        let backup: Arc<dyn StateBackup> = match &config.backup_dir {
            Some(dir) => Arc::new(JsonFileBackup::new(dir)),
            None => Arc::new(NoopBackup),
        };
        Self {
            resolver: StreamResolver::from_config(config),
            events: EventBus::new(config.event_capacity),
            backup,
            settings: SessionSettings::from_config(config),
        }
    }
}

/// Observable phase of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Disconnected,
    Idle,
    Loading,
    Playing,
    Paused,
    Recovering,
}

/// Per-session mutual exclusion for Play.
///
/// At most one Play runs at a time. A call that finds the gate busy records a
/// request instead, and the running call replays once after releasing.
#[derive(Debug, Default)]
pub struct PlayGate {
    in_flight: AtomicBool,
    requested: AtomicBool,
}

impl PlayGate {
    pub fn try_acquire(&self) -> Option<PlayGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        self.requested.store(false, Ordering::SeqCst);
        Some(PlayGuard { gate: self })
    }

    /// Record a pending request, then acquire if the holder already left.
    ///
    /// Either this call gets the guard or the holder's `release` observes the
    /// request.
    pub fn request(&self) -> Option<PlayGuard<'_>> {
        self.requested.store(true, Ordering::SeqCst);
        self.try_acquire()
    }

    /// Acquire, or leave a request for the current holder
    pub fn enter(&self) -> Option<PlayGuard<'_>> {
        self.try_acquire().or_else(|| self.request())
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }
}

/// Held for the whole resolve/confirm/retry sequence of one Play call and
/// released on drop.
pub struct PlayGuard<'a> {
    gate: &'a PlayGate,
}

impl PlayGuard<'_> {
    /// Release the gate. Returns whether a request arrived meanwhile.
    pub fn release(self) -> bool {
        let gate = self.gate;
        drop(self);
        gate.requested.swap(false, Ordering::SeqCst)
    }
}

impl Drop for PlayGuard<'_> {
    fn drop(&mut self) {
        self.gate.in_flight.store(false, Ordering::SeqCst);
    }
}

/// Event delivered to the session's signal task
#[derive(Debug)]
enum Signal {
    Stream { generation: u64, event: StreamEvent },
    Transport { epoch: u64, event: TransportEvent },
}

#[derive(Debug, Default)]
struct SessionState {
    transport: TransportState,
    /// Bumped whenever a new transport handle is created
    handle_epoch: u64,
    /// Bumped on every attempt and every stop
    generation: u64,
    current: Option<QueueItem>,
    stopped: bool,
    error: bool,
    retry: RetryTracker,
}

struct SessionInner {
    destination: DestinationId,
    transport: Arc<dyn Transport>,
    queue: Arc<dyn Queue>,
    ctx: SessionContext,
    state: Mutex<SessionState>,
    play_gate: PlayGate,
    signals: mpsc::UnboundedSender<Signal>,
    span: Span,
}

/// Playback session of one destination
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct PlaybackSession {
    inner: Arc<SessionInner>,
}

impl PlaybackSession {
    /// Create a session. Must be called inside a tokio runtime.
    pub fn new(
        destination: DestinationId,
        transport: Arc<dyn Transport>,
        queue: Arc<dyn Queue>,
        ctx: SessionContext,
    ) -> Self {
        let (signals, rx) = mpsc::unbounded_channel();
        let span = info_span!("session", destination = %destination);

        let inner = Arc::new(SessionInner {
            destination,
            transport,
            queue,
            ctx,
            state: Mutex::new(SessionState::default()),
            play_gate: PlayGate::default(),
            signals,
            span: span.clone(),
        });

        tokio::spawn(signal_loop(Arc::downgrade(&inner), rx).instrument(span));
        info!(parent: &inner.span, "Playback session created");

        Self { inner }
    }

    pub fn destination(&self) -> DestinationId {
        self.inner.destination
    }

    pub fn queue(&self) -> &Arc<dyn Queue> {
        &self.inner.queue
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.ctx.events
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn handle(&self) -> Option<Arc<dyn TransportHandle>> {
        self.state().transport.handle().cloned()
    }

    fn settings(&self) -> &SessionSettings {
        &self.inner.ctx.settings
    }

    fn emit(&self, event: SessionEvent) {
        self.inner.ctx.events.emit_lossy(event);
    }

    /// Whether the destination link is up
    pub fn is_connecting(&self) -> bool {
        self.inner.transport.is_connected()
    }

    /// Connected with a handle that is not idle (paused counts as playing)
    pub fn is_playing(&self) -> bool {
        self.is_connecting()
            && self
                .handle()
                .is_some_and(|handle| handle.status() != TransportStatus::Idle)
    }

    pub fn is_paused(&self) -> bool {
        self.handle()
            .is_some_and(|handle| handle.status() == TransportStatus::Paused)
    }

    /// Time streamed of the current track; zero unless actively playing
    pub fn current_time(&self) -> Duration {
        match self.handle() {
            Some(handle) if handle.status() == TransportStatus::Playing => {
                handle.playback_duration()
            }
            _ => Duration::ZERO,
        }
    }

    pub fn current_track_url(&self) -> Option<String> {
        self.state()
            .current
            .as_ref()
            .map(|item| item.source.url().to_string())
    }

    /// The last attempt failed and recovery has not yet succeeded
    pub fn has_error(&self) -> bool {
        self.state().error
    }

    pub fn has_transport_handle(&self) -> bool {
        self.state().transport.is_created()
    }

    pub fn retry_state(&self) -> RetryTracker {
        self.state().retry.clone()
    }

    pub fn phase(&self) -> SessionPhase {
        if !self.is_connecting() {
            return SessionPhase::Disconnected;
        }
        if self.inner.play_gate.is_busy() {
            return if self.has_error() {
                SessionPhase::Recovering
            } else {
                SessionPhase::Loading
            };
        }
        match self.handle().map(|handle| handle.status()) {
            Some(TransportStatus::Playing) => SessionPhase::Playing,
            Some(TransportStatus::Buffering) => SessionPhase::Loading,
            Some(TransportStatus::Paused | TransportStatus::AutoPaused) => SessionPhase::Paused,
            Some(TransportStatus::Idle) | None => SessionPhase::Idle,
        }
    }

    /// Stop playback without disconnecting.
    ///
    /// Events still in flight from the stopped attempt are discarded.
    pub fn stop(&self) {
        let _enter = self.inner.span.enter();
        info!("Stop() called");

        let handle = {
            let mut state = self.state();
            state.generation += 1;
            let handle = state.transport.handle().cloned();
            if handle.is_some() {
                state.stopped = true;
            }
            handle
        };

        if let Some(handle) = handle {
            handle.stop(true);
        }
        self.backup_data();
    }

    /// Stop and tear down the destination link
    pub fn disconnect(&self) {
        self.stop();

        let _enter = self.inner.span.enter();
        if self.is_connecting() {
            self.inner.transport.destroy_connection();
            self.state().transport = TransportState::Absent;
            info!("Disconnected");
            self.emit(SessionEvent::Disconnected {
                destination: self.inner.destination,
                timestamp: chrono::Utc::now(),
            });
        } else {
            warn!("Disconnect() called but no connection");
        }
    }

    pub fn pause(&self) {
        self.backup_status();
        let _enter = self.inner.span.enter();
        info!("Pause() called");
        if let Some(handle) = self.handle() {
            handle.pause();
        }
    }

    pub fn resume(&self) {
        self.backup_status();
        let _enter = self.inner.span.enter();
        info!("Resume() called");
        if let Some(handle) = self.handle() {
            handle.unpause();
        }
    }

    /// Restart the current head from the beginning
    pub async fn rewind(&self) {
        info!(parent: &self.inner.span, "Rewind() called");
        self.stop();
        self.play().await;
    }

    /// Current state as a backup snapshot
    pub fn snapshot(&self) -> SessionSnapshot {
        let queue = &self.inner.queue;
        let queue_urls = (0..queue.len())
            .filter_map(|index| queue.get(index))
            .map(|item| item.source.url().to_string())
            .collect();

        SessionSnapshot {
            destination: self.inner.destination,
            current_url: self.current_track_url(),
            queue_urls,
            playing: self.is_playing(),
            paused: self.is_paused(),
            position_ms: self.current_time().as_millis() as u64,
            loop_enabled: queue.loop_enabled(),
            queue_loop_enabled: queue.queue_loop_enabled(),
            once_loop_enabled: queue.once_loop_enabled(),
            timestamp: chrono::Utc::now(),
        }
    }

    fn backup_data(&self) {
        if let Err(e) = self.inner.ctx.backup.backup_data(&self.snapshot()) {
            warn!(parent: &self.inner.span, error = %e, "Session data backup failed");
        }
    }

    fn backup_status(&self) {
        if let Err(e) = self.inner.ctx.backup.backup_status(&self.snapshot()) {
            warn!(parent: &self.inner.span, error = %e, "Session status backup failed");
        }
    }

    fn send_signal(&self, signal: Signal) {
        if self.inner.signals.send(signal).is_err() {
            debug!(parent: &self.inner.span, "Signal task gone, dropping signal");
        }
    }

    async fn handle_signal(&self, signal: Signal) {
        match signal {
            Signal::Stream { generation, event } => {
                if self.state().generation != generation {
                    debug!(generation, ?event, "Dropping stream event of a replaced attempt");
                    return;
                }
                match event {
                    StreamEvent::End => self.on_stream_finished().await,
                    StreamEvent::Error { origin, message } => {
                        let message = format!("{origin} stream failed: {message}");
                        self.on_playback_error(&message).await;
                    }
                }
            }
            Signal::Transport { epoch, event } => self.on_transport_event(epoch, event).await,
        }
    }
}

impl std::fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("destination", &self.inner.destination)
            .field("state", &*self.state())
            .finish_non_exhaustive()
    }
}

async fn signal_loop(session: Weak<SessionInner>, mut signals: mpsc::UnboundedReceiver<Signal>) {
    while let Some(signal) = signals.recv().await {
        let Some(inner) = session.upgrade() else {
            break;
        };
        PlaybackSession { inner }.handle_signal(signal).await;
    }
    debug!("Session signal task finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_play_gate_is_exclusive_and_released_on_drop() {
        let gate = PlayGate::default();

        let guard = gate.try_acquire().unwrap();
        assert!(gate.is_busy());
        assert!(gate.try_acquire().is_none());

        drop(guard);
        assert!(!gate.is_busy());
        assert!(gate.try_acquire().is_some());
    }

    #[test]
    fn test_play_gate_request_during_flight_replays_once() {
        let gate = PlayGate::default();

        let holder = gate.enter().unwrap();
        assert!(gate.enter().is_none());
        assert!(gate.enter().is_none());

        assert!(holder.release());
        let replay = gate.enter().unwrap();
        assert!(!replay.release());
    }

    #[test]
    fn test_play_gate_request_after_holder_left_acquires() {
        let gate = PlayGate::default();
        let holder = gate.enter().unwrap();

        // A second caller finds the gate busy, then the holder leaves before
        // the request is recorded
        assert!(gate.try_acquire().is_none());
        assert!(!holder.release());

        let late = gate.request().expect("request must acquire a free gate");
        assert!(gate.is_busy());
        assert!(!late.release());
        assert!(!gate.is_busy());
    }

    #[test]
    fn test_settings_follow_config() {
        let config = PlayerConfig::from_toml_str(
            "retry_limit = 5\nplaying_timeout_ms = 250\nidle_timeout_ms = 750\n",
        )
        .unwrap();
        let settings = SessionSettings::from_config(&config);

        assert_eq!(settings.retry_limit, 5);
        assert_eq!(settings.playing_timeout, Duration::from_millis(250));
        assert_eq!(settings.idle_timeout, Duration::from_millis(750));
    }

    #[test]
    fn test_phase_serializes_snake_case() {
        let json = serde_json::to_string(&SessionPhase::Recovering).unwrap();
        assert_eq!(json, "\"recovering\"");
    }
}
