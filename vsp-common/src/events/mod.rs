//! Event types for the VSP notification system
//!
//! Provides shared session event definitions and the EventBus that carries
//! them to messaging collaborators.

mod session_types;

pub use session_types::{DestinationId, FailureDisposition, NowPlaying, RemainingQueue};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Session notifications
///
/// Emitted by playback sessions and consumed by whatever formats messages
/// for the destination. Serializable so they can be forwarded as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    /// A track is being fetched and resolved
    PlaybackPreparing {
        destination: DestinationId,
        title: String,
        /// Track length as `MM:SS`
        duration_label: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The transport confirmed playback of a track
    PlaybackStarted {
        destination: DestinationId,
        now_playing: NowPlaying,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A playback attempt failed
    ///
    /// `disposition` tells whether the track will be retried or skipped.
    PlaybackFailed {
        destination: DestinationId,
        url: String,
        error: String,
        disposition: FailureDisposition,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The queue ran out after a track finished; the session disconnects
    QueueEmpty {
        destination: DestinationId,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The upstream service rejected a fetch with HTTP 429
    ///
    /// Playback is stopped without retrying.
    RateLimited {
        destination: DestinationId,
        error: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The destination link was torn down
    Disconnected {
        destination: DestinationId,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl SessionEvent {
    /// Destination the event belongs to
    pub fn destination(&self) -> DestinationId {
        match self {
            SessionEvent::PlaybackPreparing { destination, .. }
            | SessionEvent::PlaybackStarted { destination, .. }
            | SessionEvent::PlaybackFailed { destination, .. }
            | SessionEvent::QueueEmpty { destination, .. }
            | SessionEvent::RateLimited { destination, .. }
            | SessionEvent::Disconnected { destination, .. } => *destination,
        }
    }
}

/// Central event distribution bus
///
/// Thin wrapper around `tokio::sync::broadcast`. Slow subscribers lose the
/// oldest events once `capacity` is exceeded.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Examples
    ///
    /// ```
    /// use vsp_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: SessionEvent,
    ) -> Result<usize, broadcast::error::SendError<SessionEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
