//! Audio transport abstraction
//!
//! A [`Transport`] owns the connection to one destination. While connected
//! it hands out a single [`TransportHandle`] that accepts playable resources
//! and reports its status through a watch channel.

pub mod sink;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{broadcast, watch};

use crate::error::{Error, Result};
use crate::resolver::PlayableResource;

pub use sink::{SinkHandle, SinkTransport};

/// Playback status reported by a transport handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportStatus {
    Idle,
    Buffering,
    Playing,
    Paused,
    /// Paused by the transport itself (no listeners)
    AutoPaused,
}

impl fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportStatus::Idle => write!(f, "idle"),
            TransportStatus::Buffering => write!(f, "buffering"),
            TransportStatus::Playing => write!(f, "playing"),
            TransportStatus::Paused => write!(f, "paused"),
            TransportStatus::AutoPaused => write!(f, "autopaused"),
        }
    }
}

/// Out-of-band notifications from a transport handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Playback of the current resource failed
    Error { message: String },
    /// The destination went away; the handle is unusable
    Unsubscribed,
}

/// Connection to a destination
pub trait Transport: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Create (or return) the playback handle for this connection
    fn create_connection(&self) -> Result<Arc<dyn TransportHandle>>;

    /// Tear the connection down. Returns false when there was nothing to destroy.
    fn destroy_connection(&self) -> bool;
}

/// Player bound to a transport connection
#[async_trait]
pub trait TransportHandle: Send + Sync {
    fn status(&self) -> TransportStatus;

    /// Receiver observing every status change
    fn watch_status(&self) -> watch::Receiver<TransportStatus>;

    /// Start playing `resource`, replacing whatever was playing
    fn play(&self, resource: PlayableResource) -> Result<()>;

    /// Stop playback. Returns true if something was stopped.
    fn stop(&self, force: bool) -> bool;

    fn pause(&self) -> bool;

    fn unpause(&self) -> bool;

    /// Time spent playing the current resource
    fn playback_duration(&self) -> Duration;

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;

    /// Wait until the handle reports `target`, for at most `timeout`
    async fn await_state(&self, target: TransportStatus, timeout: Duration) -> Result<()> {
        let mut status = self.watch_status();
        let reached = tokio::time::timeout(timeout, async {
            status.wait_for(|s| *s == target).await.map(|_| ())
        })
        .await;
        match reached {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(Error::Transport(format!(
                "status channel closed while waiting for {target}"
            ))),
            Err(_) => Err(Error::StateTimeout {
                target,
                waited: timeout,
            }),
        }
    }
}

/// Lifecycle of a session's transport handle
#[derive(Clone, Default)]
pub enum TransportState {
    #[default]
    Absent,
    Created(Arc<dyn TransportHandle>),
}

impl TransportState {
    pub fn handle(&self) -> Option<&Arc<dyn TransportHandle>> {
        match self {
            TransportState::Absent => None,
            TransportState::Created(handle) => Some(handle),
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, TransportState::Created(_))
    }
}

impl fmt::Debug for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportState::Absent => write!(f, "Absent"),
            TransportState::Created(handle) => write!(f, "Created({})", handle.status()),
        }
    }
}
