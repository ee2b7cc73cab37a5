//! Session-related type definitions
//!
//! Supporting types carried by session notifications.

use serde::{Deserialize, Serialize};

/// Logical playback destination (one voice channel's guild)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationId(pub u64);

impl std::fmt::Display for DestinationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for DestinationId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// What the session will do after a failed playback attempt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailureDisposition {
    /// The same track will be attempted again
    Retry,
    /// The retry limit is reached; the queue advances past the track
    Skip,
}

impl std::fmt::Display for FailureDisposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureDisposition::Retry => write!(f, "retry"),
            FailureDisposition::Skip => write!(f, "skip"),
        }
    }
}

/// What is left in the queue after the current track
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemainingQueue {
    /// Track loop is on; the current track repeats
    Looping,
    /// Tracks waiting behind the current one
    Tracks {
        count: usize,
        /// Total length of the waiting tracks (`H:MM:SS`, hour omitted when zero)
        duration_label: String,
    },
}

/// Summary published when a track starts playing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NowPlaying {
    pub title: String,
    pub url: String,
    /// `MM:SS`, `live` or `unknown`
    pub duration_label: String,
    pub requested_by: Option<String>,
    /// Title of the track that plays next, if any
    pub up_next: Option<String>,
    pub remaining: RemainingQueue,
}
