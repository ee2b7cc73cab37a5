//! Session state backup
//!
//! Stop, Pause and Resume mirror the session state to a [`StateBackup`] so a
//! destination can pick up where it left off after a restart. Backups are
//! best effort: failures are logged by the caller and never interrupt
//! playback.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use vsp_common::events::DestinationId;

use crate::error::Result;

/// Persisted view of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub destination: DestinationId,

    /// URL of the track the session was on
    pub current_url: Option<String>,

    /// URLs of the queued tracks, head first
    pub queue_urls: Vec<String>,

    pub playing: bool,
    pub paused: bool,

    /// Playback position of the current track in milliseconds
    pub position_ms: u64,

    pub loop_enabled: bool,
    pub queue_loop_enabled: bool,
    pub once_loop_enabled: bool,

    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,
}

/// Receiver of session snapshots
pub trait StateBackup: Send + Sync {
    /// Store the full session state (queue included)
    fn backup_data(&self, snapshot: &SessionSnapshot) -> Result<()>;

    /// Store the playing/paused status
    fn backup_status(&self, snapshot: &SessionSnapshot) -> Result<()> {
        self.backup_data(snapshot)
    }
}

/// Backup that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBackup;

impl StateBackup for NoopBackup {
    fn backup_data(&self, _snapshot: &SessionSnapshot) -> Result<()> {
        Ok(())
    }
}

/// One JSON file per destination under a directory
#[derive(Debug, Clone)]
pub struct JsonFileBackup {
    dir: PathBuf,
}

impl JsonFileBackup {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot file of `destination`
    pub fn path_for(&self, destination: DestinationId) -> PathBuf {
        self.dir.join(format!("{}.json", destination))
    }

    /// Load the last snapshot of `destination`, if one was written
    pub fn load(&self, destination: DestinationId) -> Result<Option<SessionSnapshot>> {
        let path = self.path_for(destination);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }
}

impl StateBackup for JsonFileBackup {
    fn backup_data(&self, snapshot: &SessionSnapshot) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        let path = self.path_for(snapshot.destination);
        let staging = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(snapshot)?;
        std::fs::write(&staging, json)?;
        std::fs::rename(&staging, &path)?;

        debug!("Session snapshot written to {}", path.display());
        Ok(())
    }
}
