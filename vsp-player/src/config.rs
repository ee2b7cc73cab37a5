//! Configuration management for vsp-player
//!
//! Bootstrap TOML configuration with a built-in default for every field.
//!
//! # Settings Sources Priority
//!
//! 1. Command-line argument (`--config`)
//! 2. Environment variable (`VSP_CONFIG`)
//! 3. Platform config directory (`vsp/config.toml`)
//! 4. Built-in defaults (code constants)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::error::{Error, Result};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "VSP_CONFIG";

/// Player configuration loaded from TOML
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Consecutive failures of one track before it is skipped
    pub retry_limit: u32,

    /// Bounded wait for the transport to confirm playback (milliseconds)
    pub playing_timeout_ms: u64,

    /// Bounded wait for the transport to go idle after end of stream (milliseconds)
    pub idle_timeout_ms: u64,

    /// Capacity of the session notification bus
    pub event_capacity: usize,

    /// Directory for session state snapshots (disabled when unset)
    pub backup_dir: Option<PathBuf>,

    pub transcoder: TranscoderConfig,
    pub buffer: BufferConfig,
    pub logging: LoggingConfig,
}

/// External transcoder settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscoderConfig {
    /// Executable to spawn
    pub program: String,

    /// Upper bound on the transcoder's reconnect back-off (seconds)
    pub reconnect_delay_max_secs: u32,

    pub sample_rate: u32,
    pub channels: u8,
    pub codec: String,
    pub format: String,
}

/// In-memory buffer between the transcoder and the transport
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Maximum bytes held before the transcoder is back-pressured
    pub high_water_mark_bytes: usize,

    /// Read size for a single chunk
    pub chunk_bytes: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            retry_limit: 3,
            playing_timeout_ms: 100_000,
            idle_timeout_ms: 100_000,
            event_capacity: 100,
            backup_dir: None,
            transcoder: TranscoderConfig::default(),
            buffer: BufferConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            reconnect_delay_max_secs: 30,
            sample_rate: 48_000,
            channels: 2,
            codec: "libopus".to_string(),
            format: "opus".to_string(),
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            high_water_mark_bytes: 512 * 1024,
            chunk_bytes: 16 * 1024,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl PlayerConfig {
    /// Load configuration following the priority order above.
    ///
    /// Falls back to defaults when no file is found.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        match vsp_common::config::resolve_config_path(cli_path, CONFIG_ENV_VAR)? {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                let config: PlayerConfig = vsp_common::config::load_toml(&path)?;
                config.validate()?;
                Ok(config)
            }
            None => {
                info!("No configuration file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PlayerConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall or spin the session
    pub fn validate(&self) -> Result<()> {
        if self.retry_limit == 0 {
            return Err(Error::Config("retry_limit must be at least 1".to_string()));
        }
        if self.event_capacity == 0 {
            return Err(Error::Config("event_capacity must be at least 1".to_string()));
        }
        if self.buffer.chunk_bytes == 0 {
            return Err(Error::Config("buffer.chunk_bytes must be at least 1".to_string()));
        }
        if self.buffer.chunk_bytes > self.buffer.high_water_mark_bytes {
            return Err(Error::Config(format!(
                "buffer.chunk_bytes ({}) exceeds buffer.high_water_mark_bytes ({})",
                self.buffer.chunk_bytes, self.buffer.high_water_mark_bytes
            )));
        }
        if self.transcoder.program.trim().is_empty() {
            return Err(Error::Config("transcoder.program must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn playing_timeout(&self) -> Duration {
        Duration::from_millis(self.playing_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}
