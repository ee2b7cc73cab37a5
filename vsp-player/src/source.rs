//! Audio sources
//!
//! An [`AudioSource`] describes how to obtain bytes for one queue entry. It
//! hands out an [`AudioSourceDescriptor`]: either a URL that still needs
//! transcoding, or an already-decoded stream tagged with its container.
//!
//! Sources that memoize resolution metadata expose `invalidate_cache`; the
//! session calls it on the first failure of a track so the next attempt
//! fetches fresh data.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tracing::debug;

use crate::error::{Error, Result};

/// Byte stream handed over by a source
pub type SourceReader = Pin<Box<dyn AsyncRead + Send>>;

/// File extensions accepted as raw audio URLs
const RAW_AUDIO_EXTENSIONS: [&str; 5] = [".mp3", ".wav", ".wma", ".mov", ".mp4"];

/// Container of an already-decoded stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerType {
    /// Opus packets in an Ogg container
    OggOpus,
    /// Opus packets in a WebM container
    WebmOpus,
    /// Raw Opus packets
    Opus,
    /// Signed 16-bit little-endian PCM, 48kHz stereo
    Raw,
    /// Anything else; the transport has to probe it
    Arbitrary,
}

impl ContainerType {
    /// Guess the container from a file extension
    pub fn from_extension(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("ogg") | Some("opus") => ContainerType::OggOpus,
            Some("webm") => ContainerType::WebmOpus,
            Some("pcm") | Some("raw") => ContainerType::Raw,
            _ => ContainerType::Arbitrary,
        }
    }
}

impl std::fmt::Display for ContainerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerType::OggOpus => write!(f, "ogg/opus"),
            ContainerType::WebmOpus => write!(f, "webm/opus"),
            ContainerType::Opus => write!(f, "opus"),
            ContainerType::Raw => write!(f, "raw"),
            ContainerType::Arbitrary => write!(f, "arbitrary"),
        }
    }
}

/// How to obtain bytes for one queue entry
pub enum AudioSourceDescriptor {
    /// Remote media that must go through the transcoder
    Url { url: String },
    /// Stream that can be fed to the transport as-is
    Stream {
        stream: SourceReader,
        container: ContainerType,
    },
}

impl std::fmt::Debug for AudioSourceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioSourceDescriptor::Url { url } => f.debug_struct("Url").field("url", url).finish(),
            AudioSourceDescriptor::Stream { container, .. } => f
                .debug_struct("Stream")
                .field("container", container)
                .finish_non_exhaustive(),
        }
    }
}

/// Capability interface implemented by every kind of track
#[async_trait]
pub trait AudioSource: Send + Sync + std::fmt::Debug {
    /// Produce a descriptor for the next playback attempt
    async fn fetch(&self) -> Result<AudioSourceDescriptor>;

    /// Drop memoized resolution metadata. No-op for sources without a cache.
    fn invalidate_cache(&self) {}

    fn title(&self) -> &str;

    /// Identity of the track; retry bookkeeping is keyed on it
    fn url(&self) -> &str;

    /// Track length in seconds (0 when unknown)
    fn duration_seconds(&self) -> u64;

    fn is_live(&self) -> bool {
        false
    }
}

/// Direct link to a raw audio file, transcoded on the fly
#[derive(Debug, Clone)]
pub struct CustomStream {
    url: String,
    title: String,
}

impl CustomStream {
    /// Accepts only URLs ending in a known raw audio extension
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        if !is_raw_audio_url(&url) {
            return Err(Error::InvalidSource(format!("not a raw audio URL: {}", url)));
        }
        Ok(Self {
            url,
            title: "Custom stream".to_string(),
        })
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }
}

#[async_trait]
impl AudioSource for CustomStream {
    async fn fetch(&self) -> Result<AudioSourceDescriptor> {
        Ok(AudioSourceDescriptor::Url {
            url: self.url.clone(),
        })
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn duration_seconds(&self) -> u64 {
        0
    }
}

/// Whether a URL points at a raw audio file, judged by its extension
pub fn is_raw_audio_url(url: &str) -> bool {
    RAW_AUDIO_EXTENSIONS.iter().any(|ext| url.ends_with(ext))
}

/// Pre-encoded local file streamed without transcoding
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
    url: String,
    title: String,
    duration_seconds: u64,
}

impl LocalFile {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.is_file() {
            return Err(Error::InvalidSource(format!(
                "file does not exist: {}",
                path.display()
            )));
        }

        let title = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("Local file")
            .to_string();
        let url = format!("file://{}", path.display());

        Ok(Self {
            path,
            url,
            title,
            duration_seconds: 0,
        })
    }

    pub fn with_duration(mut self, seconds: u64) -> Self {
        self.duration_seconds = seconds;
        self
    }
}

#[async_trait]
impl AudioSource for LocalFile {
    async fn fetch(&self) -> Result<AudioSourceDescriptor> {
        let file = tokio::fs::File::open(&self.path).await.map_err(|e| {
            Error::Fetch(format!("cannot open {}: {}", self.path.display(), e))
        })?;

        Ok(AudioSourceDescriptor::Stream {
            stream: Box::pin(file),
            container: ContainerType::from_extension(&self.path),
        })
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn duration_seconds(&self) -> u64 {
        self.duration_seconds
    }
}

/// Memoizes the URL descriptor of a slow-to-resolve source
///
/// Stream descriptors are single-use and are never cached.
#[derive(Debug)]
pub struct CachingSource<S> {
    inner: S,
    cached_url: Mutex<Option<String>>,
}

impl<S: AudioSource> CachingSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cached_url: Mutex::new(None),
        }
    }

    pub fn is_cached(&self) -> bool {
        self.cached().is_some()
    }

    fn cached(&self) -> Option<String> {
        self.cached_url
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn store(&self, url: Option<String>) {
        *self
            .cached_url
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = url;
    }
}

#[async_trait]
impl<S: AudioSource> AudioSource for CachingSource<S> {
    async fn fetch(&self) -> Result<AudioSourceDescriptor> {
        if let Some(url) = self.cached() {
            debug!(track = self.inner.url(), "Using cached stream URL");
            return Ok(AudioSourceDescriptor::Url { url });
        }

        let descriptor = self.inner.fetch().await?;
        if let AudioSourceDescriptor::Url { url } = &descriptor {
            self.store(Some(url.clone()));
        }
        Ok(descriptor)
    }

    fn invalidate_cache(&self) {
        debug!(track = self.inner.url(), "Invalidating cached stream URL");
        self.store(None);
        self.inner.invalidate_cache();
    }

    fn title(&self) -> &str {
        self.inner.title()
    }

    fn url(&self) -> &str {
        self.inner.url()
    }

    fn duration_seconds(&self) -> u64 {
        self.inner.duration_seconds()
    }

    fn is_live(&self) -> bool {
        self.inner.is_live()
    }
}
