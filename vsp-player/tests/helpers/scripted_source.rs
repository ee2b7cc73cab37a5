//! Audio sources with scripted fetch outcomes

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;
use tokio_util::io::StreamReader;
use vsp_player::source::{AudioSource, AudioSourceDescriptor, ContainerType};
use vsp_player::{Error, Result};

#[derive(Debug, Clone)]
enum Outcome {
    /// In-memory Ogg stream that ends cleanly
    Stream,
    /// Stream that fails after its first chunk
    BrokenStream,
    /// URL descriptor; resolution goes through the transcoder
    Url,
    /// Every fetch fails with this message
    FailAlways(String),
    /// The first `n` fetches fail with this message
    FailTimes(usize, String),
}

#[derive(Debug)]
pub struct ScriptedSource {
    url: String,
    title: String,
    seconds: u64,
    outcome: Outcome,
    fetches: AtomicUsize,
    invalidations: AtomicUsize,
    gate: Option<Arc<Notify>>,
    fetch_started: Arc<Notify>,
}

impl ScriptedSource {
    pub fn new(name: &str) -> Self {
        Self {
            url: format!("http://media.test/{name}.mp3"),
            title: name.to_string(),
            seconds: 180,
            outcome: Outcome::Stream,
            fetches: AtomicUsize::new(0),
            invalidations: AtomicUsize::new(0),
            gate: None,
            fetch_started: Arc::new(Notify::new()),
        }
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.outcome = Outcome::FailAlways(message.to_string());
        self
    }

    pub fn failing_times(mut self, times: usize, message: &str) -> Self {
        self.outcome = Outcome::FailTimes(times, message.to_string());
        self
    }

    pub fn broken_stream(mut self) -> Self {
        self.outcome = Outcome::BrokenStream;
        self
    }

    pub fn via_url(mut self) -> Self {
        self.outcome = Outcome::Url;
        self
    }

    pub fn with_duration(mut self, seconds: u64) -> Self {
        self.seconds = seconds;
        self
    }

    /// Fetch blocks until the returned gate is notified
    pub fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }

    /// Resolves once a fetch has begun
    pub async fn wait_for_fetch(&self) {
        self.fetch_started.notified().await;
    }
}

#[async_trait]
impl AudioSource for ScriptedSource {
    async fn fetch(&self) -> Result<AudioSourceDescriptor> {
        let attempt = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        self.fetch_started.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        match &self.outcome {
            Outcome::Stream => Ok(AudioSourceDescriptor::Stream {
                stream: Box::pin(io::Cursor::new(b"OggS-test-payload".to_vec())),
                container: ContainerType::OggOpus,
            }),
            Outcome::BrokenStream => {
                let chunks = futures::stream::iter(vec![
                    Ok(Bytes::from_static(b"OggS")),
                    Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset")),
                ]);
                Ok(AudioSourceDescriptor::Stream {
                    stream: Box::pin(StreamReader::new(chunks)),
                    container: ContainerType::OggOpus,
                })
            }
            Outcome::Url => Ok(AudioSourceDescriptor::Url {
                url: self.url.clone(),
            }),
            Outcome::FailAlways(message) => Err(Error::Fetch(message.clone())),
            Outcome::FailTimes(times, message) if attempt <= *times => {
                Err(Error::Fetch(message.clone()))
            }
            Outcome::FailTimes(..) => Ok(AudioSourceDescriptor::Stream {
                stream: Box::pin(io::Cursor::new(b"OggS-test-payload".to_vec())),
                container: ContainerType::OggOpus,
            }),
        }
    }

    fn invalidate_cache(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn duration_seconds(&self) -> u64 {
        self.seconds
    }
}
