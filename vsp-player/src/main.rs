//! Voice Session Player (vsp-player) - Main entry point
//!
//! Plays a list of URLs and local files for one destination into a file or
//! stdout, using the same session core a chat bot would drive.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vsp_common::events::{DestinationId, SessionEvent};

use vsp_player::backup::JsonFileBackup;
use vsp_player::config::{LoggingConfig, PlayerConfig};
use vsp_player::queue::{Queue, QueueItem, TrackQueue};
use vsp_player::source::{AudioSource, CachingSource, CustomStream, LocalFile};
use vsp_player::transport::SinkTransport;
use vsp_player::{SessionContext, SessionRegistry};

/// Command-line arguments for vsp-player
#[derive(Parser, Debug)]
#[command(name = "vsp-player")]
#[command(about = "Queue-driven audio session player")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "VSP_CONFIG")]
    config: Option<PathBuf>,

    /// Destination the session plays for
    #[arg(short, long, default_value = "0", env = "VSP_DESTINATION")]
    destination: u64,

    /// Output file ("-" for stdout)
    #[arg(short, long, default_value = "-")]
    output: String,

    /// Name recorded as the requester of every input
    #[arg(long)]
    requested_by: Option<String>,

    /// Repeat the first track
    #[arg(long)]
    loop_track: bool,

    /// Re-append finished tracks to the end of the queue
    #[arg(long)]
    loop_queue: bool,

    /// Raw audio URLs or local file paths, played in order.
    /// When empty, the queue of the last backup is resumed.
    inputs: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config =
        PlayerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    init_logging(&config.logging)?;

    let destination = DestinationId(args.destination);
    info!("Starting vsp-player for destination {}", destination);

    let queue = Arc::new(TrackQueue::new());
    let inputs = if args.inputs.is_empty() {
        resumed_inputs(&config, destination, &queue)?
    } else {
        args.inputs.clone()
    };
    if inputs.is_empty() {
        bail!("Nothing to play: no inputs given and no backup to resume");
    }

    for input in &inputs {
        let source = build_source(input).with_context(|| format!("Invalid input '{}'", input))?;
        let mut item = QueueItem::new(source);
        if let Some(name) = &args.requested_by {
            item = item.requested_by(name.clone());
        }
        queue.push(item);
    }
    if args.loop_track {
        queue.set_loop_enabled(true);
    }
    if args.loop_queue {
        queue.set_queue_loop_enabled(true);
    }
    info!("Queued {} track(s)", queue.len());

    let transport = Arc::new(open_output(&args.output).await?);
    let registry = SessionRegistry::new(SessionContext::from_config(&config));
    let mut events = registry.context().events.subscribe();

    let session = registry
        .get_or_create(destination, transport, queue.clone())
        .await;
    session.play().await;

    if !session.is_playing() && queue.is_empty() {
        warn!("Nothing left to play");
        registry.remove(destination).await;
        return Ok(());
    }

    let finished = tokio::select! {
        finished = wait_for_end(&mut events, destination) => finished,
        _ = shutdown_signal() => false,
    };
    if !finished {
        registry.remove(destination).await;
    }

    info!("vsp-player shutdown complete");
    Ok(())
}

/// Install the tracing subscriber: stderr always, a log file when configured
fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "vsp_player={level},vsp_common={level}",
            level = logging.level
        ))
    });

    let file_layer = match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

fn build_source(input: &str) -> vsp_player::Result<Arc<dyn AudioSource>> {
    if input.starts_with("http://") || input.starts_with("https://") {
        Ok(Arc::new(CachingSource::new(CustomStream::new(input)?)))
    } else {
        let path = input.strip_prefix("file://").unwrap_or(input);
        Ok(Arc::new(LocalFile::new(PathBuf::from(path))?))
    }
}

/// Queue URLs and loop flags of the last backup of `destination`
fn resumed_inputs(
    config: &PlayerConfig,
    destination: DestinationId,
    queue: &TrackQueue,
) -> Result<Vec<String>> {
    let Some(dir) = &config.backup_dir else {
        return Ok(Vec::new());
    };
    let snapshot = JsonFileBackup::new(dir)
        .load(destination)
        .context("Failed to read session backup")?;

    match snapshot {
        Some(snapshot) => {
            info!(
                "Resuming {} track(s) from backup taken at {}",
                snapshot.queue_urls.len(),
                snapshot.timestamp
            );
            queue.set_loop_enabled(snapshot.loop_enabled);
            queue.set_queue_loop_enabled(snapshot.queue_loop_enabled);
            queue.set_once_loop_enabled(snapshot.once_loop_enabled);
            Ok(snapshot.queue_urls)
        }
        None => Ok(Vec::new()),
    }
}

async fn open_output(output: &str) -> Result<SinkTransport> {
    if output == "-" {
        return Ok(SinkTransport::stdout());
    }
    SinkTransport::create_file(Path::new(output))
        .await
        .with_context(|| format!("Failed to open output {}", output))
}

/// Log session notifications until the session is done.
///
/// Returns true when the session ended on its own.
async fn wait_for_end(
    events: &mut tokio::sync::broadcast::Receiver<SessionEvent>,
    destination: DestinationId,
) -> bool {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!("Missed {} session notification(s)", skipped);
                continue;
            }
            Err(RecvError::Closed) => return false,
        };
        if event.destination() != destination {
            continue;
        }

        if let Ok(json) = serde_json::to_string(&event) {
            debug!("Session event: {}", json);
        }

        match event {
            SessionEvent::PlaybackPreparing { title, duration_label, .. } => {
                info!("Preparing {} ({})", title, duration_label);
            }
            SessionEvent::PlaybackStarted { now_playing, .. } => {
                info!(
                    "Now playing {} [{}], up next: {}",
                    now_playing.title,
                    now_playing.duration_label,
                    now_playing.up_next.as_deref().unwrap_or("nothing queued")
                );
            }
            SessionEvent::PlaybackFailed { error, disposition, .. } => {
                warn!("Playback failed ({}), will {}", error, disposition);
            }
            SessionEvent::RateLimited { error, .. } => {
                error!("Rate limited by upstream: {}", error);
                return false;
            }
            SessionEvent::QueueEmpty { .. } => info!("Queue finished"),
            SessionEvent::Disconnected { .. } => return true,
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
