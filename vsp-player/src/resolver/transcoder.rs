//! External transcoder process
//!
//! Remote media is handed to a transcoder (ffmpeg by default) which reads the
//! URL itself, reconnecting on network and HTTP errors, and writes Opus in an
//! Ogg container to stdout. Stdout is pumped into a bounded pipe.

use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::{debug, warn};

use super::pipe::{bounded_pipe, ChunkStream, PumpOutcome};
use crate::config::{BufferConfig, TranscoderConfig};
use crate::error::{Error, Result};
use crate::source::ContainerType;

/// Build the transcoder argument list for `url`
pub fn transcoder_args(config: &TranscoderConfig, url: &str) -> Vec<String> {
    vec![
        "-reconnect".into(),
        "1".into(),
        "-reconnect_streamed".into(),
        "1".into(),
        "-reconnect_on_network_error".into(),
        "1".into(),
        "-reconnect_on_http_error".into(),
        "4xx,5xx".into(),
        "-reconnect_delay_max".into(),
        config.reconnect_delay_max_secs.to_string(),
        "-i".into(),
        url.to_string(),
        "-analyzeduration".into(),
        "0".into(),
        "-loglevel".into(),
        "0".into(),
        "-acodec".into(),
        config.codec.clone(),
        "-f".into(),
        config.format.clone(),
        "-ar".into(),
        config.sample_rate.to_string(),
        "-ac".into(),
        config.channels.to_string(),
        "pipe:1".into(),
    ]
}

/// Container produced by the configured output format
pub fn output_container(config: &TranscoderConfig) -> ContainerType {
    match config.format.as_str() {
        "opus" | "ogg" => ContainerType::OggOpus,
        "webm" => ContainerType::WebmOpus,
        "s16le" => ContainerType::Raw,
        _ => ContainerType::Arbitrary,
    }
}

/// Spawn the transcoder for `url` and return its buffered output.
///
/// A non-zero exit (or a failed read of stdout) is delivered as the final
/// `Err` item of the returned stream. Dropping the stream kills the process.
pub fn spawn_transcoder(
    config: &TranscoderConfig,
    buffer: &BufferConfig,
    url: &str,
) -> Result<ChunkStream> {
    let mut child = Command::new(&config.program)
        .args(transcoder_args(config, url))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| Error::TranscoderSpawn {
            program: config.program.clone(),
            source,
        })?;

    let stdout = child.stdout.take().ok_or_else(|| {
        Error::Resolution(format!("{} started without a stdout pipe", config.program))
    })?;

    debug!(program = %config.program, pid = ?child.id(), url, "Transcoder started");

    let (sender, stream) = bounded_pipe(buffer);
    let program = config.program.clone();
    tokio::spawn(async move {
        match sender.pump(stdout).await {
            PumpOutcome::Finished => {
                if let Some(error) = exit_failure(&program, &mut child).await {
                    warn!("{}", error);
                    sender.fail(error).await;
                }
            }
            PumpOutcome::ReadError(e) => {
                warn!(program = %program, error = %e, "Reading transcoder output failed");
                sender.fail(e).await;
            }
            PumpOutcome::ReceiverGone => {
                debug!(program = %program, "Consumer dropped transcoder output, stopping process");
                if let Err(e) = child.kill().await {
                    debug!(program = %program, error = %e, "Transcoder already gone");
                }
            }
        }
    });

    Ok(stream)
}

async fn exit_failure(program: &str, child: &mut Child) -> Option<std::io::Error> {
    match child.wait().await {
        Ok(status) if status.success() => None,
        Ok(status) => Some(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("{program} exited with {status}"),
        )),
        Err(e) => Some(e),
    }
}
