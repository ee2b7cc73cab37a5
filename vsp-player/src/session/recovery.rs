//! Failure recovery and queue advancement

use tracing::{debug, error, info, warn};
use vsp_common::events::SessionEvent;

use super::PlaybackSession;
use crate::transport::{TransportEvent, TransportState, TransportStatus};

impl PlaybackSession {
    /// Announce a failure of the current track and run recovery
    pub(super) async fn fail_current(&self, message: &str) {
        let url = self.current_track_url().unwrap_or_default();
        let disposition = self
            .state()
            .retry
            .upcoming_disposition(&url, self.settings().retry_limit);

        self.emit(SessionEvent::PlaybackFailed {
            destination: self.inner.destination,
            url,
            error: message.to_string(),
            disposition,
            timestamp: chrono::Utc::now(),
        });
        self.recover().await;
    }

    /// Bookkeeping after a failed attempt. The caller plays again afterwards.
    async fn recover(&self) {
        let Some(item) = self.state().current.clone() else {
            return;
        };
        let queue = &self.inner.queue;

        if queue.loop_enabled() {
            queue.set_loop_enabled(false);
        }
        if queue.len() == 1 && queue.queue_loop_enabled() {
            queue.set_queue_loop_enabled(false);
        }

        let url = item.source.url();
        let record = {
            let mut state = self.state();
            state.error = true;
            state.retry.record_failure(url)
        };
        if record.new_reference {
            debug!(track = url, "Invalidating cached resolution");
            item.source.invalidate_cache();
        }
        warn!(
            track = url,
            attempt = record.consecutive_failures,
            "Play() failed, ({} times)",
            record.consecutive_failures
        );

        self.stop();

        if record.consecutive_failures >= self.settings().retry_limit {
            info!(track = url, "Retry limit reached, skipping track");
            queue.next().await;
        }
    }

    /// Failure reported after playback started
    pub(super) async fn on_playback_error(&self, message: &str) {
        if self.state().stopped {
            debug!(error = message, "Ignoring playback error of a stopped session");
            return;
        }
        error!(error = message, "Playback error");
        self.fail_current(message).await;
        self.play().await;
    }

    pub(super) async fn on_transport_event(&self, epoch: u64, event: TransportEvent) {
        if self.state().handle_epoch != epoch {
            debug!(epoch, ?event, "Dropping event of a replaced transport handle");
            return;
        }

        match event {
            TransportEvent::Error { message } => self.on_playback_error(&message).await,
            TransportEvent::Unsubscribed => {
                info!("Transport unsubscribed, dropping handle");
                if let Some(handle) = self.handle() {
                    handle.stop(true);
                }
                self.state().transport = TransportState::Absent;
            }
        }
    }

    /// Clean end of the current stream: replay, advance, or disconnect
    pub(super) async fn on_stream_finished(&self) {
        let generation = self.state().generation;

        if let Some(handle) = self.handle() {
            if handle.status() != TransportStatus::Idle {
                let timeout = self.settings().idle_timeout;
                if let Err(e) = handle.await_state(TransportStatus::Idle, timeout).await {
                    warn!(error = %e, "Transport did not go idle after end of stream, forcing stop");
                    handle.stop(true);
                }
            }
        }

        if self.state().generation != generation {
            debug!("Session was stopped while finishing the stream");
            return;
        }

        info!("Stream finished");
        self.state().retry.clear();

        let queue = &self.inner.queue;
        if queue.loop_enabled() {
            self.play().await;
            return;
        }
        if queue.once_loop_enabled() {
            queue.set_once_loop_enabled(false);
            self.play().await;
            return;
        }

        queue.next().await;
        if queue.is_empty() {
            info!("Queue empty");
            self.emit(SessionEvent::QueueEmpty {
                destination: self.inner.destination,
                timestamp: chrono::Utc::now(),
            });
            self.disconnect();
        } else {
            self.play().await;
        }
    }
}
