//! Play: resolve the queue head and hand it to the transport

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn, Instrument};
use vsp_common::events::{NowPlaying, RemainingQueue, SessionEvent};
use vsp_common::human_time::{format_queue_length, format_track_length};

use super::{PlaybackSession, Signal};
use crate::error::{Error, Result};
use crate::queue::QueueItem;
use crate::resolver::StreamEvent;
use crate::transport::{TransportHandle, TransportState, TransportStatus};

/// An attempt the transport accepted
pub(super) struct StartedAttempt {
    generation: u64,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    /// Terminal event observed before playback was confirmed
    early: Option<StreamEvent>,
}

impl PlaybackSession {
    /// Play the queue head.
    ///
    /// No-op (logged) unless the destination is connected, the transport is
    /// idle or absent and the queue is not empty. Failures are retried up to
    /// the retry limit before the queue advances.
    pub async fn play(&self) {
        let span = self.inner.span.clone();
        self.play_coalesced().instrument(span).await
    }

    async fn play_coalesced(&self) {
        loop {
            let Some(guard) = self.inner.play_gate.enter() else {
                debug!("Play() already in flight, request deferred");
                return;
            };

            let started = self.run_attempts().await;
            let replay = guard.release();

            if let Some(started) = started {
                self.watch_stream(started);
            }
            if !replay {
                return;
            }
        }
    }

    /// Attempt the head until it starts, the attempt is abandoned, or recovery
    /// runs out of tracks.
    async fn run_attempts(&self) -> Option<StartedAttempt> {
        loop {
            if let Err(reason) = self.check_play_preconditions() {
                warn!("Play() called but operated nothing: {}", reason);
                return None;
            }

            match self.attempt().await {
                Ok(started) => return started,
                Err(e) if e.is_rate_limited() => {
                    error!(error = %e, "Rate limit detected");
                    self.emit(SessionEvent::RateLimited {
                        destination: self.inner.destination,
                        error: e.to_string(),
                        timestamp: chrono::Utc::now(),
                    });
                    self.stop();
                    return None;
                }
                Err(e) => {
                    error!(error = %e, "Play() failed");
                    self.fail_current(&e.to_string()).await;
                }
            }
        }
    }

    fn check_play_preconditions(&self) -> std::result::Result<(), &'static str> {
        if !self.is_connecting() {
            return Err("not connected");
        }
        if let Some(handle) = self.handle() {
            if handle.status() != TransportStatus::Idle {
                return Err("transport is busy");
            }
        }
        if self.inner.queue.is_empty() {
            return Err("queue is empty");
        }
        Ok(())
    }

    /// One resolve-and-start attempt of the queue head.
    ///
    /// `Ok(None)` means the attempt was abandoned without a failure.
    async fn attempt(&self) -> Result<Option<StartedAttempt>> {
        let Some(item) = self.inner.queue.head() else {
            return Ok(None);
        };
        self.state().current = Some(item.clone());

        let source = item.source.clone();
        info!(track = source.url(), "Play() called");
        self.emit(SessionEvent::PlaybackPreparing {
            destination: self.inner.destination,
            title: source.title().to_string(),
            duration_label: format_track_length(source.duration_seconds()),
            timestamp: chrono::Utc::now(),
        });

        let handle = self.ensure_handle()?;

        let descriptor = source.fetch().await?;
        let mut resource = self.inner.ctx.resolver.resolve(descriptor)?;
        info!("Stream edges: {}", resource.describe_edges());

        if !self.is_connecting() {
            info!(track = source.url(), "Disconnected while preparing, abandoning attempt");
            return Ok(None);
        }

        let generation = {
            let mut state = self.state();
            state.error = false;
            state.stopped = false;
            state.generation += 1;
            state.generation
        };

        let mut events = resource
            .take_events()
            .ok_or_else(|| Error::Resolution("resource events already taken".to_string()))?;
        handle.play(resource)?;

        let timeout = self.settings().playing_timeout;
        let early = tokio::select! {
            entered = handle.await_state(TransportStatus::Playing, timeout) => match entered {
                Ok(()) => None,
                Err(e) if e.is_timeout() => {
                    warn!(error = %e, "Transport did not confirm playback, proceeding");
                    None
                }
                Err(e) => return Err(e),
            },
            event = events.recv() => match event {
                Some(StreamEvent::Error { origin, message }) => {
                    return Err(Error::Resolution(format!("{origin} stream failed: {message}")));
                }
                Some(StreamEvent::End) => Some(StreamEvent::End),
                None => {
                    debug!("Transport dropped the resource before playback, abandoning attempt");
                    return Ok(None);
                }
            },
        };

        info!(track = source.url(), "Play() started successfully");
        self.emit(SessionEvent::PlaybackStarted {
            destination: self.inner.destination,
            now_playing: self.now_playing(&item),
            timestamp: chrono::Utc::now(),
        });

        Ok(Some(StartedAttempt {
            generation,
            events,
            early,
        }))
    }

    /// Current handle, creating one (and its event listener) when absent
    fn ensure_handle(&self) -> Result<Arc<dyn TransportHandle>> {
        if let Some(handle) = self.handle() {
            return Ok(handle);
        }

        let handle = self.inner.transport.create_connection()?;
        let epoch = {
            let mut state = self.state();
            state.handle_epoch += 1;
            state.transport = TransportState::Created(handle.clone());
            state.handle_epoch
        };
        debug!(epoch, "Transport handle created");

        let mut events = handle.subscribe();
        let signals = self.inner.signals.clone();
        tokio::spawn(
            async move {
                loop {
                    match events.recv().await {
                        Ok(event) => {
                            if signals.send(Signal::Transport { epoch, event }).is_err() {
                                break;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Transport event listener lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
            .instrument(self.inner.span.clone()),
        );

        Ok(handle)
    }

    /// Route the terminal events of a started attempt to the signal task
    fn watch_stream(&self, started: StartedAttempt) {
        let StartedAttempt {
            generation,
            mut events,
            early,
        } = started;

        if let Some(event) = early {
            self.send_signal(Signal::Stream { generation, event });
            return;
        }

        let signals = self.inner.signals.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if signals.send(Signal::Stream { generation, event }).is_err() {
                    break;
                }
            }
        });
    }

    fn now_playing(&self, item: &QueueItem) -> NowPlaying {
        let queue = &self.inner.queue;
        let source = &item.source;
        let seconds = source.duration_seconds();

        let duration_label = if source.is_live() {
            "live".to_string()
        } else if seconds == 0 {
            "unknown".to_string()
        } else {
            format_track_length(seconds)
        };

        let title_at = |index: usize| queue.get(index).map(|entry| entry.source.title().to_string());
        let up_next = if queue.loop_enabled() {
            title_at(0)
        } else if queue.len() >= 2 {
            title_at(1)
        } else if queue.queue_loop_enabled() {
            title_at(0)
        } else {
            None
        };

        let remaining = if queue.loop_enabled() {
            RemainingQueue::Looping
        } else {
            RemainingQueue::Tracks {
                count: queue.len().saturating_sub(1),
                duration_label: format_queue_length(
                    queue.total_remaining_seconds().saturating_sub(seconds),
                ),
            }
        };

        NowPlaying {
            title: source.title().to_string(),
            url: source.url().to_string(),
            duration_label,
            requested_by: item.requested_by.clone(),
            up_next,
            remaining,
        }
    }
}
