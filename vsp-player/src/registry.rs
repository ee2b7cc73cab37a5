//! One playback session per destination

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;
use vsp_common::events::DestinationId;

use crate::queue::Queue;
use crate::session::{PlaybackSession, SessionContext};
use crate::transport::Transport;

/// Sessions keyed by destination, created on first use
pub struct SessionRegistry {
    ctx: SessionContext,
    sessions: RwLock<HashMap<DestinationId, PlaybackSession>>,
}

impl SessionRegistry {
    pub fn new(ctx: SessionContext) -> Self {
        Self {
            ctx,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Session of `destination`, created with the given collaborators if it
    /// does not exist yet. Existing sessions keep their original collaborators.
    pub async fn get_or_create(
        &self,
        destination: DestinationId,
        transport: Arc<dyn Transport>,
        queue: Arc<dyn Queue>,
    ) -> PlaybackSession {
        if let Some(session) = self.sessions.read().await.get(&destination) {
            return session.clone();
        }

        let mut sessions = self.sessions.write().await;
        sessions
            .entry(destination)
            .or_insert_with(|| {
                info!(%destination, "Creating playback session");
                PlaybackSession::new(destination, transport, queue, self.ctx.clone())
            })
            .clone()
    }

    pub async fn get(&self, destination: DestinationId) -> Option<PlaybackSession> {
        self.sessions.read().await.get(&destination).cloned()
    }

    /// Tear a destination down: disconnect its session and forget it
    pub async fn remove(&self, destination: DestinationId) -> bool {
        let removed = self.sessions.write().await.remove(&destination);
        match removed {
            Some(session) => {
                session.disconnect();
                info!(%destination, "Playback session removed");
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn destinations(&self) -> Vec<DestinationId> {
        let mut destinations: Vec<_> = self.sessions.read().await.keys().copied().collect();
        destinations.sort();
        destinations
    }
}
