//! # Voice Session Player Library (vsp-player)
//!
//! Per-destination playback sessions that stream queued tracks into a
//! real-time audio transport.
//!
//! **Pipeline:** queue head -> [`source::AudioSource`] descriptor ->
//! [`resolver::StreamResolver`] (transcoder + bounded pipe) ->
//! [`transport::TransportHandle`], with bounded retry and queue advancement
//! driven by [`session::PlaybackSession`].

pub mod backup;
pub mod config;
pub mod error;
pub mod queue;
pub mod registry;
pub mod resolver;
pub mod retry;
pub mod session;
pub mod source;
pub mod transport;

pub use error::{Error, Result};
pub use registry::SessionRegistry;
pub use session::{PlaybackSession, SessionContext, SessionPhase, SessionSettings};
