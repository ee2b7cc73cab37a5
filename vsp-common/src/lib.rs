//! # VSP Common Library
//!
//! Shared code for the voice session player crates:
//! - Error type
//! - Event types (SessionEvent enum) and EventBus
//! - Configuration file discovery
//! - Human-readable duration formatting

pub mod config;
pub mod error;
pub mod events;
pub mod human_time;

pub use error::{Error, Result};
