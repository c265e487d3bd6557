//! # Quaver Common Library
//!
//! Shared code for the Quaver guild player:
//! - Data model (songs, playlists, queue items, platform tags)
//! - Event types (QuaverEvent enum) and the broadcast EventBus
//! - Error taxonomy shared across crates
//! - Configuration loading
//! - Human-readable time helpers

pub mod config;
pub mod error;
pub mod events;
pub mod human_time;
pub mod model;

pub use config::Config;
pub use error::{Error, Result};
pub use events::{EventBus, QuaverEvent};
