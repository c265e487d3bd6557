//! # Quaver Guild Player
//!
//! Per-guild voice playback orchestration:
//! - [`registry::SessionRegistry`]: one session per guild, created lazily
//! - [`connection::ConnectionManager`]: transport lifecycle state machine
//!   with bounded recovery
//! - [`playback::PlaybackEngine`]: turns the queue into sequential audio resources
//! - [`resolver`]: query classification, platform routing and the
//!   YouTube/SoundCloud plugins
//!
//! The voice transport, the playback device and the streaming subsystem
//! are collaborators behind the traits in [`transport`] and [`resolver`];
//! the command layer drives everything through [`session::Session`].

pub mod cache;
pub mod connection;
pub mod error;
pub mod playback;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod testing;
pub mod transport;

pub use error::{Error, Result};
pub use registry::SessionRegistry;
pub use session::Session;
