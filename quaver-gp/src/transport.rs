//! Voice transport and playback device seams
//!
//! The real-time transport (gateway, websocket, UDP media path) and the
//! audio device that streams into it live outside this crate. The player
//! consumes them through these traits; each exposes its lifecycle as a
//! `tokio::sync::watch` stream of discrete states so the state machines in
//! [`crate::connection`] and [`crate::playback`] can be driven by a fake
//! implementation in tests.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::sync::watch;

use quaver_common::model::{ConnectionState, GuildId, PlaybackState, Song, StreamKind};

use crate::error::Result;

/// A voice channel to join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelRef {
    pub guild_id: GuildId,
    pub channel_id: u64,
}

/// A playable audio stream handed to the device.
///
/// The byte stream is opaque; `kind` tells the device whether it can pass
/// the container through or must probe and transcode.
pub struct AudioResource {
    pub song: Song,
    pub kind: StreamKind,
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
}

impl AudioResource {
    pub fn new(song: Song, kind: StreamKind, reader: Box<dyn AsyncRead + Send + Unpin>) -> Self {
        Self { song, kind, reader }
    }
}

impl fmt::Debug for AudioResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioResource")
            .field("song", &self.song.id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// One live voice connection.
///
/// `rejoin_attempts` is tracked by the transport itself and resets when a
/// rejoin succeeds, mirroring the underlying voice library's counter.
pub trait VoiceConnection: Send + Sync {
    fn state(&self) -> ConnectionState;

    /// Watch stream of lifecycle states. The receiver always holds the
    /// current state; `changed()` wakes on every transition.
    fn state_watch(&self) -> watch::Receiver<ConnectionState>;

    /// Ask the transport to re-establish the session.
    fn rejoin(&self);

    fn rejoin_attempts(&self) -> u32;

    /// Destroy the connection. Idempotent; ends in `Destroyed`.
    fn destroy(&self);
}

/// The device that streams an audio resource over the transport.
pub trait AudioDevice: Send + Sync {
    /// Start playing a resource, replacing whatever was playing.
    fn play(&self, resource: AudioResource);

    fn pause(&self);
    fn resume(&self);

    /// Stop playback and drop the current resource. Idempotent.
    fn stop(&self);

    fn state(&self) -> PlaybackState;
    fn state_watch(&self) -> watch::Receiver<PlaybackState>;
}

/// Connection plus the device wired to it, as returned by a gateway join.
pub struct VoiceLink {
    pub connection: Arc<dyn VoiceConnection>,
    pub device: Arc<dyn AudioDevice>,
}

/// Entry point into the voice transport: joins a channel and hands back the
/// connection/device pair for it.
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    async fn join(&self, channel: ChannelRef) -> Result<VoiceLink>;
}
