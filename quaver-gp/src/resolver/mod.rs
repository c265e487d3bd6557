//! Media resolution: platform plugins and the router that picks between them
//!
//! Each source platform ships a [`MediaResolver`] implementation. Resolvers
//! register into a [`ResolverRegistry`] keyed by platform tag; adding a
//! platform means registering an implementation, never editing dispatch
//! logic. The [`router::PlatformRouter`] classifies queries and applies the
//! playlist→song fallback policy on top of the registry.

pub mod router;
pub mod soundcloud;
pub mod youtube;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use quaver_common::model::{Platform, Playlist, Song};

use crate::cache::SongCache;
use crate::error::{Error, Result};
use crate::transport::AudioResource;

/// A platform plugin: lookup, search and audio-resource creation.
///
/// All operations are network-bound and potentially slow; callers treat
/// them as opaque.
#[async_trait]
pub trait MediaResolver: Send + Sync {
    /// Platform this resolver serves; doubles as its registry key.
    fn platform(&self) -> Platform;

    /// Resolve a single-item reference (URL or platform-native id).
    async fn get_song(&self, reference: &str) -> Result<Song>;

    /// Resolve a playlist-shaped reference.
    async fn get_playlist(&self, reference: &str) -> Result<Playlist>;

    /// Search free text; always yields a single song, never a playlist.
    async fn search(&self, text: &str) -> Result<Song>;

    /// Produce a playable stream for a previously resolved song.
    async fn create_audio_resource(&self, song: &Song) -> Result<AudioResource>;
}

/// The external streaming subsystem, seen from here as "open a stream for
/// this song". Challenge solving and wire-format decoding happen behind it.
#[async_trait]
pub trait AudioStreamProvider: Send + Sync {
    async fn open(&self, song: &Song) -> Result<AudioResource>;
}

/// Resolver implementations keyed by platform tag.
#[derive(Default)]
pub struct ResolverRegistry {
    by_platform: HashMap<Platform, Arc<dyn MediaResolver>>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resolver under its own platform tag, replacing any
    /// previous registration for that platform.
    pub fn register(&mut self, resolver: Arc<dyn MediaResolver>) {
        self.by_platform.insert(resolver.platform(), resolver);
    }

    pub fn get(&self, platform: Platform) -> Result<Arc<dyn MediaResolver>> {
        self.by_platform
            .get(&platform)
            .cloned()
            .ok_or(Error::ResolverUnavailable(platform))
    }

    pub fn platforms(&self) -> impl Iterator<Item = Platform> + '_ {
        self.by_platform.keys().copied()
    }
}

/// Read a JSON value from the cache; decode failures count as misses.
///
/// A stale entry written by an older model version must not wedge the
/// resolver, so it is dropped with a warning and re-fetched.
pub(crate) async fn cache_get_json<T: DeserializeOwned>(
    cache: &Arc<dyn SongCache>,
    key: &str,
) -> Option<T> {
    let raw = cache.get(key).await?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Discarding undecodable cache entry {key}: {e}");
            None
        }
    }
}

/// Write a JSON value to the cache; serialization failures are logged and
/// swallowed; caching is an optimization, never a correctness dependency.
pub(crate) async fn cache_put_json<T: Serialize>(
    cache: &Arc<dyn SongCache>,
    key: &str,
    value: &T,
    ttl: Duration,
) {
    match serde_json::to_string(value) {
        Ok(raw) => cache.set(key, raw, ttl).await,
        Err(e) => warn!("Failed to serialize cache entry {key}: {e}"),
    }
}
