//! Query classification and resolver selection
//!
//! A query is matched against every platform's URL shape patterns, giving a
//! set of [`MediaType`] tags (possibly several; shapes overlap across and
//! within platforms). The tag set picks the resolver; the shape mix picks
//! the operation, with playlist resolution always attempted before the
//! single-item fallback and search reserved for queries with no URL shape
//! at all.

use std::sync::Arc;

use tracing::debug;

use quaver_common::model::{MediaShape, MediaType, Platform, Playlist, Song};

use crate::error::Result;
use crate::resolver::{soundcloud, youtube, ResolverRegistry};

/// Outcome of resolving a query: one song or a whole playlist.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Song(Song),
    Playlist(Playlist),
}

/// Classifies queries and dispatches them to the right resolver.
pub struct PlatformRouter {
    resolvers: Arc<ResolverRegistry>,
    default_platform: Platform,
}

impl PlatformRouter {
    pub fn new(resolvers: Arc<ResolverRegistry>, default_platform: Platform) -> Self {
        Self {
            resolvers,
            default_platform,
        }
    }

    /// Match `query` against every platform's shape patterns.
    ///
    /// Evaluation order is fixed: playlist shapes before single shapes for
    /// each platform, so downstream tie-breaks are deterministic.
    pub fn classify(query: &str) -> Vec<MediaType> {
        let mut tags = Vec::new();
        tags.extend(youtube::media_types(query));
        tags.extend(soundcloud::media_types(query));
        tags
    }

    /// Pick the resolver platform for a tag set.
    ///
    /// A platform implied unambiguously by the tags wins; an empty or
    /// cross-platform tag set falls back to the caller's hint, then to the
    /// configured default.
    fn select_platform(&self, tags: &[MediaType], hint: Option<Platform>) -> Platform {
        let mut implied = tags.iter().map(MediaType::platform);
        match implied.next() {
            Some(first) if implied.all(|p| p == first) => first,
            _ => hint.unwrap_or(self.default_platform),
        }
    }

    /// Resolve a query into a song or playlist.
    ///
    /// Shape-driven dispatch:
    /// 1. any playlist tag → playlist lookup, falling back to a single-item
    ///    lookup when that fails and a single tag is also present (a
    ///    private playlist link can still be a valid single item);
    /// 2. single tag only → single-item lookup;
    /// 3. no URL shape → search, which always yields a single song.
    pub async fn resolve(&self, query: &str, hint: Option<Platform>) -> Result<Resolved> {
        let tags = Self::classify(query);
        let platform = self.select_platform(&tags, hint);
        let resolver = self.resolvers.get(platform)?;

        let has_playlist_tag = tags.iter().any(|t| t.shape() == MediaShape::Playlist);
        let has_single_tag = tags.iter().any(|t| t.shape() == MediaShape::Single);
        debug!("Query classified as {tags:?}, resolving via {platform}");

        if has_playlist_tag {
            match resolver.get_playlist(query).await {
                Ok(playlist) => Ok(Resolved::Playlist(playlist)),
                Err(e) if has_single_tag => {
                    debug!("Playlist resolution failed ({e}), retrying as single item");
                    resolver.get_song(query).await.map(Resolved::Song)
                }
                Err(e) => Err(e),
            }
        } else if has_single_tag {
            resolver.get_song(query).await.map(Resolved::Song)
        } else {
            resolver.search(query).await.map(Resolved::Song)
        }
    }
}
