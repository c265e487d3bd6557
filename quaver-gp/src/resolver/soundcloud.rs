//! SoundCloud resolver
//!
//! Uses the api-v2 surface: `resolve` for track/set URLs, `search/tracks`
//! for free text, `tracks?ids=` to hydrate the stub entries long sets
//! return. Audio resources come from a progressive transcoding: the
//! transcoding endpoint redirects to a plain HTTP stream which is handed to
//! the device as-is.
//!
//! Lookups are cached under `sc:track:<user>/<slug>` and
//! `sc:playlist:<user>/sets/<slug>`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::io::StreamReader;
use tracing::debug;

use quaver_common::config::{CacheConfig, SoundCloudConfig};
use quaver_common::model::{MediaType, Platform, Playlist, Song, StreamKind};

use crate::cache::SongCache;
use crate::error::{Error, Result};
use crate::resolver::{cache_get_json, cache_put_json, MediaResolver};
use crate::transport::AudioResource;

const API_BASE_URL: &str = "https://api-v2.soundcloud.com";

static SET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:https?://)?(?:www\.|m\.)?soundcloud\.com/([A-Za-z0-9_-]+)/sets/([A-Za-z0-9_-]+)")
        .expect("valid set pattern")
});

static TRACK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:https?://)?(?:www\.|m\.)?soundcloud\.com/([A-Za-z0-9_-]+)/([A-Za-z0-9_-]+)")
        .expect("valid track pattern")
});

/// Shape tags this platform recognizes in `query`, playlist shape first.
pub(crate) fn media_types(query: &str) -> Vec<MediaType> {
    let mut tags = Vec::new();
    if SET_RE.is_match(query) {
        tags.push(MediaType::SoundCloudPlaylist);
    }
    if track_ref(query).is_some() {
        tags.push(MediaType::SoundCloudTrack);
    }
    tags
}

/// `user/slug` for a track URL. The second path segment of a set URL is the
/// literal `sets`, which is not a track.
pub(crate) fn track_ref(input: &str) -> Option<String> {
    let caps = TRACK_RE.captures(input)?;
    if &caps[2] == "sets" {
        return None;
    }
    Some(format!("{}/{}", &caps[1], &caps[2]))
}

/// `user/sets/slug` for a set URL.
pub(crate) fn playlist_ref(input: &str) -> Option<String> {
    SET_RE
        .captures(input)
        .map(|caps| format!("{}/sets/{}", &caps[1], &caps[2]))
}

/// Cached set shape: metadata plus track refs, re-materialized through the
/// track cache.
#[derive(Debug, Serialize, Deserialize)]
struct CachedSet {
    id: String,
    title: String,
    author: String,
    thumbnail: String,
    urls: Vec<String>,
}

pub struct SoundCloudResolver {
    http: reqwest::Client,
    base_url: String,
    client_id: Option<String>,
    oauth_token: Option<String>,
    cache: Arc<dyn SongCache>,
    song_ttl: Duration,
    playlist_ttl: Duration,
}

impl SoundCloudResolver {
    pub fn new(
        cache: Arc<dyn SongCache>,
        credentials: &SoundCloudConfig,
        cache_config: &CacheConfig,
    ) -> Self {
        Self::with_base_url(cache, credentials, cache_config, API_BASE_URL)
    }

    /// Point the resolver at a different API base (tests use a local mock).
    pub fn with_base_url(
        cache: Arc<dyn SongCache>,
        credentials: &SoundCloudConfig,
        cache_config: &CacheConfig,
        base_url: &str,
    ) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client (system error)"),
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id: credentials.client_id.clone(),
            oauth_token: credentials.oauth_token.clone(),
            cache,
            song_ttl: cache_config.song_ttl(),
            playlist_ttl: cache_config.playlist_ttl(),
        }
    }

    fn client_id(&self) -> Result<&str> {
        self.client_id.as_deref().ok_or_else(|| {
            Error::Common(quaver_common::Error::Config(
                "soundcloud.client_id is not configured".into(),
            ))
        })
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        let mut request = self
            .http
            .get(&url)
            .query(query)
            .query(&[("client_id", self.client_id()?)]);
        if let Some(token) = &self.oauth_token {
            request = request.header("Authorization", format!("OAuth {token}"));
        }

        let response = request.send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(path.to_string()));
        }
        Ok(response.error_for_status()?.json().await?)
    }

    async fn resolve_url(&self, url: &str) -> Result<Value> {
        self.get_json("/resolve", &[("url", url)]).await
    }

    fn song_from_track(&self, track: &Value) -> Result<Song> {
        let permalink = track
            .pointer("/permalink_url")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Resolve("track missing permalink_url".into()))?;
        let author = track
            .pointer("/user/full_name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .or_else(|| track.pointer("/user/username").and_then(Value::as_str))
            .unwrap_or_default();

        Ok(Song {
            id: track_ref(permalink).unwrap_or_else(|| permalink.to_string()),
            title: track
                .pointer("/title")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::Resolve("track missing title".into()))?
                .to_string(),
            author: author.to_string(),
            thumbnail: track
                .pointer("/artwork_url")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            duration_secs: track
                .pointer("/duration")
                .and_then(Value::as_u64)
                .unwrap_or(0)
                / 1000,
            url: permalink.to_string(),
            platform: Platform::SoundCloud,
        })
    }

    /// Long sets return stub entries carrying only a numeric id; fetch the
    /// full records and splice them back in set order.
    async fn hydrate_tracks(&self, tracks: &[Value]) -> Result<Vec<Song>> {
        let mut stub_ids = Vec::new();
        for track in tracks {
            if track.pointer("/title").is_none() {
                if let Some(id) = track.pointer("/id").and_then(Value::as_u64) {
                    stub_ids.push(id);
                }
            }
        }

        let mut hydrated: HashMap<u64, Value> = HashMap::new();
        for chunk in stub_ids.chunks(50) {
            let ids = chunk
                .iter()
                .map(u64::to_string)
                .collect::<Vec<_>>()
                .join(",");
            let full = self.get_json("/tracks", &[("ids", ids.as_str())]).await?;
            for track in full.as_array().cloned().unwrap_or_default() {
                if let Some(id) = track.pointer("/id").and_then(Value::as_u64) {
                    hydrated.insert(id, track);
                }
            }
        }

        let mut songs = Vec::new();
        for track in tracks {
            let track = if track.pointer("/title").is_some() {
                track
            } else {
                let Some(id) = track.pointer("/id").and_then(Value::as_u64) else {
                    continue;
                };
                match hydrated.get(&id) {
                    Some(full) => full,
                    // deleted/private tracks stay stubs; drop them
                    None => continue,
                }
            };
            songs.push(self.song_from_track(track)?);
        }
        Ok(songs)
    }

    async fn set_from_cached(&self, cached: CachedSet) -> Result<Playlist> {
        let mut songs = Vec::with_capacity(cached.urls.len());
        for url in &cached.urls {
            songs.push(self.get_song(url).await?);
        }
        Ok(Playlist {
            id: cached.id,
            title: cached.title,
            author: cached.author,
            thumbnail: cached.thumbnail,
            songs,
        })
    }
}

#[async_trait::async_trait]
impl MediaResolver for SoundCloudResolver {
    fn platform(&self) -> Platform {
        Platform::SoundCloud
    }

    async fn get_song(&self, reference: &str) -> Result<Song> {
        let id = track_ref(reference).unwrap_or_else(|| reference.to_string());
        let key = format!("sc:track:{id}");
        if let Some(song) = cache_get_json::<Song>(&self.cache, &key).await {
            return Ok(song);
        }

        debug!("Resolving SoundCloud track {id}");
        let track = self.resolve_url(reference).await?;
        if track.pointer("/kind").and_then(Value::as_str) != Some("track") {
            return Err(Error::NotFound(format!("{reference} is not a track")));
        }

        let song = self.song_from_track(&track)?;
        cache_put_json(
            &self.cache,
            &format!("sc:track:{}", song.id),
            &song,
            self.song_ttl,
        )
        .await;
        Ok(song)
    }

    async fn get_playlist(&self, reference: &str) -> Result<Playlist> {
        let id = playlist_ref(reference).unwrap_or_else(|| reference.to_string());
        let key = format!("sc:playlist:{id}");
        if let Some(cached) = cache_get_json::<CachedSet>(&self.cache, &key).await {
            return self.set_from_cached(cached).await;
        }

        debug!("Resolving SoundCloud set {id}");
        let set = self.resolve_url(reference).await?;
        if set.pointer("/kind").and_then(Value::as_str) != Some("playlist") {
            return Err(Error::NotFound(format!("{reference} is not a set")));
        }

        let tracks = set
            .pointer("/tracks")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let songs = self.hydrate_tracks(&tracks).await?;
        if songs.is_empty() {
            return Err(Error::NotFound(format!("set {id} has no tracks")));
        }

        let playlist = Playlist {
            id,
            title: set
                .pointer("/title")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            author: set
                .pointer("/user/full_name")
                .and_then(Value::as_str)
                .filter(|name| !name.is_empty())
                .or_else(|| set.pointer("/user/username").and_then(Value::as_str))
                .unwrap_or_default()
                .to_string(),
            thumbnail: set
                .pointer("/artwork_url")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| {
                    songs
                        .first()
                        .map(|s| s.thumbnail.clone())
                        .unwrap_or_default()
                }),
            songs,
        };

        for song in &playlist.songs {
            cache_put_json(
                &self.cache,
                &format!("sc:track:{}", song.id),
                song,
                self.song_ttl,
            )
            .await;
        }
        let cached = CachedSet {
            id: playlist.id.clone(),
            title: playlist.title.clone(),
            author: playlist.author.clone(),
            thumbnail: playlist.thumbnail.clone(),
            urls: playlist.songs.iter().map(|s| s.url.clone()).collect(),
        };
        cache_put_json(&self.cache, &key, &cached, self.playlist_ttl).await;
        Ok(playlist)
    }

    async fn search(&self, text: &str) -> Result<Song> {
        let results = self
            .get_json("/search/tracks", &[("q", text), ("limit", "1")])
            .await?;
        let track = results
            .pointer("/collection/0")
            .ok_or_else(|| Error::SearchNotFound(text.to_string()))?;

        let song = self.song_from_track(track)?;
        cache_put_json(
            &self.cache,
            &format!("sc:track:{}", song.id),
            &song,
            self.song_ttl,
        )
        .await;
        Ok(song)
    }

    async fn create_audio_resource(&self, song: &Song) -> Result<AudioResource> {
        let track = self.resolve_url(&song.url).await?;
        let transcodings = track
            .pointer("/media/transcodings")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let progressive = transcodings
            .iter()
            .find(|t| {
                t.pointer("/format/protocol").and_then(Value::as_str) == Some("progressive")
            })
            .ok_or_else(|| {
                Error::AudioResource(format!("no progressive transcoding for {}", song.url))
            })?;

        let endpoint = progressive
            .pointer("/url")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::AudioResource("transcoding missing url".into()))?;
        let mime = progressive
            .pointer("/format/mime_type")
            .and_then(Value::as_str);
        let kind = StreamKind::from_mime(mime);

        // transcoding endpoint answers with the actual stream location
        let located: Value = self
            .http
            .get(endpoint)
            .query(&[("client_id", self.client_id()?)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let stream_url = located
            .pointer("/url")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::AudioResource("stream location missing url".into()))?;

        let response = self
            .http
            .get(stream_url)
            .send()
            .await?
            .error_for_status()?;
        let bytes = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        let reader = StreamReader::new(Box::pin(bytes));

        Ok(AudioResource::new(song.clone(), kind, Box::new(reader)))
    }
}
