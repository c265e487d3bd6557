//! YouTube resolver
//!
//! Metadata lookups go through the innertube web API (`youtubei/v1`):
//! `player` for single videos, `browse` for playlists (with continuation
//! paging), `search` for free text. Stream opening is delegated to the
//! external streaming subsystem via [`AudioStreamProvider`]; the
//! challenge-solving and wire-format work lives there, not here.
//!
//! Lookups are cached: songs under `yt:song:<id>`, playlists under
//! `yt:playlist:<id>` as an id list re-materialized through the song cache.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use quaver_common::config::CacheConfig;
use quaver_common::human_time::parse_clock_text;
use quaver_common::model::{MediaType, Platform, Playlist, Song};

use crate::cache::SongCache;
use crate::error::{Error, Result};
use crate::resolver::{cache_get_json, cache_put_json, AudioStreamProvider, MediaResolver};
use crate::transport::AudioResource;

const INNERTUBE_BASE_URL: &str = "https://www.youtube.com/youtubei/v1";

/// Search param filtering results to plain videos.
const SEARCH_VIDEO_FILTER: &str = "EgIQAQ%3D%3D";

static PLAYLIST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:youtube\.com|youtu\.be)/\S*[?&]list=([A-Za-z0-9_-]+)")
        .expect("valid playlist pattern")
});

static VIDEO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:youtube\.com/(?:watch\?\S*?v=|shorts/|embed/|live/)|youtu\.be/)([A-Za-z0-9_-]{11})",
    )
    .expect("valid video pattern")
});

/// Shape tags this platform recognizes in `query`, playlist shape first.
pub(crate) fn media_types(query: &str) -> Vec<MediaType> {
    let mut tags = Vec::new();
    if PLAYLIST_RE.is_match(query) {
        tags.push(MediaType::YoutubePlaylist);
    }
    if VIDEO_RE.is_match(query) {
        tags.push(MediaType::YoutubeVideo);
    }
    tags
}

pub(crate) fn video_id(input: &str) -> Option<String> {
    VIDEO_RE
        .captures(input)
        .map(|c| c[1].to_string())
}

pub(crate) fn playlist_id(input: &str) -> Option<String> {
    PLAYLIST_RE
        .captures(input)
        .map(|c| c[1].to_string())
}

fn canonical_url(id: &str) -> String {
    format!("https://youtu.be/{id}")
}

/// Cached playlist shape: metadata plus song ids; the songs themselves live
/// in the song cache.
#[derive(Debug, Serialize, Deserialize)]
struct CachedPlaylist {
    id: String,
    title: String,
    author: String,
    thumbnail: String,
    ids: Vec<String>,
}

pub struct YoutubeResolver {
    http: reqwest::Client,
    base_url: String,
    cache: Arc<dyn SongCache>,
    streams: Arc<dyn AudioStreamProvider>,
    song_ttl: Duration,
    playlist_ttl: Duration,
}

impl YoutubeResolver {
    pub fn new(
        cache: Arc<dyn SongCache>,
        streams: Arc<dyn AudioStreamProvider>,
        cache_config: &CacheConfig,
    ) -> Self {
        Self::with_base_url(cache, streams, cache_config, INNERTUBE_BASE_URL)
    }

    /// Point the resolver at a different API base (tests use a local mock).
    pub fn with_base_url(
        cache: Arc<dyn SongCache>,
        streams: Arc<dyn AudioStreamProvider>,
        cache_config: &CacheConfig,
        base_url: &str,
    ) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client (system error)"),
            base_url: base_url.trim_end_matches('/').to_string(),
            cache,
            streams,
            song_ttl: cache_config.song_ttl(),
            playlist_ttl: cache_config.playlist_ttl(),
        }
    }

    /// POST an innertube endpoint with the given payload merged into a
    /// client context.
    ///
    /// `player` uses the ANDROID client (serves unciphered metadata); the
    /// browsing endpoints use the WEB client.
    async fn call(&self, endpoint: &str, client: (&str, &str), mut payload: Value) -> Result<Value> {
        let (client_name, client_version) = client;
        payload["context"] = json!({
            "client": {
                "clientName": client_name,
                "clientVersion": client_version,
                "hl": "en",
            }
        });

        let url = format!("{}/{endpoint}?prettyPrint=false", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn call_player(&self, video_id: &str) -> Result<Value> {
        self.call(
            "player",
            ("ANDROID", "19.09.37"),
            json!({ "videoId": video_id }),
        )
        .await
    }

    async fn call_browse(&self, payload: Value) -> Result<Value> {
        self.call("browse", ("WEB", "2.20240101.00.00"), payload).await
    }

    fn song_from_player(&self, response: &Value) -> Result<Song> {
        let status = response
            .pointer("/playabilityStatus/status")
            .and_then(Value::as_str)
            .unwrap_or("ERROR");
        if status != "OK" {
            let reason = response
                .pointer("/playabilityStatus/reason")
                .and_then(Value::as_str)
                .unwrap_or(status);
            return Err(Error::NotFound(format!("video not playable: {reason}")));
        }

        let details = response
            .get("videoDetails")
            .ok_or_else(|| Error::Resolve("player response missing videoDetails".into()))?;
        let id = str_field(details, "/videoId")?;
        let duration_secs = details
            .pointer("/lengthSeconds")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        Ok(Song {
            url: canonical_url(&id),
            id,
            title: str_field(details, "/title")?,
            author: str_field(details, "/author")?,
            thumbnail: details
                .pointer("/thumbnail/thumbnails/0/url")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            duration_secs,
            platform: Platform::Youtube,
        })
    }

    /// Collect songs out of a page of playlist items; returns the
    /// continuation token when another page follows.
    fn collect_playlist_page(items: &[Value], songs: &mut Vec<Song>) -> Option<String> {
        let mut continuation = None;
        for item in items {
            if let Some(video) = item.get("playlistVideoRenderer") {
                let Some(id) = video.pointer("/videoId").and_then(Value::as_str) else {
                    continue;
                };
                songs.push(Song {
                    id: id.to_string(),
                    title: runs_text(video, "/title").unwrap_or_default(),
                    author: runs_text(video, "/shortBylineText").unwrap_or_default(),
                    thumbnail: video
                        .pointer("/thumbnail/thumbnails/0/url")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    duration_secs: video
                        .pointer("/lengthSeconds")
                        .and_then(Value::as_str)
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(0),
                    url: canonical_url(id),
                    platform: Platform::Youtube,
                });
            } else if let Some(token) = item
                .pointer("/continuationItemRenderer/continuationEndpoint/continuationCommand/token")
                .and_then(Value::as_str)
            {
                continuation = Some(token.to_string());
            }
        }
        continuation
    }

    /// Fetch every page of a playlist via browse + continuations.
    async fn fetch_playlist(&self, id: &str) -> Result<(CachedPlaylist, Vec<Song>)> {
        let first = self
            .call_browse(json!({ "browseId": format!("VL{id}") }))
            .await?;

        const FIRST_PAGE: &str = "/contents/twoColumnBrowseResultsRenderer/tabs/0/tabRenderer\
             /content/sectionListRenderer/contents/0/itemSectionRenderer/contents/0\
             /playlistVideoListRenderer/contents";
        let Some(items) = first.pointer(FIRST_PAGE).and_then(Value::as_array) else {
            return Err(Error::NotFound(format!("playlist {id} not found")));
        };

        let mut songs = Vec::new();
        let mut continuation = Self::collect_playlist_page(items, &mut songs);

        while let Some(token) = continuation.take() {
            let page = self
                .call_browse(json!({ "continuation": token }))
                .await?;
            let items = page
                .pointer("/onResponseReceivedActions/0/appendContinuationItemsAction/continuationItems")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            continuation = Self::collect_playlist_page(&items, &mut songs);
        }

        if songs.is_empty() {
            return Err(Error::NotFound(format!("playlist {id} has no videos")));
        }

        let meta = CachedPlaylist {
            id: id.to_string(),
            title: first
                .pointer("/metadata/playlistMetadataRenderer/title")
                .and_then(Value::as_str)
                .unwrap_or(id)
                .to_string(),
            author: first
                .pointer(
                    "/sidebar/playlistSidebarRenderer/items/1\
                     /playlistSidebarSecondaryInfoRenderer/videoOwner\
                     /videoOwnerRenderer/title/runs/0/text",
                )
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            thumbnail: songs[0].thumbnail.clone(),
            ids: songs.iter().map(|s| s.id.clone()).collect(),
        };
        Ok((meta, songs))
    }

    /// Re-materialize a cached playlist through the song cache.
    async fn playlist_from_cached(&self, cached: CachedPlaylist) -> Result<Playlist> {
        let mut songs = Vec::with_capacity(cached.ids.len());
        for id in &cached.ids {
            songs.push(self.get_song(id).await?);
        }
        Ok(Playlist {
            id: cached.id,
            title: cached.title,
            author: cached.author,
            thumbnail: cached.thumbnail,
            songs,
        })
    }

    fn song_from_search_hit(&self, video: &Value) -> Option<Song> {
        let id = video.pointer("/videoId").and_then(Value::as_str)?;
        let duration_secs = video
            .pointer("/lengthText/simpleText")
            .and_then(Value::as_str)
            .and_then(|text| parse_clock_text(text).ok())
            .unwrap_or(0);
        Some(Song {
            id: id.to_string(),
            title: runs_text(video, "/title")?,
            author: runs_text(video, "/ownerText")?,
            thumbnail: video
                .pointer("/thumbnail/thumbnails/0/url")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            duration_secs,
            url: canonical_url(id),
            platform: Platform::Youtube,
        })
    }
}

#[async_trait::async_trait]
impl MediaResolver for YoutubeResolver {
    fn platform(&self) -> Platform {
        Platform::Youtube
    }

    async fn get_song(&self, reference: &str) -> Result<Song> {
        let id = video_id(reference).unwrap_or_else(|| reference.to_string());
        let key = format!("yt:song:{id}");
        if let Some(song) = cache_get_json::<Song>(&self.cache, &key).await {
            return Ok(song);
        }

        debug!("Fetching YouTube video {id}");
        let response = self.call_player(&id).await?;
        let song = self.song_from_player(&response)?;
        cache_put_json(&self.cache, &key, &song, self.song_ttl).await;
        Ok(song)
    }

    async fn get_playlist(&self, reference: &str) -> Result<Playlist> {
        let id = playlist_id(reference).unwrap_or_else(|| reference.to_string());
        let key = format!("yt:playlist:{id}");
        if let Some(cached) = cache_get_json::<CachedPlaylist>(&self.cache, &key).await {
            return self.playlist_from_cached(cached).await;
        }

        debug!("Fetching YouTube playlist {id}");
        let (meta, songs) = self.fetch_playlist(&id).await?;
        for song in &songs {
            cache_put_json(
                &self.cache,
                &format!("yt:song:{}", song.id),
                song,
                self.song_ttl,
            )
            .await;
        }
        cache_put_json(&self.cache, &key, &meta, self.playlist_ttl).await;

        Ok(Playlist {
            id: meta.id,
            title: meta.title,
            author: meta.author,
            thumbnail: meta.thumbnail,
            songs,
        })
    }

    async fn search(&self, text: &str) -> Result<Song> {
        let response = self
            .call(
                "search",
                ("WEB", "2.20240101.00.00"),
                json!({ "query": text, "params": SEARCH_VIDEO_FILTER }),
            )
            .await?;

        let sections = response
            .pointer(
                "/contents/twoColumnSearchResultsRenderer/primaryContents\
                 /sectionListRenderer/contents",
            )
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let hit = sections
            .iter()
            .filter_map(|s| s.pointer("/itemSectionRenderer/contents").and_then(Value::as_array))
            .flatten()
            .filter_map(|item| item.get("videoRenderer"))
            .find_map(|video| self.song_from_search_hit(video))
            .ok_or_else(|| Error::SearchNotFound(text.to_string()))?;

        cache_put_json(
            &self.cache,
            &format!("yt:song:{}", hit.id),
            &hit,
            self.song_ttl,
        )
        .await;
        Ok(hit)
    }

    async fn create_audio_resource(&self, song: &Song) -> Result<AudioResource> {
        self.streams.open(song).await
    }
}

fn str_field(value: &Value, pointer: &str) -> Result<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::Resolve(format!("missing field {pointer}")))
}

/// Text of the first run of a runs-style text object.
fn runs_text(value: &Value, pointer: &str) -> Option<String> {
    value
        .pointer(&format!("{pointer}/runs/0/text"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_id_extraction() {
        assert_eq!(
            video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(
            video_id("https://youtu.be/dQw4w9WgXcQ?si=xyz").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(
            video_id("https://www.youtube.com/shorts/dQw4w9WgXcQ").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(video_id("dQw4w9WgXcQ"), None);
    }

    #[test]
    fn test_playlist_id_extraction() {
        assert_eq!(
            playlist_id("https://www.youtube.com/playlist?list=PLabc123DEF").as_deref(),
            Some("PLabc123DEF")
        );
        assert_eq!(
            playlist_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=PLabc123DEF").as_deref(),
            Some("PLabc123DEF")
        );
        assert_eq!(playlist_id("https://soundcloud.com/a/sets/b"), None);
    }

    #[test]
    fn test_media_types_orders_playlist_first() {
        let tags = media_types("https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=PLabc123DEF");
        assert_eq!(
            tags,
            vec![MediaType::YoutubePlaylist, MediaType::YoutubeVideo]
        );
    }

    #[test]
    fn test_collect_playlist_page_reads_items_and_token() {
        let items = vec![
            json!({
                "playlistVideoRenderer": {
                    "videoId": "dQw4w9WgXcQ",
                    "title": { "runs": [{ "text": "First" }] },
                    "shortBylineText": { "runs": [{ "text": "Artist" }] },
                    "lengthSeconds": "212",
                    "thumbnail": { "thumbnails": [{ "url": "https://i.ytimg.com/x.jpg" }] }
                }
            }),
            json!({
                "continuationItemRenderer": {
                    "continuationEndpoint": {
                        "continuationCommand": { "token": "NEXT_PAGE" }
                    }
                }
            }),
        ];

        let mut songs = Vec::new();
        let token = YoutubeResolver::collect_playlist_page(&items, &mut songs);

        assert_eq!(token.as_deref(), Some("NEXT_PAGE"));
        assert_eq!(songs.len(), 1);
        assert_eq!(songs[0].id, "dQw4w9WgXcQ");
        assert_eq!(songs[0].duration_secs, 212);
        assert_eq!(songs[0].url, "https://youtu.be/dQw4w9WgXcQ");
    }
}
