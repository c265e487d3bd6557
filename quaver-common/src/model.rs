//! Shared data model for the Quaver guild player
//!
//! These types cross crate boundaries: the resolver plugins produce them,
//! the playback engine consumes them, and the event bus serializes them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Guild (tenant) identifier, a Discord snowflake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GuildId(pub u64);

impl fmt::Display for GuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Supported source platforms
///
/// Used both as the resolver-selection key and as a field on [`Song`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    Youtube,
    SoundCloud,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Youtube => write!(f, "youtube"),
            Platform::SoundCloud => write!(f, "soundcloud"),
        }
    }
}

impl FromStr for Platform {
    type Err = crate::Error;

    /// Case-insensitive parse of user-supplied platform hints.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "youtube" | "yt" => Ok(Platform::Youtube),
            "soundcloud" | "sc" => Ok(Platform::SoundCloud),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown platform: {other}"
            ))),
        }
    }
}

/// URL shape of a classified query: playlist-like or single-item-like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaShape {
    Playlist,
    Single,
}

/// Classification tag produced by matching a query string against a
/// platform's URL shape patterns.
///
/// A query may match more than one tag at once (e.g. a watch URL that also
/// carries a `list=` parameter matches both the video and playlist shapes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaType {
    YoutubePlaylist,
    YoutubeVideo,
    SoundCloudPlaylist,
    SoundCloudTrack,
}

impl MediaType {
    /// Platform implied by this tag.
    pub fn platform(&self) -> Platform {
        match self {
            MediaType::YoutubePlaylist | MediaType::YoutubeVideo => Platform::Youtube,
            MediaType::SoundCloudPlaylist | MediaType::SoundCloudTrack => Platform::SoundCloud,
        }
    }

    /// Whether this tag is playlist-shaped or single-item-shaped.
    pub fn shape(&self) -> MediaShape {
        match self {
            MediaType::YoutubePlaylist | MediaType::SoundCloudPlaylist => MediaShape::Playlist,
            MediaType::YoutubeVideo | MediaType::SoundCloudTrack => MediaShape::Single,
        }
    }
}

/// A single playable track resolved from a source platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    /// Platform-native identifier (video id, track permalink slug, ...)
    pub id: String,
    pub title: String,
    pub author: String,
    /// Cover/thumbnail URL, empty when the platform provides none
    pub thumbnail: String,
    /// Duration in seconds
    pub duration_secs: u64,
    /// Canonical URL for the track
    pub url: String,
    /// Platform that resolved this song (selects the resolver for playback)
    pub platform: Platform,
}

/// An ordered collection of songs resolved from a playlist-shaped query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub title: String,
    pub author: String,
    pub thumbnail: String,
    pub songs: Vec<Song>,
}

/// A song paired with the identity of whoever requested it.
///
/// Immutable once created; the queue only ever moves these around.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub song: Song,
    pub requester: String,
}

/// What kind of media an enqueue request resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnqueueKind {
    Playlist,
    Video,
    Track,
}

/// User-facing confirmation of an enqueue request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnqueueSummary {
    pub title: String,
    pub author: String,
    pub thumbnail: String,
    /// Number of queue items added (1 for a single song)
    pub item_count: usize,
    pub kind: EnqueueKind,
    pub url: String,
}

/// Close code the voice websocket reports when the session was moved to
/// another channel, or kicked; the two are indistinguishable at first.
pub const CHANNEL_MOVE_CLOSE_CODE: u16 = 4014;

/// Why the transport reported a disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// The voice websocket closed with the given close code
    WebsocketClose { code: u16 },
    /// The transport adapter dropped the connection
    TransportError,
    /// The disconnect was requested locally
    Requested,
}

impl DisconnectReason {
    /// Whether the transport may re-establish the connection on its own.
    ///
    /// A 4014 close is either a channel move (recovers by itself) or a kick
    /// (does not); callers grant a short grace window to find out which.
    pub fn may_self_recover(&self) -> bool {
        matches!(
            self,
            DisconnectReason::WebsocketClose {
                code: CHANNEL_MOVE_CLOSE_CODE
            }
        )
    }
}

/// Voice connection lifecycle states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Signalling,
    Connecting,
    Ready,
    Disconnected(DisconnectReason),
    /// Terminal; the handle can never be reused
    Destroyed,
}

impl ConnectionState {
    pub fn is_destroyed(&self) -> bool {
        matches!(self, ConnectionState::Destroyed)
    }
}

/// Playback device states, also used for engine-level playback reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
}

/// Container/codec hint for a playable byte stream.
///
/// Tells the device whether the stream can be passed through as-is or needs
/// transcoding; derived from the MIME type the source reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamKind {
    /// Raw PCM (or WAV-wrapped PCM)
    Raw,
    /// Opus in an Ogg container
    OggOpus,
    /// Opus in a WebM container
    WebmOpus,
    /// Bare Opus packets
    Opus,
    /// Unknown container; the device must probe and transcode
    Arbitrary,
}

impl StreamKind {
    /// Map a reported MIME type onto a stream kind.
    pub fn from_mime(mime: Option<&str>) -> Self {
        let Some(mime) = mime else {
            return StreamKind::Arbitrary;
        };
        let mime = mime.to_ascii_lowercase();

        if mime.contains("audio/pcm")
            || mime.contains("audio/l16")
            || mime.contains("audio/wav")
            || mime.contains("audio/x-wav")
        {
            return StreamKind::Raw;
        }
        if mime.contains("audio/ogg") || mime.contains("application/ogg") {
            return StreamKind::OggOpus;
        }
        if mime.contains("audio/webm") {
            return StreamKind::WebmOpus;
        }
        if mime.contains("audio/opus") {
            return StreamKind::Opus;
        }
        StreamKind::Arbitrary
    }
}
