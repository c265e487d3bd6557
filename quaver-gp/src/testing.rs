//! Deterministic fakes for the transport, device and resolver seams
//!
//! The connection and playback state machines are tested by driving these
//! fakes through the same notification contracts the real collaborators
//! use; no network or audio stack is involved. Shipped as a normal module
//! so integration tests (and downstream command layers) can reuse them.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;

use quaver_common::model::{
    ConnectionState, DisconnectReason, Platform, PlaybackState, Playlist, Song, StreamKind,
};

use crate::error::{Error, Result};
use crate::resolver::{AudioStreamProvider, MediaResolver};
use crate::transport::{
    AudioDevice, AudioResource, ChannelRef, VoiceConnection, VoiceGateway, VoiceLink,
};

/// Synthesize a song for queue/engine tests.
pub fn song(id: &str, platform: Platform) -> Song {
    Song {
        id: id.to_string(),
        title: format!("Title of {id}"),
        author: "Fake Artist".to_string(),
        thumbnail: String::new(),
        duration_secs: 180,
        url: format!("https://example.invalid/{id}"),
        platform,
    }
}

/// An audio resource backed by an empty reader.
pub fn silent_resource(song: &Song) -> AudioResource {
    AudioResource::new(song.clone(), StreamKind::Arbitrary, Box::new(tokio::io::empty()))
}

/// Fake playback device: records plays and exposes the same watch-based
/// state stream as a real device.
pub struct FakeDevice {
    state_tx: watch::Sender<PlaybackState>,
    plays: AtomicUsize,
    played_ids: Mutex<Vec<String>>,
}

impl FakeDevice {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(PlaybackState::Idle);
        Self {
            state_tx,
            plays: AtomicUsize::new(0),
            played_ids: Mutex::new(Vec::new()),
        }
    }

    fn set_state(&self, state: PlaybackState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    /// Simulate the current track ending on its own.
    pub fn finish_track(&self) {
        self.set_state(PlaybackState::Idle);
    }

    pub fn play_count(&self) -> usize {
        self.plays.load(Ordering::SeqCst)
    }

    pub fn played_ids(&self) -> Vec<String> {
        self.played_ids.lock().unwrap().clone()
    }
}

impl Default for FakeDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDevice for FakeDevice {
    fn play(&self, resource: AudioResource) {
        self.plays.fetch_add(1, Ordering::SeqCst);
        self.played_ids.lock().unwrap().push(resource.song.id);
        self.set_state(PlaybackState::Playing);
    }

    fn pause(&self) {
        if self.state() == PlaybackState::Playing {
            self.set_state(PlaybackState::Paused);
        }
    }

    fn resume(&self) {
        if self.state() == PlaybackState::Paused {
            self.set_state(PlaybackState::Playing);
        }
    }

    fn stop(&self) {
        self.set_state(PlaybackState::Idle);
    }

    fn state(&self) -> PlaybackState {
        *self.state_tx.borrow()
    }

    fn state_watch(&self) -> watch::Receiver<PlaybackState> {
        self.state_tx.subscribe()
    }
}

/// Fake voice connection whose state tests drive directly.
pub struct FakeConnection {
    state_tx: watch::Sender<ConnectionState>,
    rejoin_attempts: AtomicU32,
    destroy_calls: AtomicU32,
    /// State a `rejoin()` call transitions into; `None` leaves the state
    /// untouched (a rejoin the transport never answers)
    rejoin_goes_to: Mutex<Option<ConnectionState>>,
}

impl FakeConnection {
    pub fn new(initial: ConnectionState) -> Self {
        let (state_tx, _) = watch::channel(initial);
        Self {
            state_tx,
            rejoin_attempts: AtomicU32::new(0),
            destroy_calls: AtomicU32::new(0),
            rejoin_goes_to: Mutex::new(None),
        }
    }

    /// Configure what a rejoin attempt does to the connection state.
    pub fn set_rejoin_target(&self, state: Option<ConnectionState>) {
        *self.rejoin_goes_to.lock().unwrap() = state;
    }

    /// Drive a state transition, as the transport would.
    pub fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    /// Force a notification even when the state repeats (e.g. a second
    /// disconnect with the same reason).
    pub fn renotify(&self, state: ConnectionState) {
        let _ = self.state_tx.send(state);
    }

    pub fn destroy_calls(&self) -> u32 {
        self.destroy_calls.load(Ordering::SeqCst)
    }
}

impl VoiceConnection for FakeConnection {
    fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn rejoin(&self) {
        self.rejoin_attempts.fetch_add(1, Ordering::SeqCst);
        let target = self.rejoin_goes_to.lock().unwrap().clone();
        if let Some(state) = target {
            self.renotify(state);
        }
    }

    fn rejoin_attempts(&self) -> u32 {
        self.rejoin_attempts.load(Ordering::SeqCst)
    }

    fn destroy(&self) {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        self.set_state(ConnectionState::Destroyed);
    }
}

/// A disconnect the transport may recover from by itself (channel move).
pub fn recoverable_disconnect() -> ConnectionState {
    ConnectionState::Disconnected(DisconnectReason::WebsocketClose { code: 4014 })
}

/// A disconnect that needs an explicit rejoin.
pub fn plain_disconnect() -> ConnectionState {
    ConnectionState::Disconnected(DisconnectReason::TransportError)
}

/// Fake gateway: hands out fake connection/device pairs and keeps them
/// reachable so tests can drive their state.
pub struct FakeGateway {
    initial_state: ConnectionState,
    pub connections: Mutex<Vec<Arc<FakeConnection>>>,
    pub devices: Mutex<Vec<Arc<FakeDevice>>>,
}

impl FakeGateway {
    /// Gateway whose connections come up Ready immediately.
    pub fn ready() -> Self {
        Self::with_initial_state(ConnectionState::Ready)
    }

    pub fn with_initial_state(initial_state: ConnectionState) -> Self {
        Self {
            initial_state,
            connections: Mutex::new(Vec::new()),
            devices: Mutex::new(Vec::new()),
        }
    }

    pub fn connection(&self, index: usize) -> Arc<FakeConnection> {
        self.connections.lock().unwrap()[index].clone()
    }

    pub fn device(&self, index: usize) -> Arc<FakeDevice> {
        self.devices.lock().unwrap()[index].clone()
    }

    pub fn join_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }
}

#[async_trait]
impl VoiceGateway for FakeGateway {
    async fn join(&self, _channel: ChannelRef) -> Result<VoiceLink> {
        let connection = Arc::new(FakeConnection::new(self.initial_state.clone()));
        let device = Arc::new(FakeDevice::new());
        self.connections.lock().unwrap().push(connection.clone());
        self.devices.lock().unwrap().push(device.clone());
        Ok(VoiceLink {
            connection,
            device,
        })
    }
}

/// Fake resolver: synthesizes songs on demand, with per-method failure
/// switches and a per-song unplayable set.
pub struct FakeResolver {
    platform: Platform,
    fail_playlists: bool,
    fail_songs: bool,
    fail_search: bool,
    failing_resources: HashSet<String>,
    songs: HashMap<String, Song>,
    calls: Mutex<Vec<String>>,
}

impl FakeResolver {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            fail_playlists: false,
            fail_songs: false,
            fail_search: false,
            failing_resources: HashSet::new(),
            songs: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_playlists(mut self) -> Self {
        self.fail_playlists = true;
        self
    }

    pub fn failing_songs(mut self) -> Self {
        self.fail_songs = true;
        self
    }

    pub fn failing_search(mut self) -> Self {
        self.fail_search = true;
        self
    }

    /// Make audio-resource creation fail for the song with this id.
    pub fn failing_resource_for(mut self, id: &str) -> Self {
        self.failing_resources.insert(id.to_string());
        self
    }

    /// Serve a canned song for an exact reference.
    pub fn with_song(mut self, reference: &str, song: Song) -> Self {
        self.songs.insert(reference.to_string(), song);
        self
    }

    /// Methods invoked on this resolver, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl MediaResolver for FakeResolver {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn get_song(&self, reference: &str) -> Result<Song> {
        self.record(format!("get_song:{reference}"));
        if self.fail_songs {
            return Err(Error::NotFound(reference.to_string()));
        }
        Ok(self
            .songs
            .get(reference)
            .cloned()
            .unwrap_or_else(|| song(reference, self.platform)))
    }

    async fn get_playlist(&self, reference: &str) -> Result<Playlist> {
        self.record(format!("get_playlist:{reference}"));
        if self.fail_playlists {
            return Err(Error::NotFound(reference.to_string()));
        }
        let songs: Vec<Song> = (1..=3)
            .map(|i| song(&format!("pl-{i}"), self.platform))
            .collect();
        Ok(Playlist {
            id: reference.to_string(),
            title: "Fake Playlist".to_string(),
            author: "Fake Curator".to_string(),
            thumbnail: songs[0].thumbnail.clone(),
            songs,
        })
    }

    async fn search(&self, text: &str) -> Result<Song> {
        self.record(format!("search:{text}"));
        if self.fail_search {
            return Err(Error::SearchNotFound(text.to_string()));
        }
        Ok(song(&format!("search-{text}"), self.platform))
    }

    async fn create_audio_resource(&self, song: &Song) -> Result<AudioResource> {
        self.record(format!("create_audio_resource:{}", song.id));
        if self.failing_resources.contains(&song.id) {
            return Err(Error::AudioResource(format!("{} is unplayable", song.id)));
        }
        Ok(silent_resource(song))
    }
}

/// Fake external streaming subsystem.
pub struct FakeStreamProvider;

#[async_trait]
impl AudioStreamProvider for FakeStreamProvider {
    async fn open(&self, song: &Song) -> Result<AudioResource> {
        Ok(silent_resource(song))
    }
}
