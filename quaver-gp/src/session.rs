//! Per-guild session: connection manager + playback engine
//!
//! One session exists per guild at a time. All of its mutations arrive
//! either from the guild's own commands or from its own transport/device
//! notifications, so no internal operation races another.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use quaver_common::config::Config;
use quaver_common::events::{EventBus, QuaverEvent, TeardownReason};
use quaver_common::model::{
    ConnectionState, EnqueueKind, EnqueueSummary, GuildId, Platform, QueueItem,
};

use crate::connection::ConnectionManager;
use crate::error::{Error, Result};
use crate::playback::PlaybackEngine;
use crate::registry::RegistryInner;
use crate::resolver::router::{PlatformRouter, Resolved};
use crate::resolver::ResolverRegistry;
use crate::transport::VoiceLink;

pub struct Session {
    guild_id: GuildId,
    connection: Arc<ConnectionManager>,
    engine: Arc<PlaybackEngine>,
    router: Arc<PlatformRouter>,
    events: EventBus,
    registry: Weak<RegistryInner>,
    destroyed: AtomicBool,
}

impl Session {
    /// Build a session over a freshly joined voice link and start its
    /// monitor tasks. Registration in the registry map is the caller's job.
    pub(crate) fn new(
        guild_id: GuildId,
        link: VoiceLink,
        router: Arc<PlatformRouter>,
        resolvers: Arc<ResolverRegistry>,
        events: EventBus,
        config: &Config,
        registry: Weak<RegistryInner>,
    ) -> Arc<Self> {
        let connection = Arc::new(ConnectionManager::new(
            guild_id,
            link.connection,
            events.clone(),
            &config.player,
        ));
        let engine = Arc::new(PlaybackEngine::new(
            guild_id,
            link.device,
            resolvers,
            events.clone(),
            config.player.max_resource_attempts,
        ));

        let session = Arc::new(Self {
            guild_id,
            connection,
            engine,
            router,
            events,
            registry,
            destroyed: AtomicBool::new(false),
        });
        session.activate();
        session
    }

    /// Spawn the connection monitor, its teardown listener and the device
    /// idle watcher. All tasks hold weak references and die with the
    /// session.
    fn activate(self: &Arc<Self>) {
        let (teardown_tx, mut teardown_rx) = mpsc::channel::<TeardownReason>(4);
        let _monitor = self.connection.clone().spawn_monitor(teardown_tx);

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(reason) = teardown_rx.recv().await {
                let Some(session) = weak.upgrade() else { break };
                session.leave_with(reason).await;
            }
        });

        let _idle_watcher = self.engine.clone().spawn_idle_watcher();
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Suspend until the connection is Ready or `deadline` elapses.
    ///
    /// On failure the session is torn down before the error is returned:
    /// a guild that could not be joined must not linger half-connected.
    pub async fn ensure_ready(&self, deadline: Duration) -> Result<()> {
        match self.connection.ensure_ready(deadline).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let reason = match &e {
                    Error::ConnectionTimeout => TeardownReason::ConnectionTimeout,
                    _ => TeardownReason::ConnectionLost,
                };
                self.leave_with(reason).await;
                Err(e)
            }
        }
    }

    /// Readiness deadline from configuration, for callers without an
    /// explicit one.
    pub fn default_ready_deadline(&self) -> Duration {
        self.connection.ready_timeout()
    }

    /// Resolve a query and append the result to the queue.
    ///
    /// Resolution failures leave the session fully usable; they only
    /// propagate to this caller.
    pub async fn resolve_and_enqueue(
        &self,
        query: &str,
        platform_hint: Option<Platform>,
        requester: &str,
    ) -> Result<EnqueueSummary> {
        let resolved = self.router.resolve(query, platform_hint).await?;

        let (items, summary) = match resolved {
            Resolved::Playlist(playlist) => {
                let items: Vec<QueueItem> = playlist
                    .songs
                    .into_iter()
                    .map(|song| QueueItem {
                        song,
                        requester: requester.to_string(),
                    })
                    .collect();
                let summary = EnqueueSummary {
                    title: playlist.title,
                    author: playlist.author,
                    thumbnail: playlist.thumbnail,
                    item_count: items.len(),
                    kind: EnqueueKind::Playlist,
                    url: query.to_string(),
                };
                (items, summary)
            }
            Resolved::Song(song) => {
                let kind = match song.platform {
                    Platform::Youtube => EnqueueKind::Video,
                    Platform::SoundCloud => EnqueueKind::Track,
                };
                let summary = EnqueueSummary {
                    title: song.title.clone(),
                    author: song.author.clone(),
                    thumbnail: song.thumbnail.clone(),
                    item_count: 1,
                    kind,
                    url: song.url.clone(),
                };
                (
                    vec![QueueItem {
                        song,
                        requester: requester.to_string(),
                    }],
                    summary,
                )
            }
        };

        debug!(
            "Guild {}: enqueueing {} item(s) for {requester}",
            self.guild_id, summary.item_count
        );
        self.engine.add_songs(items).await;
        Ok(summary)
    }

    pub async fn jump(&self, position: usize) -> Result<QueueItem> {
        self.engine.jump(position).await
    }

    pub async fn remove(&self, position: usize) -> Result<QueueItem> {
        self.engine.remove(position).await
    }

    pub async fn shuffle(&self) {
        self.engine.shuffle().await
    }

    pub async fn stop(&self) {
        self.engine.stop().await
    }

    pub fn pause(&self) {
        self.engine.pause()
    }

    pub fn resume(&self) {
        self.engine.resume()
    }

    pub async fn now_playing(&self) -> Option<QueueItem> {
        self.engine.now_playing().await
    }

    pub async fn queue_snapshot(&self) -> Vec<QueueItem> {
        self.engine.queue_snapshot().await
    }

    /// Explicit leave request.
    pub async fn leave(&self) {
        self.leave_with(TeardownReason::Left).await;
    }

    /// Idempotent teardown: destroy the transport, stop playback, evict
    /// from the registry, announce the death. Runs its body exactly once;
    /// every later call (and every cascaded transport event) is a no-op.
    pub(crate) async fn leave_with(&self, reason: TeardownReason) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Guild {}: session teardown ({reason:?})", self.guild_id);

        self.connection.destroy_if_alive();
        self.engine.stop().await;
        if let Some(registry) = self.registry.upgrade() {
            registry.sessions.write().await.remove(&self.guild_id);
        }
        self.events.emit_lossy(QuaverEvent::SessionDestroyed {
            guild_id: self.guild_id,
            reason,
            timestamp: chrono::Utc::now(),
        });
    }
}
