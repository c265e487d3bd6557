//! Playback engine
//!
//! Owns the queue and the playback device for one guild. The queue is FIFO
//! except for the explicit reordering operations; an item leaves the queue
//! the instant it becomes the playing item. Advancement is driven by two
//! sources only (the session's own commands and the device's idle
//! notifications), so for one guild it never runs concurrently with itself.

use std::collections::VecDeque;
use std::sync::Arc;

use rand::seq::SliceRandom;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use quaver_common::events::{EventBus, QuaverEvent, QueueChangeTrigger};
use quaver_common::human_time::format_seconds;
use quaver_common::model::{GuildId, PlaybackState, QueueItem};

use crate::error::{Error, Result};
use crate::resolver::ResolverRegistry;
use crate::transport::{AudioDevice, AudioResource};

#[derive(Default)]
struct QueueState {
    queue: VecDeque<QueueItem>,
    playing: Option<QueueItem>,
}

pub struct PlaybackEngine {
    guild_id: GuildId,
    device: Arc<dyn AudioDevice>,
    resolvers: Arc<ResolverRegistry>,
    events: EventBus,
    /// Resource-creation attempts per queue item before it is skipped
    max_resource_attempts: u32,
    state: Mutex<QueueState>,
}

impl PlaybackEngine {
    pub fn new(
        guild_id: GuildId,
        device: Arc<dyn AudioDevice>,
        resolvers: Arc<ResolverRegistry>,
        events: EventBus,
        max_resource_attempts: u32,
    ) -> Self {
        Self {
            guild_id,
            device,
            resolvers,
            events,
            max_resource_attempts: max_resource_attempts.max(1),
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Wire device idle notifications to queue advancement.
    ///
    /// The task holds a weak engine reference and exits when the engine is
    /// dropped or the device stops reporting.
    pub fn spawn_idle_watcher(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(&self);
        let mut rx = self.device.state_watch();
        drop(self);
        tokio::spawn(async move {
            let mut last = *rx.borrow();
            while rx.changed().await.is_ok() {
                let current = *rx.borrow_and_update();
                let went_idle = current == PlaybackState::Idle && last != PlaybackState::Idle;
                last = current;
                if !went_idle {
                    continue;
                }
                let Some(engine) = weak.upgrade() else { break };
                // an explicit stop already cleared the playing slot; only a
                // track that finished on its own advances the queue
                if engine.state.lock().await.playing.is_some() {
                    engine.advance().await;
                }
            }
        })
    }

    /// Append items to the queue tail; starts playback when idle.
    pub async fn add_songs(&self, items: Vec<QueueItem>) {
        if items.is_empty() {
            return;
        }
        let was_idle = {
            let mut state = self.state.lock().await;
            let was_idle = state.playing.is_none();
            state.queue.extend(items);
            self.emit_queue_changed(state.queue.len(), QueueChangeTrigger::Enqueue);
            was_idle
        };
        if was_idle {
            self.advance().await;
        }
    }

    /// Move the 1-indexed item to the front of the queue and start it.
    pub async fn jump(&self, position: usize) -> Result<QueueItem> {
        let target = {
            let mut state = self.state.lock().await;
            let target = Self::take_at(&mut state.queue, position)?;
            state.queue.push_front(target.clone());
            self.emit_queue_changed(state.queue.len(), QueueChangeTrigger::Jump);
            target
        };
        self.advance().await;
        Ok(target)
    }

    /// Remove and return the 1-indexed item; the rest keeps its order.
    pub async fn remove(&self, position: usize) -> Result<QueueItem> {
        let mut state = self.state.lock().await;
        let removed = Self::take_at(&mut state.queue, position)?;
        self.emit_queue_changed(state.queue.len(), QueueChangeTrigger::Remove);
        Ok(removed)
    }

    /// Replace the queue with a uniformly random permutation of itself.
    pub async fn shuffle(&self) {
        let mut state = self.state.lock().await;
        state.queue.make_contiguous().shuffle(&mut rand::thread_rng());
        self.emit_queue_changed(state.queue.len(), QueueChangeTrigger::Shuffle);
    }

    /// Clear the playing slot and the queue, and stop the device.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock().await;
            state.queue.clear();
            state.playing = None;
            self.emit_queue_changed(0, QueueChangeTrigger::Stop);
        }
        self.device.stop();
        self.emit_playback_state(PlaybackState::Idle);
    }

    /// Forwarded to the device; no queue mutation.
    pub fn pause(&self) {
        self.device.pause();
        self.emit_playback_state(self.device.state());
    }

    /// Forwarded to the device; no queue mutation.
    pub fn resume(&self) {
        self.device.resume();
        self.emit_playback_state(self.device.state());
    }

    pub async fn now_playing(&self) -> Option<QueueItem> {
        self.state.lock().await.playing.clone()
    }

    pub async fn queue_snapshot(&self) -> Vec<QueueItem> {
        self.state.lock().await.queue.iter().cloned().collect()
    }

    pub async fn queue_len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Pull the queue head into the playing slot and hand its audio
    /// resource to the device.
    ///
    /// Unplayable heads are skipped after a bounded number of creation
    /// attempts; an empty queue stops the device and clears the slot.
    async fn advance(&self) {
        loop {
            let item = {
                let mut state = self.state.lock().await;
                match state.queue.pop_front() {
                    Some(item) => {
                        state.playing = Some(item.clone());
                        self.emit_queue_changed(state.queue.len(), QueueChangeTrigger::Advance);
                        item
                    }
                    None => {
                        state.playing = None;
                        drop(state);
                        self.device.stop();
                        self.emit_playback_state(PlaybackState::Idle);
                        return;
                    }
                }
            };

            match self.create_resource(&item).await {
                Some(resource) => {
                    {
                        // a stop that raced the resource fetch wins; drop
                        // the stale resource instead of resurrecting it
                        let state = self.state.lock().await;
                        if state.playing.as_ref() != Some(&item) {
                            return;
                        }
                    }
                    info!(
                        "Guild {}: playing {} - {} ({})",
                        self.guild_id,
                        item.song.author,
                        item.song.title,
                        format_seconds(item.song.duration_secs),
                    );
                    self.device.play(resource);
                    self.emit_playback_state(PlaybackState::Playing);
                    self.events.emit_lossy(QuaverEvent::TrackStarted {
                        guild_id: self.guild_id,
                        song: item.song.clone(),
                        requester: item.requester.clone(),
                        timestamp: chrono::Utc::now(),
                    });
                    return;
                }
                None => {
                    self.events.emit_lossy(QuaverEvent::TrackSkipped {
                        guild_id: self.guild_id,
                        song: item.song.clone(),
                        attempts: self.max_resource_attempts,
                        timestamp: chrono::Utc::now(),
                    });
                    continue;
                }
            }
        }
    }

    /// Bounded resource creation; `None` means the item is unplayable.
    async fn create_resource(&self, item: &QueueItem) -> Option<AudioResource> {
        let resolver = match self.resolvers.get(item.song.platform) {
            Ok(resolver) => resolver,
            Err(e) => {
                warn!("Guild {}: skipping {}: {e}", self.guild_id, item.song.url);
                return None;
            }
        };

        for attempt in 1..=self.max_resource_attempts {
            match resolver.create_audio_resource(&item.song).await {
                Ok(resource) => return Some(resource),
                Err(e) => warn!(
                    "Guild {}: audio resource attempt {attempt}/{} for {} failed: {e}",
                    self.guild_id, self.max_resource_attempts, item.song.url
                ),
            }
        }
        debug!(
            "Guild {}: giving up on {} after {} attempts",
            self.guild_id, item.song.url, self.max_resource_attempts
        );
        None
    }

    fn emit_queue_changed(&self, queue_len: usize, trigger: QueueChangeTrigger) {
        self.events.emit_lossy(QuaverEvent::QueueChanged {
            guild_id: self.guild_id,
            queue_len,
            trigger,
            timestamp: chrono::Utc::now(),
        });
    }

    fn emit_playback_state(&self, state: PlaybackState) {
        self.events.emit_lossy(QuaverEvent::PlaybackStateChanged {
            guild_id: self.guild_id,
            state,
            timestamp: chrono::Utc::now(),
        });
    }

    fn take_at(queue: &mut VecDeque<QueueItem>, position: usize) -> Result<QueueItem> {
        if position == 0 || position > queue.len() {
            return Err(Error::InvalidPosition {
                position,
                queue_len: queue.len(),
            });
        }
        // position is validated, remove cannot fail
        Ok(queue.remove(position - 1).expect("validated position"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{song, FakeDevice, FakeResolver};
    use quaver_common::model::Platform;

    fn item(id: &str) -> QueueItem {
        QueueItem {
            song: song(id, Platform::Youtube),
            requester: "tester".into(),
        }
    }

    fn engine_with(
        device: Arc<FakeDevice>,
        resolver: FakeResolver,
    ) -> Arc<PlaybackEngine> {
        let mut registry = ResolverRegistry::new();
        registry.register(Arc::new(resolver));
        Arc::new(PlaybackEngine::new(
            GuildId(1),
            device,
            Arc::new(registry),
            EventBus::new(64),
            2,
        ))
    }

    #[tokio::test]
    async fn test_add_songs_preserves_insertion_order() {
        let device = Arc::new(FakeDevice::new());
        let engine = engine_with(device.clone(), FakeResolver::new(Platform::Youtube));

        engine.add_songs(vec![item("a"), item("b")]).await;
        engine.add_songs(vec![item("c")]).await;

        // "a" went straight to the playing slot
        assert_eq!(engine.now_playing().await.unwrap().song.id, "a");
        let ids: Vec<String> = engine
            .queue_snapshot()
            .await
            .into_iter()
            .map(|i| i.song.id)
            .collect();
        assert_eq!(ids, ["b", "c"]);
    }

    #[tokio::test]
    async fn test_jump_out_of_range_leaves_queue_untouched() {
        let device = Arc::new(FakeDevice::new());
        let engine = engine_with(device.clone(), FakeResolver::new(Platform::Youtube));
        engine.add_songs(vec![item("a"), item("b")]).await;

        assert!(matches!(
            engine.jump(5).await,
            Err(Error::InvalidPosition {
                position: 5,
                queue_len: 1
            })
        ));
        assert_eq!(engine.queue_len().await, 1);
        assert_eq!(engine.now_playing().await.unwrap().song.id, "a");
    }

    #[tokio::test]
    async fn test_remove_returns_exactly_one_item() {
        let device = Arc::new(FakeDevice::new());
        let engine = engine_with(device.clone(), FakeResolver::new(Platform::Youtube));
        engine
            .add_songs(vec![item("a"), item("b"), item("c"), item("d")])
            .await;

        let removed = engine.remove(2).await.unwrap();
        assert_eq!(removed.song.id, "c");
        let ids: Vec<String> = engine
            .queue_snapshot()
            .await
            .into_iter()
            .map(|i| i.song.id)
            .collect();
        assert_eq!(ids, ["b", "d"]);

        assert!(engine.remove(0).await.is_err());
        assert!(engine.remove(3).await.is_err());
        assert_eq!(engine.queue_len().await, 2);
    }

    #[tokio::test]
    async fn test_shuffle_is_a_permutation() {
        let device = Arc::new(FakeDevice::new());
        let engine = engine_with(device.clone(), FakeResolver::new(Platform::Youtube));
        let items: Vec<QueueItem> = (0..20).map(|i| item(&format!("s{i}"))).collect();
        engine.add_songs(items).await;

        let mut before: Vec<String> = engine
            .queue_snapshot()
            .await
            .into_iter()
            .map(|i| i.song.id)
            .collect();
        engine.shuffle().await;
        let mut after: Vec<String> = engine
            .queue_snapshot()
            .await
            .into_iter()
            .map(|i| i.song.id)
            .collect();

        assert_eq!(before.len(), after.len());
        before.sort();
        after.sort();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_unplayable_head_is_skipped_after_bounded_attempts() {
        let device = Arc::new(FakeDevice::new());
        let resolver = FakeResolver::new(Platform::Youtube).failing_resource_for("bad");
        let engine = engine_with(device.clone(), resolver);

        engine.add_songs(vec![item("bad"), item("good")]).await;

        // the bad head burned its attempts and the engine moved on
        assert_eq!(engine.now_playing().await.unwrap().song.id, "good");
        assert_eq!(engine.queue_len().await, 0);
        assert_eq!(device.play_count(), 1);
    }

    #[tokio::test]
    async fn test_all_unplayable_queue_ends_idle() {
        let device = Arc::new(FakeDevice::new());
        let resolver = FakeResolver::new(Platform::Youtube)
            .failing_resource_for("bad1")
            .failing_resource_for("bad2");
        let engine = engine_with(device.clone(), resolver);

        engine.add_songs(vec![item("bad1"), item("bad2")]).await;

        assert!(engine.now_playing().await.is_none());
        assert_eq!(engine.queue_len().await, 0);
        assert_eq!(device.state(), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn test_stop_clears_everything() {
        let device = Arc::new(FakeDevice::new());
        let engine = engine_with(device.clone(), FakeResolver::new(Platform::Youtube));
        engine.add_songs(vec![item("a"), item("b"), item("c")]).await;

        engine.stop().await;
        assert!(engine.now_playing().await.is_none());
        assert_eq!(engine.queue_len().await, 0);
        assert_eq!(device.state(), PlaybackState::Idle);
    }
}
