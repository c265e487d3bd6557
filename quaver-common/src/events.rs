//! Event types for the Quaver guild player
//!
//! Components communicate observable state through a broadcast EventBus:
//! - **EventBus** (tokio::broadcast): one-to-many, never blocks producers
//! - **Shared state** (Arc<RwLock<T>>): read-heavy access elsewhere
//!
//! Core behavior must not depend on anyone listening; every emission goes
//! through [`EventBus::emit_lossy`] semantics somewhere up the stack.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::{ConnectionState, GuildId, PlaybackState, Song};

/// What caused a queue mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueChangeTrigger {
    Enqueue,
    Advance,
    Jump,
    Remove,
    Shuffle,
    Stop,
}

/// Why a session was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TeardownReason {
    /// Explicit leave request from the command layer
    Left,
    /// Readiness deadline elapsed before the connection became Ready
    ConnectionTimeout,
    /// Disconnect with the reconnect budget exhausted
    ConnectionLost,
    /// The transport reported itself Destroyed
    TransportDestroyed,
}

/// Quaver event types
///
/// Events are broadcast via EventBus and are serializable so an outer
/// surface (gateway presence, web dashboard, ...) can forward them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum QuaverEvent {
    /// Voice connection moved between lifecycle states
    ConnectionStateChanged {
        guild_id: GuildId,
        old_state: ConnectionState,
        new_state: ConnectionState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A track was handed to the playback device
    ///
    /// Triggers:
    /// - Presence rotation: show "now playing"
    /// - Command layer: now-playing display
    TrackStarted {
        guild_id: GuildId,
        song: Song,
        requester: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A queue item was dropped after repeated resource-creation failures
    TrackSkipped {
        guild_id: GuildId,
        song: Song,
        /// How many creation attempts were made before giving up
        attempts: u32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The queue contents changed
    QueueChanged {
        guild_id: GuildId,
        queue_len: usize,
        trigger: QueueChangeTrigger,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Engine-level playback state changed (Idle / Playing / Paused)
    PlaybackStateChanged {
        guild_id: GuildId,
        state: PlaybackState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The session was torn down and evicted from the registry
    ///
    /// Emitted exactly once per session, whatever the teardown path.
    SessionDestroyed {
        guild_id: GuildId,
        reason: TeardownReason,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl QuaverEvent {
    /// Guild this event belongs to.
    pub fn guild_id(&self) -> GuildId {
        match self {
            QuaverEvent::ConnectionStateChanged { guild_id, .. }
            | QuaverEvent::TrackStarted { guild_id, .. }
            | QuaverEvent::TrackSkipped { guild_id, .. }
            | QuaverEvent::QueueChanged { guild_id, .. }
            | QuaverEvent::PlaybackStateChanged { guild_id, .. }
            | QuaverEvent::SessionDestroyed { guild_id, .. } => *guild_id,
        }
    }
}

/// Central event distribution bus
///
/// Uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
/// - Lagged message detection for slow subscribers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<QuaverEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity.
    ///
    /// Old events are dropped once `capacity` unread events are buffered
    /// for a subscriber; sizing only affects laggards, not producers.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events.
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<QuaverEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers.
    ///
    /// Returns `Ok(subscriber_count)`, or `Err` when nobody is listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: QuaverEvent,
    ) -> Result<usize, broadcast::error::SendError<QuaverEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring whether anyone is listening.
    pub fn emit_lossy(&self, event: QuaverEvent) {
        let _ = self.tx.send(event);
    }

    /// Configured channel capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn destroyed_event() -> QuaverEvent {
        QuaverEvent::SessionDestroyed {
            guild_id: GuildId(7),
            reason: TeardownReason::Left,
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_eventbus_new() {
        let bus = EventBus::new(100);
        assert_eq!(bus.capacity(), 100);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(16);
        assert!(bus.emit(destroyed_event()).is_err());
        // lossy emission never errors
        bus.emit_lossy(destroyed_event());
    }

    #[tokio::test]
    async fn test_emit_with_subscriber() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        assert_eq!(bus.emit(destroyed_event()).unwrap(), 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.guild_id(), GuildId(7));
        assert!(matches!(event, QuaverEvent::SessionDestroyed { .. }));
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_string(&destroyed_event()).unwrap();
        assert!(json.contains("\"type\":\"SessionDestroyed\""));
    }
}
