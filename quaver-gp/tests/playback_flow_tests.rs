//! End-to-end playback flow
//!
//! Drives a full session (registry → join → resolve → queue → device)
//! against fake transport, device and resolver implementations, checking
//! the queue/advance behavior the engine promises:
//! - enqueue starts playback when idle, preserving insertion order
//! - device idle notifications advance the queue until it drains
//! - jump reorders exactly one item to the front and starts it
//! - unplayable items are skipped after bounded attempts

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use quaver_common::events::{EventBus, QuaverEvent};
use quaver_common::model::{EnqueueKind, GuildId, Platform, PlaybackState};
use quaver_gp::resolver::ResolverRegistry;
use quaver_gp::testing::{FakeGateway, FakeResolver};
use quaver_gp::transport::{AudioDevice, ChannelRef};
use quaver_gp::SessionRegistry;

fn channel(guild: u64) -> ChannelRef {
    ChannelRef {
        guild_id: GuildId(guild),
        channel_id: 100 + guild,
    }
}

fn registry_with(
    resolver: Arc<FakeResolver>,
    gateway: Arc<FakeGateway>,
) -> SessionRegistry {
    let mut resolvers = ResolverRegistry::new();
    resolvers.register(resolver);
    SessionRegistry::new(
        gateway,
        Arc::new(resolvers),
        EventBus::new(256),
        helpers::test_config(),
    )
}

#[tokio::test]
async fn test_enqueue_two_songs_then_drain_on_idle() {
    let gateway = Arc::new(FakeGateway::ready());
    let resolver = Arc::new(FakeResolver::new(Platform::Youtube));
    let registry = registry_with(resolver, gateway.clone());
    let mut events = registry.events().subscribe();

    let session = registry.get_or_create(channel(1)).await.unwrap();
    session.ensure_ready(Duration::from_millis(100)).await.unwrap();

    let first = session
        .resolve_and_enqueue("first track", None, "alice")
        .await
        .unwrap();
    assert_eq!(first.kind, EnqueueKind::Video);
    assert_eq!(first.item_count, 1);

    let second = session
        .resolve_and_enqueue("second track", None, "bob")
        .await
        .unwrap();
    assert_eq!(second.item_count, 1);

    // first goes straight to the playing slot, second waits in the queue
    let playing = session.now_playing().await.unwrap();
    assert_eq!(playing.song.id, "search-first track");
    assert_eq!(playing.requester, "alice");
    assert_eq!(session.queue_snapshot().await.len(), 1);

    // track ends: the idle notification advances to the second song
    let device = gateway.device(0);
    device.finish_track();
    let started = helpers::next_matching(&mut events, Duration::from_secs(1), |e| {
        matches!(e, QuaverEvent::TrackStarted { song, .. } if song.id == "search-second track")
    })
    .await;
    assert!(started.is_some(), "second track should have started");
    assert_eq!(
        session.now_playing().await.unwrap().song.id,
        "search-second track"
    );
    assert!(session.queue_snapshot().await.is_empty());

    // queue drained: the next idle stops everything
    device.finish_track();
    let idled = helpers::next_matching(&mut events, Duration::from_secs(1), |e| {
        matches!(
            e,
            QuaverEvent::PlaybackStateChanged {
                state: PlaybackState::Idle,
                ..
            }
        )
    })
    .await;
    assert!(idled.is_some());
    assert!(session.now_playing().await.is_none());
    assert_eq!(device.state(), PlaybackState::Idle);
    assert_eq!(device.played_ids().len(), 2);
}

#[tokio::test]
async fn test_playlist_enqueue_then_jump_to_third() {
    let gateway = Arc::new(FakeGateway::ready());
    let resolver = Arc::new(FakeResolver::new(Platform::Youtube));
    let registry = registry_with(resolver, gateway.clone());

    let session = registry.get_or_create(channel(2)).await.unwrap();
    session.ensure_ready(Duration::from_millis(100)).await.unwrap();

    let summary = session
        .resolve_and_enqueue(
            "https://www.youtube.com/playlist?list=PLtest",
            None,
            "carol",
        )
        .await
        .unwrap();
    assert_eq!(summary.kind, EnqueueKind::Playlist);
    assert_eq!(summary.item_count, 3);
    assert_eq!(summary.title, "Fake Playlist");

    // pl-1 playing, queue [pl-2, pl-3]; add one more to have three queued
    session
        .resolve_and_enqueue("extra track", None, "carol")
        .await
        .unwrap();
    let ids: Vec<String> = session
        .queue_snapshot()
        .await
        .into_iter()
        .map(|i| i.song.id)
        .collect();
    assert_eq!(ids, ["pl-2", "pl-3", "search-extra track"]);

    // jump to the third queued item; the other two keep their order
    let target = session.jump(3).await.unwrap();
    assert_eq!(target.song.id, "search-extra track");
    assert_eq!(
        session.now_playing().await.unwrap().song.id,
        "search-extra track"
    );
    let ids: Vec<String> = session
        .queue_snapshot()
        .await
        .into_iter()
        .map(|i| i.song.id)
        .collect();
    assert_eq!(ids, ["pl-2", "pl-3"]);

    // out-of-range jump is rejected without touching the queue
    assert!(session.jump(7).await.is_err());
    assert_eq!(session.queue_snapshot().await.len(), 2);
}

#[tokio::test]
async fn test_pause_resume_forwarded_to_device() {
    let gateway = Arc::new(FakeGateway::ready());
    let resolver = Arc::new(FakeResolver::new(Platform::Youtube));
    let registry = registry_with(resolver, gateway.clone());

    let session = registry.get_or_create(channel(3)).await.unwrap();
    session
        .resolve_and_enqueue("something", None, "dave")
        .await
        .unwrap();

    let device = gateway.device(0);
    assert_eq!(device.state(), PlaybackState::Playing);

    session.pause();
    assert_eq!(device.state(), PlaybackState::Paused);
    // no queue mutation happened
    assert!(session.now_playing().await.is_some());

    session.resume();
    assert_eq!(device.state(), PlaybackState::Playing);
}

#[tokio::test]
async fn test_stop_keeps_session_usable() {
    let gateway = Arc::new(FakeGateway::ready());
    let resolver = Arc::new(FakeResolver::new(Platform::Youtube));
    let registry = registry_with(resolver, gateway.clone());

    let session = registry.get_or_create(channel(4)).await.unwrap();
    session
        .resolve_and_enqueue("https://www.youtube.com/playlist?list=PLtest", None, "erin")
        .await
        .unwrap();

    session.stop().await;
    assert!(session.now_playing().await.is_none());
    assert!(session.queue_snapshot().await.is_empty());
    assert_eq!(gateway.device(0).state(), PlaybackState::Idle);
    assert!(!session.is_destroyed());

    // a stopped session accepts new work
    session
        .resolve_and_enqueue("after stop", None, "erin")
        .await
        .unwrap();
    assert_eq!(
        session.now_playing().await.unwrap().song.id,
        "search-after stop"
    );
}

#[tokio::test]
async fn test_unplayable_track_skipped_with_event() {
    let gateway = Arc::new(FakeGateway::ready());
    let resolver = Arc::new(
        FakeResolver::new(Platform::Youtube).failing_resource_for("search-broken"),
    );
    let registry = registry_with(resolver.clone(), gateway.clone());
    let mut events = registry.events().subscribe();

    let session = registry.get_or_create(channel(5)).await.unwrap();
    session
        .resolve_and_enqueue("broken", None, "frank")
        .await
        .unwrap();
    session
        .resolve_and_enqueue("working", None, "frank")
        .await
        .unwrap();

    let skipped = helpers::next_matching(&mut events, Duration::from_secs(1), |e| {
        matches!(e, QuaverEvent::TrackSkipped { song, attempts: 2, .. } if song.id == "search-broken")
    })
    .await;
    assert!(skipped.is_some(), "broken track should emit TrackSkipped");

    assert_eq!(
        session.now_playing().await.unwrap().song.id,
        "search-working"
    );
    // both creation attempts hit the resolver before the skip
    let resource_calls = resolver
        .calls()
        .into_iter()
        .filter(|c| c == "create_audio_resource:search-broken")
        .count();
    assert_eq!(resource_calls, 2);
}
