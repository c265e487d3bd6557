//! Platform routing behavior over fake resolvers
//!
//! Classification itself is unit-tested next to the router; these tests
//! check the dispatch policy: which resolver gets the call, which
//! operation runs, and how the playlist→song fallback behaves.

use std::sync::Arc;

use quaver_common::model::Platform;
use quaver_gp::error::Error;
use quaver_gp::resolver::router::{PlatformRouter, Resolved};
use quaver_gp::resolver::ResolverRegistry;
use quaver_gp::testing::FakeResolver;

fn router_over(resolvers: Vec<Arc<FakeResolver>>) -> PlatformRouter {
    let mut registry = ResolverRegistry::new();
    for resolver in resolvers {
        registry.register(resolver);
    }
    PlatformRouter::new(Arc::new(registry), Platform::Youtube)
}

#[tokio::test]
async fn test_failed_playlist_falls_back_to_single_item() {
    // a watch URL with a list param is both playlist- and single-shaped;
    // the playlist lookup fails (private list), the song lookup succeeds
    let resolver = Arc::new(FakeResolver::new(Platform::Youtube).failing_playlists());
    let router = router_over(vec![resolver.clone()]);

    let query = "https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=PLprivate";
    let resolved = router.resolve(query, None).await.unwrap();

    assert!(matches!(resolved, Resolved::Song(_)));
    assert_eq!(
        resolver.calls(),
        vec![
            format!("get_playlist:{query}"),
            format!("get_song:{query}"),
        ]
    );
}

#[tokio::test]
async fn test_failed_playlist_without_single_shape_propagates() {
    let resolver = Arc::new(FakeResolver::new(Platform::Youtube).failing_playlists());
    let router = router_over(vec![resolver.clone()]);

    let outcome = router
        .resolve("https://www.youtube.com/playlist?list=PLprivate", None)
        .await;
    assert!(matches!(outcome, Err(Error::NotFound(_))));
    assert_eq!(resolver.calls().len(), 1, "no single-item fallback expected");
}

#[tokio::test]
async fn test_plain_text_always_searches_to_a_song() {
    let resolver = Arc::new(FakeResolver::new(Platform::Youtube));
    let router = router_over(vec![resolver.clone()]);

    let resolved = router.resolve("some song name", None).await.unwrap();
    match resolved {
        Resolved::Song(song) => assert_eq!(song.id, "search-some song name"),
        Resolved::Playlist(_) => panic!("search must never yield a playlist"),
    }
    assert_eq!(resolver.calls(), vec!["search:some song name".to_string()]);
}

#[tokio::test]
async fn test_tags_select_resolver_over_hint() {
    let youtube = Arc::new(FakeResolver::new(Platform::Youtube));
    let soundcloud = Arc::new(FakeResolver::new(Platform::SoundCloud));
    let router = router_over(vec![youtube.clone(), soundcloud.clone()]);

    // a SoundCloud URL routes to SoundCloud even with a YouTube hint
    let resolved = router
        .resolve(
            "https://soundcloud.com/artist/some-track",
            Some(Platform::Youtube),
        )
        .await
        .unwrap();
    match resolved {
        Resolved::Song(song) => assert_eq!(song.platform, Platform::SoundCloud),
        _ => panic!("expected a song"),
    }
    assert!(youtube.calls().is_empty());
    assert_eq!(soundcloud.calls().len(), 1);
}

#[tokio::test]
async fn test_hint_selects_resolver_for_plain_text() {
    let youtube = Arc::new(FakeResolver::new(Platform::Youtube));
    let soundcloud = Arc::new(FakeResolver::new(Platform::SoundCloud));
    let router = router_over(vec![youtube.clone(), soundcloud.clone()]);

    router
        .resolve("ambient mix", Some(Platform::SoundCloud))
        .await
        .unwrap();
    assert!(youtube.calls().is_empty());
    assert_eq!(soundcloud.calls(), vec!["search:ambient mix".to_string()]);

    // without a hint the default platform wins
    router.resolve("ambient mix", None).await.unwrap();
    assert_eq!(youtube.calls().len(), 1);
}

#[tokio::test]
async fn test_missing_resolver_is_reported() {
    let router = router_over(vec![Arc::new(FakeResolver::new(Platform::Youtube))]);

    let outcome = router
        .resolve("https://soundcloud.com/artist/some-track", None)
        .await;
    assert!(matches!(
        outcome,
        Err(Error::ResolverUnavailable(Platform::SoundCloud))
    ));
}

#[tokio::test]
async fn test_search_miss_propagates_as_search_not_found() {
    let resolver = Arc::new(FakeResolver::new(Platform::Youtube).failing_search());
    let router = router_over(vec![resolver]);

    let outcome = router.resolve("no such song", None).await;
    assert!(matches!(outcome, Err(Error::SearchNotFound(_))));
}
