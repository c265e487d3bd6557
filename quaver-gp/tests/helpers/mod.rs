//! Shared helpers for integration tests
#![allow(dead_code)]

use std::sync::Once;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::timeout;

use quaver_common::config::Config;
use quaver_common::events::QuaverEvent;

static TRACING: Once = Once::new();

/// Route tracing output into the test harness (`RUST_LOG` filtered).
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "quaver_gp=debug".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Config with short deadlines so state-machine tests run quickly.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.player.ready_timeout_secs = 1;
    config.player.recovery_window_secs = 1;
    config.player.max_resource_attempts = 2;
    config
}

/// Wait for the first event matching `pred`, discarding everything else.
pub async fn next_matching(
    rx: &mut broadcast::Receiver<QuaverEvent>,
    deadline: Duration,
    pred: impl Fn(&QuaverEvent) -> bool,
) -> Option<QuaverEvent> {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    };
    timeout(deadline, wait).await.ok().flatten()
}

/// Collect every event arriving within `window`.
pub async fn drain_for(
    rx: &mut broadcast::Receiver<QuaverEvent>,
    window: Duration,
) -> Vec<QuaverEvent> {
    let mut events = Vec::new();
    let _ = timeout(window, async {
        loop {
            match rx.recv().await {
                Ok(event) => events.push(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
    .await;
    events
}
