//! Voice connection lifecycle management
//!
//! **Responsibilities:**
//! - Readiness waits with an explicit deadline (`ensure_ready`)
//! - Monitoring transport state transitions for one session
//! - Disconnect recovery: grace window for channel-move closes, bounded
//!   rejoin budget for everything else
//! - Ready-deadline watchdog so a connection cannot sit half-connected
//!   forever
//!
//! The manager only ever asks the transport to rejoin or destroy; session
//! teardown (stop playback, evict from registry) is signalled upward
//! through a teardown channel and performed by the owning session, so the
//! destroy cascade runs exactly once no matter which path triggered it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use quaver_common::config::PlayerConfig;
use quaver_common::events::{EventBus, QuaverEvent, TeardownReason};
use quaver_common::model::{ConnectionState, GuildId};

use crate::error::{Error, Result};
use crate::transport::VoiceConnection;

pub struct ConnectionManager {
    guild_id: GuildId,
    connection: Arc<dyn VoiceConnection>,
    events: EventBus,
    ready_timeout: Duration,
    recovery_window: Duration,
    max_rejoin_attempts: u32,
    /// Guards against arming a second concurrent ready watchdog
    watchdog_armed: AtomicBool,
}

impl ConnectionManager {
    pub fn new(
        guild_id: GuildId,
        connection: Arc<dyn VoiceConnection>,
        events: EventBus,
        player: &PlayerConfig,
    ) -> Self {
        Self {
            guild_id,
            connection,
            events,
            ready_timeout: player.ready_timeout(),
            recovery_window: player.recovery_window(),
            max_rejoin_attempts: player.max_rejoin_attempts,
            watchdog_armed: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Suspend until the connection reaches Ready or the deadline elapses.
    ///
    /// Returns `ConnectionTimeout` on expiry and `ConnectionLost` when the
    /// connection dies while waiting. Teardown is the caller's job: the
    /// session wraps this and destroys itself on failure, which keeps the
    /// teardown-reason reporting deterministic.
    pub async fn ensure_ready(&self, deadline: Duration) -> Result<()> {
        if self.connection.state() == ConnectionState::Ready {
            return Ok(());
        }

        let mut rx = self.connection.state_watch();
        let reached = timeout(
            deadline,
            rx.wait_for(|s| {
                matches!(s, ConnectionState::Ready | ConnectionState::Destroyed)
            }),
        )
        .await;

        match reached {
            Ok(Ok(state)) if *state == ConnectionState::Ready => Ok(()),
            Ok(_) => Err(Error::ConnectionLost),
            Err(_) => Err(Error::ConnectionTimeout),
        }
    }

    /// Default readiness deadline from configuration.
    pub fn ready_timeout(&self) -> Duration {
        self.ready_timeout
    }

    /// Destroy the transport unless it is already Destroyed.
    pub fn destroy_if_alive(&self) {
        if !self.connection.state().is_destroyed() {
            self.connection.destroy();
        }
    }

    /// Spawn the state monitor for this connection.
    ///
    /// Fatal conditions are reported on `teardown_tx` and end the task; the
    /// task also ends when the manager (and with it the session) is
    /// dropped.
    pub fn spawn_monitor(
        self: Arc<Self>,
        teardown_tx: mpsc::Sender<TeardownReason>,
    ) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(&self);
        let mut rx = self.connection.state_watch();
        drop(self);
        tokio::spawn(async move {
            let mut previous: Option<ConnectionState> = None;
            let mut first = true;
            loop {
                if !first && rx.changed().await.is_err() {
                    break;
                }
                first = false;

                let state = rx.borrow_and_update().clone();
                let Some(manager) = weak.upgrade() else { break };

                if previous.as_ref() != Some(&state) {
                    if let Some(old_state) = previous.take() {
                        manager.events.emit_lossy(QuaverEvent::ConnectionStateChanged {
                            guild_id: manager.guild_id,
                            old_state,
                            new_state: state.clone(),
                            timestamp: chrono::Utc::now(),
                        });
                    }
                }
                previous = Some(state.clone());

                if let Some(reason) = Self::handle_transition(&manager, &state).await {
                    let _ = teardown_tx.send(reason).await;
                    break;
                }
            }
        })
    }

    /// React to one observed state; returns a teardown reason when the
    /// session must die.
    async fn handle_transition(
        manager: &Arc<Self>,
        state: &ConnectionState,
    ) -> Option<TeardownReason> {
        match state {
            ConnectionState::Disconnected(reason) if reason.may_self_recover() => {
                // 4014 close: either a channel move (the transport recovers
                // on its own) or a kick. Give it the grace window to start
                // reconnecting before giving up.
                debug!(
                    "Guild {}: recoverable disconnect, waiting {:?} for transport recovery",
                    manager.guild_id, manager.recovery_window
                );
                let mut probe = manager.connection.state_watch();
                let recovered = timeout(
                    manager.recovery_window,
                    probe.wait_for(|s| {
                        matches!(
                            s,
                            ConnectionState::Signalling
                                | ConnectionState::Connecting
                                | ConnectionState::Ready
                        )
                    }),
                )
                .await;

                match recovered {
                    Ok(Ok(_)) => None,
                    _ => {
                        info!(
                            "Guild {}: transport did not recover within the grace window",
                            manager.guild_id
                        );
                        Some(TeardownReason::ConnectionLost)
                    }
                }
            }
            ConnectionState::Disconnected(_) => {
                let attempts = manager.connection.rejoin_attempts();
                if attempts < manager.max_rejoin_attempts {
                    info!(
                        "Guild {}: disconnected, rejoining (attempt {}/{})",
                        manager.guild_id,
                        attempts + 1,
                        manager.max_rejoin_attempts
                    );
                    manager.connection.rejoin();
                    None
                } else {
                    warn!(
                        "Guild {}: rejoin budget exhausted after {attempts} attempts",
                        manager.guild_id
                    );
                    Some(TeardownReason::ConnectionLost)
                }
            }
            ConnectionState::Destroyed => Some(TeardownReason::TransportDestroyed),
            ConnectionState::Signalling | ConnectionState::Connecting => {
                if !manager.watchdog_armed.swap(true, Ordering::SeqCst) {
                    tokio::spawn(run_ready_watchdog(Arc::downgrade(manager)));
                }
                None
            }
            ConnectionState::Ready => None,
        }
    }
}

/// Destroy a connection that cannot leave Signalling/Connecting within the
/// configured deadline.
///
/// Destroying here feeds a `Destroyed` transition back into the monitor,
/// which then cascades the session teardown.
async fn run_ready_watchdog(manager: Weak<ConnectionManager>) {
    let Some(manager) = manager.upgrade() else {
        return;
    };

    let mut rx: watch::Receiver<ConnectionState> = manager.connection.state_watch();
    let reached = timeout(
        manager.ready_timeout,
        rx.wait_for(|s| matches!(s, ConnectionState::Ready | ConnectionState::Destroyed)),
    )
    .await;
    manager.watchdog_armed.store(false, Ordering::SeqCst);

    if reached.is_err() {
        warn!(
            "Guild {}: connection not ready within {:?}, destroying transport",
            manager.guild_id, manager.ready_timeout
        );
        manager.destroy_if_alive();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{plain_disconnect, FakeConnection};

    fn test_player_config() -> PlayerConfig {
        PlayerConfig {
            ready_timeout_secs: 1,
            recovery_window_secs: 1,
            max_rejoin_attempts: 5,
            ..PlayerConfig::default()
        }
    }

    fn manager_over(connection: Arc<FakeConnection>) -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::new(
            GuildId(9),
            connection,
            EventBus::new(64),
            &test_player_config(),
        ))
    }

    #[tokio::test]
    async fn test_ensure_ready_immediate() {
        let connection = Arc::new(FakeConnection::new(ConnectionState::Ready));
        let manager = manager_over(connection);
        assert!(manager.ensure_ready(Duration::from_millis(10)).await.is_ok());
    }

    #[tokio::test]
    async fn test_ensure_ready_waits_for_transition() {
        let connection = Arc::new(FakeConnection::new(ConnectionState::Connecting));
        let manager = manager_over(connection.clone());

        let wait = tokio::spawn({
            let manager = manager.clone();
            async move { manager.ensure_ready(Duration::from_secs(1)).await }
        });
        tokio::task::yield_now().await;
        connection.set_state(ConnectionState::Ready);

        assert!(wait.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_ensure_ready_times_out() {
        let connection = Arc::new(FakeConnection::new(ConnectionState::Connecting));
        let manager = manager_over(connection);
        assert!(matches!(
            manager.ensure_ready(Duration::from_millis(20)).await,
            Err(Error::ConnectionTimeout)
        ));
    }

    #[tokio::test]
    async fn test_ensure_ready_reports_dead_connection() {
        let connection = Arc::new(FakeConnection::new(ConnectionState::Destroyed));
        let manager = manager_over(connection);
        assert!(matches!(
            manager.ensure_ready(Duration::from_millis(20)).await,
            Err(Error::ConnectionLost)
        ));
    }

    #[tokio::test]
    async fn test_monitor_rejoins_until_budget_exhausted() {
        let connection = Arc::new(FakeConnection::new(ConnectionState::Ready));
        // every rejoin "fails": the transport reports another disconnect
        connection.set_rejoin_target(Some(plain_disconnect()));
        let manager = manager_over(connection.clone());

        let (tx, mut rx) = mpsc::channel(1);
        let _monitor = manager.clone().spawn_monitor(tx);
        connection.renotify(plain_disconnect());

        let reason = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("monitor should give up")
            .expect("teardown reason");
        assert_eq!(reason, TeardownReason::ConnectionLost);
        assert_eq!(connection.rejoin_attempts(), 5);
    }

    #[tokio::test]
    async fn test_monitor_destroyed_is_fatal() {
        let connection = Arc::new(FakeConnection::new(ConnectionState::Ready));
        let manager = manager_over(connection.clone());

        let (tx, mut rx) = mpsc::channel(1);
        let _monitor = manager.clone().spawn_monitor(tx);
        connection.set_state(ConnectionState::Destroyed);

        let reason = timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, TeardownReason::TransportDestroyed);
    }

    #[tokio::test]
    async fn test_recoverable_disconnect_survives_when_transport_reconnects() {
        let connection = Arc::new(FakeConnection::new(ConnectionState::Ready));
        let manager = manager_over(connection.clone());

        let (tx, mut rx) = mpsc::channel(1);
        let _monitor = manager.clone().spawn_monitor(tx);
        connection.set_state(crate::testing::recoverable_disconnect());
        tokio::time::sleep(Duration::from_millis(50)).await;
        connection.set_state(ConnectionState::Connecting);
        connection.set_state(ConnectionState::Ready);

        // no teardown within well past the handling of the disconnect
        let outcome = timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(outcome.is_err(), "session should have survived");
        assert_eq!(connection.rejoin_attempts(), 0);
    }

    #[tokio::test]
    async fn test_recoverable_disconnect_tears_down_after_grace_window() {
        let connection = Arc::new(FakeConnection::new(ConnectionState::Ready));
        let manager = manager_over(connection.clone());

        let (tx, mut rx) = mpsc::channel(1);
        let _monitor = manager.clone().spawn_monitor(tx);
        connection.set_state(crate::testing::recoverable_disconnect());

        let reason = timeout(Duration::from_secs(3), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, TeardownReason::ConnectionLost);
    }

    #[tokio::test]
    async fn test_ready_watchdog_destroys_stuck_connection() {
        let connection = Arc::new(FakeConnection::new(ConnectionState::Signalling));
        let manager = manager_over(connection.clone());

        let (tx, mut rx) = mpsc::channel(1);
        let _monitor = manager.clone().spawn_monitor(tx);

        // the initial Signalling state arms the watchdog; the connection
        // never progresses, so the watchdog destroys it and the monitor
        // cascades the teardown
        let reason = timeout(Duration::from_secs(3), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, TeardownReason::TransportDestroyed);
        assert_eq!(connection.destroy_calls(), 1);
    }
}
