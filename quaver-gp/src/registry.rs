//! Session registry
//!
//! The process-wide map of guild id → session, owned explicitly and passed
//! into command handlers rather than living in a global. Sessions evict
//! themselves on teardown through a weak handle, so a dead session is gone
//! from the map before its teardown event is observable.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use quaver_common::config::Config;
use quaver_common::events::EventBus;
use quaver_common::model::GuildId;

use crate::error::Result;
use crate::resolver::router::PlatformRouter;
use crate::resolver::ResolverRegistry;
use crate::session::Session;
use crate::transport::{ChannelRef, VoiceGateway};

pub(crate) struct RegistryInner {
    pub(crate) sessions: RwLock<HashMap<GuildId, Arc<Session>>>,
    gateway: Arc<dyn VoiceGateway>,
    router: Arc<PlatformRouter>,
    resolvers: Arc<ResolverRegistry>,
    events: EventBus,
    config: Config,
}

/// Owns every live session. Cheap to clone; clones share the same map.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(
        gateway: Arc<dyn VoiceGateway>,
        resolvers: Arc<ResolverRegistry>,
        events: EventBus,
        config: Config,
    ) -> Self {
        let router = Arc::new(PlatformRouter::new(
            resolvers.clone(),
            config.player.default_platform,
        ));
        Self {
            inner: Arc::new(RegistryInner {
                sessions: RwLock::new(HashMap::new()),
                gateway,
                router,
                resolvers,
                events,
                config,
            }),
        }
    }

    /// Fetch the guild's session, joining the voice channel and creating
    /// one when none exists.
    ///
    /// Per-guild command handling is serialized by the caller, so creation
    /// and removal for one guild never race; the double lookup is only
    /// ordering hygiene across guilds.
    pub async fn get_or_create(&self, channel: ChannelRef) -> Result<Arc<Session>> {
        let guild_id = channel.guild_id;
        if let Some(session) = self.inner.sessions.read().await.get(&guild_id) {
            return Ok(session.clone());
        }

        debug!("Creating session for guild {guild_id}");
        let link = self.inner.gateway.join(channel).await?;
        let session = Session::new(
            guild_id,
            link,
            self.inner.router.clone(),
            self.inner.resolvers.clone(),
            self.inner.events.clone(),
            &self.inner.config,
            Arc::downgrade(&self.inner),
        );
        self.inner
            .sessions
            .write()
            .await
            .insert(guild_id, session.clone());
        Ok(session)
    }

    pub async fn get(&self, guild_id: GuildId) -> Option<Arc<Session>> {
        self.inner.sessions.read().await.get(&guild_id).cloned()
    }

    /// Drop the registration for a guild. Idempotent; does not tear the
    /// session down (that is [`Session::leave`]'s job, which calls back
    /// into here).
    pub async fn remove(&self, guild_id: GuildId) {
        self.inner.sessions.write().await.remove(&guild_id);
    }

    pub async fn len(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.sessions.read().await.is_empty()
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }
}
