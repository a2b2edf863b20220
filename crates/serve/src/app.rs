use crate::config::Settings;
use crate::devices::DeviceService;
use crate::feeds::FeedService;
use crate::groups::GroupService;
use crate::messages::MessageService;
use crate::store::{PgSyncStore, SyncStore};
use crate::watermarks::WatermarkService;
use anyhow::Context;
use events::Bus;
use kv::{KvStore, Namespace, RedisStore};
use models::{Address, Feed, FeedId, FeedParticipant};
use projections::{Caches, MembershipLookup};
use rotation::{
    BlockClock, KeyCipher, PgRotationStore, RotationConfig, RotationEngine, RotationStore,
};
use std::sync::Arc;

/// The assembled caching layer: projection services, event-driven
/// invalidators, rotation engine, and the read-through services the
/// transport exposes.
pub struct App {
    pub settings: Settings,
    pub caches: Arc<Caches>,
    pub bus: Bus,
    pub feeds: FeedService,
    pub messages: MessageService,
    pub groups: GroupService,
    pub watermarks: WatermarkService,
    pub devices: DeviceService,
    // Held so the subscriber task's lifetime is tied to the App's.
    _invalidators: tokio::task::JoinHandle<()>,
}

impl App {
    /// Wires the layer from explicit ports. Tests inject in-memory
    /// implementations here; production goes through [`App::build`].
    pub fn assemble(
        settings: Settings,
        store: Arc<dyn SyncStore>,
        rotation_store: Arc<dyn RotationStore>,
        kv: Arc<dyn KvStore>,
        cipher: Arc<dyn KeyCipher>,
        clock: Arc<dyn BlockClock>,
    ) -> App {
        let ns = Namespace::new(settings.instance_prefix.clone());
        let caches = Arc::new(Caches::new(kv, ns));
        let bus = Bus::default();

        let lookup = Arc::new(StoreMembershipLookup {
            store: store.clone(),
        });
        let invalidators = projections::invalidators::spawn(&bus, caches.clone(), lookup);

        let engine = Arc::new(RotationEngine::new(
            rotation_store,
            cipher,
            clock.clone(),
            bus.clone(),
            RotationConfig {
                max_members: settings.max_group_members,
                rejoin_cooldown_blocks: settings.rejoin_cooldown_blocks,
                lock_timeout: settings.rotation_lock_timeout,
            },
        ));

        App {
            feeds: FeedService::new(store.clone(), caches.clone()),
            messages: MessageService::new(store.clone(), caches.clone()),
            groups: GroupService::new(
                store.clone(),
                caches.clone(),
                engine,
                bus.clone(),
                clock,
            ),
            watermarks: WatermarkService::new(store.clone(), caches.clone()),
            devices: DeviceService::new(store, caches.clone()),
            settings,
            caches,
            bus,
            _invalidators: invalidators,
        }
    }

    /// Production wiring over Postgres.
    pub fn build(
        settings: Settings,
        pool: sqlx::PgPool,
        kv: Arc<dyn KvStore>,
        cipher: Arc<dyn KeyCipher>,
        clock: Arc<dyn BlockClock>,
    ) -> App {
        let store = Arc::new(PgSyncStore::new(pool.clone()));
        let rotation_store = Arc::new(PgRotationStore::new(pool));
        Self::assemble(settings, store, rotation_store, kv, cipher, clock)
    }

    /// Connects both backing stores from the settings and wires the
    /// layer.
    pub async fn connect(
        settings: Settings,
        cipher: Arc<dyn KeyCipher>,
        clock: Arc<dyn BlockClock>,
    ) -> anyhow::Result<App> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(settings.max_db_connections)
            .connect(&settings.database_url)
            .await
            .context("connecting to postgres")?;
        let kv = Arc::new(
            RedisStore::connect(&settings.redis_url)
                .await
                .context("connecting to redis")?,
        );
        Ok(Self::build(settings, pool, kv, cipher, clock))
    }
}

/// Adapts the orchestrator's store to the invalidators' narrow
/// lookup.
struct StoreMembershipLookup {
    store: Arc<dyn SyncStore>,
}

#[async_trait::async_trait]
impl MembershipLookup for StoreMembershipLookup {
    async fn feeds_for_address(
        &self,
        address: &Address,
    ) -> anyhow::Result<Vec<(Feed, Vec<FeedParticipant>)>> {
        let feeds = self.store.feeds_for_address(address).await?;
        let mut out = Vec::with_capacity(feeds.len());
        for feed in feeds {
            let participants = self.store.participants(feed.feed_id).await?;
            out.push((feed, participants));
        }
        Ok(out)
    }

    async fn participants(&self, feed_id: FeedId) -> anyhow::Result<Vec<FeedParticipant>> {
        self.store.participants(feed_id).await
    }
}
