use anyhow::Context;
use chrono::{DateTime, Utc};
use models::{
    Address, BlockIndex, DeviceToken, Feed, FeedId, FeedMessage, FeedParticipant, KeyGeneration,
    MessageId, ParticipantRole, Profile, ReactionTally,
};

/// The orchestrator's database port: everything the read-through
/// handlers and the non-rotating group mutations need. Implemented
/// for Postgres over the repository layer, and by an in-memory fake
/// in tests.
#[async_trait::async_trait]
pub trait SyncStore: Send + Sync + 'static {
    async fn feed(&self, feed_id: FeedId) -> anyhow::Result<Option<Feed>>;
    async fn feed_exists(&self, feed_id: FeedId) -> anyhow::Result<bool>;
    async fn feeds_for_address(&self, address: &Address) -> anyhow::Result<Vec<Feed>>;
    async fn feed_ids_for_address(&self, address: &Address) -> anyhow::Result<Vec<FeedId>>;
    async fn has_personal_feed(&self, address: &Address) -> anyhow::Result<bool>;

    async fn participants(&self, feed_id: FeedId) -> anyhow::Result<Vec<FeedParticipant>>;
    async fn participant(
        &self,
        feed_id: FeedId,
        address: &Address,
    ) -> anyhow::Result<Option<FeedParticipant>>;

    async fn profiles(&self, addresses: &[Address]) -> anyhow::Result<Vec<Profile>>;
    async fn display_names(&self, addresses: &[Address])
        -> anyhow::Result<Vec<(Address, String)>>;

    async fn message_tail(&self, feed_id: FeedId, limit: u32) -> anyhow::Result<Vec<FeedMessage>>;
    async fn message(&self, message_id: MessageId) -> anyhow::Result<Option<FeedMessage>>;

    async fn key_generations(&self, feed_id: FeedId) -> anyhow::Result<Vec<KeyGeneration>>;

    async fn read_positions(&self, address: &Address)
        -> anyhow::Result<Vec<(FeedId, BlockIndex)>>;
    async fn upsert_read_position(
        &self,
        address: &Address,
        feed_id: FeedId,
        block_index: BlockIndex,
    ) -> anyhow::Result<bool>;

    async fn tallies_since(
        &self,
        feed_ids: &[FeedId],
        since_version: u64,
    ) -> anyhow::Result<Vec<ReactionTally>>;

    async fn device_tokens(&self, address: &Address) -> anyhow::Result<Vec<DeviceToken>>;
    async fn device_token_owner(&self, token: &str)
        -> anyhow::Result<Option<(String, Address)>>;
    async fn upsert_device_token(&self, token: &DeviceToken) -> anyhow::Result<()>;
    async fn remove_device_token(&self, address: &Address, token_id: &str)
        -> anyhow::Result<bool>;
    /// Deactivates tokens unused since the cutoff; one returned
    /// address per deactivated token.
    async fn deactivate_stale_device_tokens(
        &self,
        unused_since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Address>>;

    /// Creates the feed, its participants, and generation 0 in one
    /// transaction.
    async fn create_group_feed(
        &self,
        feed: &Feed,
        participants: &[FeedParticipant],
        generation_zero: &KeyGeneration,
    ) -> anyhow::Result<()>;
    async fn set_role(
        &self,
        feed_id: FeedId,
        address: &Address,
        role: ParticipantRole,
    ) -> anyhow::Result<()>;
    async fn update_feed_title(
        &self,
        feed_id: FeedId,
        title: &str,
        at_block: BlockIndex,
    ) -> anyhow::Result<()>;
    async fn update_feed_description(
        &self,
        feed_id: FeedId,
        description: &str,
        at_block: BlockIndex,
    ) -> anyhow::Result<()>;
    async fn delete_feed(&self, feed_id: FeedId) -> anyhow::Result<()>;
}

pub struct PgSyncStore {
    pool: sqlx::PgPool,
}

impl PgSyncStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SyncStore for PgSyncStore {
    async fn feed(&self, feed_id: FeedId) -> anyhow::Result<Option<Feed>> {
        node_sql::feeds::fetch_one(&self.pool, feed_id)
            .await
            .context("fetching feed")
    }

    async fn feed_exists(&self, feed_id: FeedId) -> anyhow::Result<bool> {
        node_sql::feeds::exists(&self.pool, feed_id)
            .await
            .context("checking feed existence")
    }

    async fn feeds_for_address(&self, address: &Address) -> anyhow::Result<Vec<Feed>> {
        node_sql::feeds::fetch_for_address(&self.pool, address)
            .await
            .context("fetching feeds for address")
    }

    async fn feed_ids_for_address(&self, address: &Address) -> anyhow::Result<Vec<FeedId>> {
        node_sql::participants::feed_ids_for_address(&self.pool, address)
            .await
            .context("fetching feed ids for address")
    }

    async fn has_personal_feed(&self, address: &Address) -> anyhow::Result<bool> {
        node_sql::feeds::has_personal_feed(&self.pool, address)
            .await
            .context("checking personal feed")
    }

    async fn participants(&self, feed_id: FeedId) -> anyhow::Result<Vec<FeedParticipant>> {
        node_sql::participants::fetch_all(&self.pool, feed_id)
            .await
            .context("fetching participants")
    }

    async fn participant(
        &self,
        feed_id: FeedId,
        address: &Address,
    ) -> anyhow::Result<Option<FeedParticipant>> {
        node_sql::participants::fetch_one(&self.pool, feed_id, address)
            .await
            .context("fetching participant")
    }

    async fn profiles(&self, addresses: &[Address]) -> anyhow::Result<Vec<Profile>> {
        node_sql::profiles::fetch_many(&self.pool, addresses)
            .await
            .context("fetching profiles")
    }

    async fn display_names(
        &self,
        addresses: &[Address],
    ) -> anyhow::Result<Vec<(Address, String)>> {
        node_sql::profiles::fetch_display_names(&self.pool, addresses)
            .await
            .context("fetching display names")
    }

    async fn message_tail(&self, feed_id: FeedId, limit: u32) -> anyhow::Result<Vec<FeedMessage>> {
        node_sql::messages::fetch_tail(&self.pool, feed_id, limit)
            .await
            .context("fetching message tail")
    }

    async fn message(&self, message_id: MessageId) -> anyhow::Result<Option<FeedMessage>> {
        node_sql::messages::fetch_one(&self.pool, message_id)
            .await
            .context("fetching message")
    }

    async fn key_generations(&self, feed_id: FeedId) -> anyhow::Result<Vec<KeyGeneration>> {
        node_sql::key_generations::fetch_all(&self.pool, feed_id)
            .await
            .context("fetching key generations")
    }

    async fn read_positions(
        &self,
        address: &Address,
    ) -> anyhow::Result<Vec<(FeedId, BlockIndex)>> {
        let positions = node_sql::read_positions::fetch_all(&self.pool, address)
            .await
            .context("fetching read positions")?;
        Ok(positions
            .into_iter()
            .map(|p| (p.feed_id, p.last_read_block_index))
            .collect())
    }

    async fn upsert_read_position(
        &self,
        address: &Address,
        feed_id: FeedId,
        block_index: BlockIndex,
    ) -> anyhow::Result<bool> {
        node_sql::read_positions::upsert_max(&self.pool, address, feed_id, block_index)
            .await
            .context("advancing read position")
    }

    async fn tallies_since(
        &self,
        feed_ids: &[FeedId],
        since_version: u64,
    ) -> anyhow::Result<Vec<ReactionTally>> {
        node_sql::reactions::fetch_updated_since(&self.pool, feed_ids, since_version)
            .await
            .context("fetching reaction tallies")
    }

    async fn device_tokens(&self, address: &Address) -> anyhow::Result<Vec<DeviceToken>> {
        node_sql::device_tokens::fetch_for_address(&self.pool, address)
            .await
            .context("fetching device tokens")
    }

    async fn device_token_owner(
        &self,
        token: &str,
    ) -> anyhow::Result<Option<(String, Address)>> {
        node_sql::device_tokens::owner_of_token(&self.pool, token)
            .await
            .context("resolving device token owner")
    }

    async fn upsert_device_token(&self, token: &DeviceToken) -> anyhow::Result<()> {
        node_sql::device_tokens::upsert(&self.pool, token)
            .await
            .context("upserting device token")
    }

    async fn remove_device_token(
        &self,
        address: &Address,
        token_id: &str,
    ) -> anyhow::Result<bool> {
        node_sql::device_tokens::remove(&self.pool, address, token_id)
            .await
            .context("removing device token")
    }

    async fn deactivate_stale_device_tokens(
        &self,
        unused_since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Address>> {
        node_sql::device_tokens::deactivate_stale(&self.pool, unused_since)
            .await
            .context("deactivating stale device tokens")
    }

    async fn create_group_feed(
        &self,
        feed: &Feed,
        participants: &[FeedParticipant],
        generation_zero: &KeyGeneration,
    ) -> anyhow::Result<()> {
        let mut txn = self.pool.begin().await.context("starting transaction")?;
        node_sql::feeds::insert(&mut txn, feed)
            .await
            .context("inserting feed")?;
        for participant in participants {
            node_sql::participants::insert(&mut txn, participant)
                .await
                .context("inserting participant")?;
        }
        node_sql::key_generations::insert(&mut txn, generation_zero)
            .await
            .context("inserting generation zero")?;
        txn.commit().await.context("committing feed creation")?;
        Ok(())
    }

    async fn set_role(
        &self,
        feed_id: FeedId,
        address: &Address,
        role: ParticipantRole,
    ) -> anyhow::Result<()> {
        let mut txn = self.pool.begin().await.context("starting transaction")?;
        node_sql::participants::set_role(&mut txn, feed_id, address, role)
            .await
            .context("setting role")?;
        txn.commit().await.context("committing role change")?;
        Ok(())
    }

    async fn update_feed_title(
        &self,
        feed_id: FeedId,
        title: &str,
        at_block: BlockIndex,
    ) -> anyhow::Result<()> {
        let mut txn = self.pool.begin().await.context("starting transaction")?;
        node_sql::feeds::update_title(&mut txn, feed_id, title, at_block)
            .await
            .context("updating title")?;
        txn.commit().await.context("committing title change")?;
        Ok(())
    }

    async fn update_feed_description(
        &self,
        feed_id: FeedId,
        description: &str,
        at_block: BlockIndex,
    ) -> anyhow::Result<()> {
        let mut txn = self.pool.begin().await.context("starting transaction")?;
        node_sql::feeds::update_description(&mut txn, feed_id, description, at_block)
            .await
            .context("updating description")?;
        txn.commit().await.context("committing description change")?;
        Ok(())
    }

    async fn delete_feed(&self, feed_id: FeedId) -> anyhow::Result<()> {
        let mut txn = self.pool.begin().await.context("starting transaction")?;
        node_sql::feeds::delete(&mut txn, feed_id)
            .await
            .context("deleting feed")?;
        txn.commit().await.context("committing feed deletion")?;
        Ok(())
    }
}
