use anyhow::Context;
use models::{Address, BlockIndex, Feed, FeedId, FeedParticipant, Generation, KeyGeneration, Profile};

/// The membership mutation committed alongside a new key generation.
#[derive(Debug, Clone)]
pub enum MembershipMutation {
    /// First-time join: a fresh participant row.
    Insert(FeedParticipant),
    /// Rejoin after a leave (or an unban): clears the departure
    /// marker and advances the join block.
    Rejoin { address: Address, at_block: BlockIndex },
    Leave { address: Address, at_block: BlockIndex },
    Ban { address: Address, at_block: BlockIndex },
}

/// Everything a rotation persists, in one database transaction: the
/// membership change, the superseded generation's closure, the new
/// generation, and the feed watermark advance.
#[derive(Debug, Clone)]
pub struct RotationCommit {
    pub generation: KeyGeneration,
    pub membership: MembershipMutation,
    pub feed_block_index: BlockIndex,
}

/// Database port of the rotation engine.
#[async_trait::async_trait]
pub trait RotationStore: Send + Sync + 'static {
    async fn feed(&self, feed_id: FeedId) -> anyhow::Result<Option<Feed>>;
    async fn participant(
        &self,
        feed_id: FeedId,
        address: &Address,
    ) -> anyhow::Result<Option<FeedParticipant>>;
    async fn active_participants(&self, feed_id: FeedId) -> anyhow::Result<Vec<FeedParticipant>>;
    async fn max_generation(&self, feed_id: FeedId) -> anyhow::Result<Option<Generation>>;
    async fn profiles(&self, addresses: &[Address]) -> anyhow::Result<Vec<Profile>>;
    async fn commit_rotation(&self, commit: RotationCommit) -> anyhow::Result<()>;
}

pub struct PgRotationStore {
    pool: sqlx::PgPool,
}

impl PgRotationStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RotationStore for PgRotationStore {
    async fn feed(&self, feed_id: FeedId) -> anyhow::Result<Option<Feed>> {
        node_sql::feeds::fetch_one(&self.pool, feed_id)
            .await
            .context("fetching feed")
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

    async fn active_participants(&self, feed_id: FeedId) -> anyhow::Result<Vec<FeedParticipant>> {
        node_sql::participants::fetch_active(&self.pool, feed_id)
            .await
            .context("fetching active participants")
    }

    async fn max_generation(&self, feed_id: FeedId) -> anyhow::Result<Option<Generation>> {
        node_sql::key_generations::max_generation(&self.pool, feed_id)
            .await
            .context("fetching max generation")
    }

    async fn profiles(&self, addresses: &[Address]) -> anyhow::Result<Vec<Profile>> {
        node_sql::profiles::fetch_many(&self.pool, addresses)
            .await
            .context("fetching member profiles")
    }

    async fn commit_rotation(&self, commit: RotationCommit) -> anyhow::Result<()> {
        let feed_id = commit.generation.feed_id;
        let mut txn = self.pool.begin().await.context("starting transaction")?;

        // Row-level serialization behind the keyed rotation lock.
        let previous = node_sql::key_generations::max_generation_for_update(&mut txn, feed_id)
            .await
            .context("locking current generation")?;

        match &commit.membership {
            MembershipMutation::Insert(participant) => {
                node_sql::participants::insert(&mut txn, participant)
                    .await
                    .context("inserting participant")?;
            }
            MembershipMutation::Rejoin { address, at_block } => {
                node_sql::participants::rejoin(&mut txn, feed_id, address, *at_block)
                    .await
                    .context("re-admitting participant")?;
            }
            MembershipMutation::Leave { address, at_block } => {
                node_sql::participants::mark_left(&mut txn, feed_id, address, *at_block)
                    .await
                    .context("marking participant departed")?;
            }
            MembershipMutation::Ban { address, at_block } => {
                node_sql::participants::mark_banned(&mut txn, feed_id, address, *at_block)
                    .await
                    .context("banning participant")?;
            }
        }

        if let Some(previous) = previous {
            node_sql::key_generations::close_generation(
                &mut txn,
                feed_id,
                previous,
                commit.generation.valid_from_block,
            )
            .await
            .context("closing superseded generation")?;
        }
        node_sql::key_generations::insert(&mut txn, &commit.generation)
            .await
            .context("inserting key generation")?;
        node_sql::feeds::update_block_index(&mut txn, feed_id, commit.feed_block_index)
            .await
            .context("advancing feed watermark")?;

        txn.commit().await.context("committing rotation")?;
        Ok(())
    }
}
