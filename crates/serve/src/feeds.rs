use crate::error::ApiError;
use crate::store::SyncStore;
use models::titles::{self, TitleError};
use models::{current_generation, Address, BlockIndex, FeedId, FeedType};
use projections::{Caches, FeedMetaEntry};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// One feed as emitted to a syncing client. `effectiveBlockIndex`
/// joins the feed watermark with every participant's profile
/// watermark, so a rename anywhere in the feed invalidates the
/// client's copy.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRecord {
    pub feed_id: FeedId,
    pub title: String,
    #[serde(rename = "type")]
    pub feed_type: FeedType,
    pub effective_block_index: BlockIndex,
    pub participants: Vec<Address>,
    pub created_at_block: BlockIndex,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_key_generation: Option<models::Generation>,
}

impl From<(&FeedId, &FeedMetaEntry)> for FeedRecord {
    fn from((feed_id, entry): (&FeedId, &FeedMetaEntry)) -> Self {
        FeedRecord {
            feed_id: *feed_id,
            title: entry.title.clone(),
            feed_type: entry.feed_type,
            effective_block_index: entry.last_block_index,
            participants: entry.participants.clone(),
            created_at_block: entry.created_at_block,
            current_key_generation: entry.current_key_generation,
        }
    }
}

pub struct FeedService {
    store: Arc<dyn SyncStore>,
    caches: Arc<Caches>,
}

impl FeedService {
    pub fn new(store: Arc<dyn SyncStore>, caches: Arc<Caches>) -> Self {
        Self { store, caches }
    }

    pub async fn has_personal_feed(&self, address: &Address) -> Result<bool, ApiError> {
        self.store
            .has_personal_feed(address)
            .await
            .map_err(ApiError::db)
    }

    pub async fn feed_exists(&self, feed_id: FeedId) -> Result<bool, ApiError> {
        self.store.feed_exists(feed_id).await.map_err(ApiError::db)
    }

    /// The idle-sync workhorse: serves the feed list from the
    /// metadata hash, deriving it from the database only on a miss.
    /// `since_block` filters to feeds whose effective block advanced
    /// past the client's watermark.
    pub async fn get_feeds(
        &self,
        address: &Address,
        since_block: BlockIndex,
    ) -> Result<Vec<FeedRecord>, ApiError> {
        let entries = match self.caches.feed_meta.get_all(address).await {
            Some(entries) => entries,
            None => {
                let entries = self.derive_entries(address).await?;
                self.caches.feed_meta.set_many(address, &entries).await;
                entries
            }
        };

        let mut records: Vec<FeedRecord> = entries
            .iter()
            .filter(|(_, entry)| entry.last_block_index > since_block)
            .map(FeedRecord::from)
            .collect();
        records.sort_by_key(|r| r.created_at_block);
        Ok(records)
    }

    /// Full per-user metadata derivation: feeds, participants,
    /// profiles, title rules, and the effective block computation.
    async fn derive_entries(
        &self,
        address: &Address,
    ) -> Result<HashMap<FeedId, FeedMetaEntry>, ApiError> {
        let feeds = self
            .store
            .feeds_for_address(address)
            .await
            .map_err(ApiError::db)?;

        let mut entries = HashMap::with_capacity(feeds.len());
        for feed in feeds {
            let participants = self
                .store
                .participants(feed.feed_id)
                .await
                .map_err(ApiError::db)?;
            let active: Vec<_> = participants
                .into_iter()
                .filter(|p| p.is_active())
                .collect();
            let addresses: Vec<Address> = active.iter().map(|p| p.address.clone()).collect();
            let profiles = self.store.profiles(&addresses).await.map_err(ApiError::db)?;

            let aliases: BTreeMap<Address, String> = profiles
                .iter()
                .map(|p| (p.address.clone(), p.alias.clone()))
                .collect();
            let title = match titles::feed_title(&feed, address, &active, &aliases) {
                Ok(title) => title,
                Err(err @ TitleError::EmptyTitle { .. }) => {
                    return Err(ApiError::Validation(err.to_string()));
                }
                Err(err) => {
                    return Err(ApiError::Internal(anyhow::Error::new(err)));
                }
            };

            let effective = models::effective_block_index(
                feed.block_index,
                profiles.iter().map(|p| p.block_index),
            );
            let current_key_generation = if feed.feed_type == FeedType::Group {
                let generations = self
                    .store
                    .key_generations(feed.feed_id)
                    .await
                    .map_err(ApiError::db)?;
                current_generation(
                    &generations.iter().map(|g| g.generation).collect::<Vec<_>>(),
                )
            } else {
                None
            };

            entries.insert(
                feed.feed_id,
                FeedMetaEntry {
                    title,
                    feed_type: feed.feed_type,
                    last_block_index: effective,
                    participants: addresses,
                    created_at_block: feed.created_at_block,
                    current_key_generation,
                },
            );
        }
        Ok(entries)
    }
}
