use crate::error::ApiError;
use crate::names::resolve_display_names;
use crate::store::SyncStore;
use models::{Address, BlockIndex, FeedMessage, MessageId, ReactionTally};
use projections::{Caches, MESSAGE_TAIL_LEN};
use serde::Serialize;
use std::sync::Arc;

/// A message with the issuer's display name resolved server-side.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    #[serde(flatten)]
    pub message: FeedMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer_display_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesReply {
    pub messages: Vec<MessageRecord>,
    pub reaction_tallies: Vec<ReactionTally>,
    pub max_tally_version: u64,
}

pub struct MessageService {
    store: Arc<dyn SyncStore>,
    caches: Arc<Caches>,
}

impl MessageService {
    pub fn new(store: Arc<dyn SyncStore>, caches: Arc<Caches>) -> Self {
        Self { store, caches }
    }

    /// Serves new messages across all of the user's feeds. Feed
    /// enumeration deliberately ignores `since_block` (the feed list
    /// is always "all my feeds"); the watermark filters messages
    /// only.
    pub async fn get_feed_messages(
        &self,
        address: &Address,
        since_block: BlockIndex,
        since_tally_version: u64,
    ) -> Result<MessagesReply, ApiError> {
        let feed_ids = match self.caches.user_feeds.get(address).await {
            Some(ids) => ids,
            None => {
                let ids = self
                    .store
                    .feed_ids_for_address(address)
                    .await
                    .map_err(ApiError::db)?;
                self.caches.user_feeds.set(address, &ids).await;
                ids
            }
        };

        let mut messages: Vec<FeedMessage> = Vec::new();
        for &feed_id in &feed_ids {
            match self.caches.tails.get(feed_id, Some(since_block)).await {
                Some(cached) => messages.extend(cached),
                None => {
                    let tail = self
                        .store
                        .message_tail(feed_id, MESSAGE_TAIL_LEN as u32)
                        .await
                        .map_err(ApiError::db)?;
                    self.caches.tails.populate(feed_id, &tail).await;
                    messages.extend(tail.into_iter().filter(|m| m.block_index > since_block));
                }
            }
        }
        messages.sort_by_key(|m| (m.block_index, m.timestamp));

        let mut issuers: Vec<Address> =
            messages.iter().map(|m| m.issuer_address.clone()).collect();
        issuers.sort();
        issuers.dedup();
        let names = resolve_display_names(self.store.as_ref(), &self.caches.identity, &issuers)
            .await?;

        let messages = messages
            .into_iter()
            .map(|message| {
                let issuer_display_name = names.get(&message.issuer_address).cloned();
                MessageRecord {
                    message,
                    issuer_display_name,
                }
            })
            .collect();

        let reaction_tallies = self
            .store
            .tallies_since(&feed_ids, since_tally_version)
            .await
            .map_err(ApiError::db)?;
        let max_tally_version = reaction_tallies
            .iter()
            .map(|t| t.version)
            .max()
            .unwrap_or(since_tally_version);

        Ok(MessagesReply {
            messages,
            reaction_tallies,
            max_tally_version,
        })
    }

    /// Point lookup; deliberately uncached.
    pub async fn get_message(&self, message_id: MessageId) -> Result<FeedMessage, ApiError> {
        self.store
            .message(message_id)
            .await
            .map_err(ApiError::db)?
            .ok_or(ApiError::NotFound("message"))
    }
}
