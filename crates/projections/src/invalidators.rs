use crate::Caches;
use events::{Bus, Event};
use models::{Address, Feed, FeedId, FeedParticipant, FeedType};
use std::sync::Arc;

/// Narrow database lookup needed by the event handlers, kept behind a
/// trait so the invalidators are testable without Postgres.
#[async_trait::async_trait]
pub trait MembershipLookup: Send + Sync + 'static {
    /// Feeds the address actively belongs to, with each feed's
    /// participants.
    async fn feeds_for_address(
        &self,
        address: &Address,
    ) -> anyhow::Result<Vec<(Feed, Vec<FeedParticipant>)>>;

    /// All participants of one feed.
    async fn participants(&self, feed_id: FeedId) -> anyhow::Result<Vec<FeedParticipant>>;
}

/// Subscribes to the bus and translates domain events into targeted
/// projection mutations. Handler failures are logged and swallowed;
/// the projections repopulate from the database on the next miss.
pub fn spawn(
    bus: &Bus,
    caches: Arc<Caches>,
    lookup: Arc<dyn MembershipLookup>,
) -> tokio::task::JoinHandle<()> {
    let mut subscription = bus.subscribe();
    tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            if let Err(err) = handle(&caches, lookup.as_ref(), &event).await {
                tracing::warn!(?event, %err, "event handler failed; cache repopulates on next miss");
            }
        }
        tracing::debug!("event bus closed; invalidator task exiting");
    })
}

async fn handle(
    caches: &Caches,
    lookup: &dyn MembershipLookup,
    event: &Event,
) -> anyhow::Result<()> {
    match event {
        Event::IdentityUpdated {
            address,
            display_name,
            block_index,
        } => {
            caches.identity.invalidate_profile(address).await;
            caches.identity.set_display_name(address, display_name).await;

            for (feed, participants) in lookup.feeds_for_address(address).await? {
                caches.group.invalidate_members(feed.feed_id).await;

                for viewer in participants.iter().filter(|p| p.is_active()) {
                    // The renamed profile advances the feed's effective
                    // block for every viewer.
                    caches
                        .feed_meta
                        .update_last_block_index(&viewer.address, feed.feed_id, *block_index, None)
                        .await;
                }
                match feed.feed_type {
                    FeedType::Personal => {
                        caches
                            .feed_meta
                            .update_title(address, feed.feed_id, &format!("{display_name} (YOU)"))
                            .await;
                    }
                    FeedType::Chat => {
                        for viewer in participants
                            .iter()
                            .filter(|p| p.is_active() && &p.address != address)
                        {
                            caches
                                .feed_meta
                                .update_title(&viewer.address, feed.feed_id, display_name)
                                .await;
                        }
                    }
                    // Group and broadcast titles do not derive from
                    // participant aliases.
                    FeedType::Group | FeedType::Broadcast => {}
                }
            }
        }
        Event::UserJoinedGroup {
            feed_id,
            address,
            at_block,
        } => {
            caches.group.add_participant(*feed_id, address).await;
            caches.group.invalidate_key_generations(*feed_id).await;
            caches.group.invalidate_members(*feed_id).await;
            caches.user_feeds.add(address, *feed_id).await;
            bump_members(caches, lookup, *feed_id, *at_block).await?;
        }
        Event::UserLeftGroup {
            feed_id,
            address,
            at_block,
        }
        | Event::UserBannedFromGroup {
            feed_id,
            address,
            at_block,
        } => {
            caches.group.remove_participant(*feed_id, address).await;
            caches.group.invalidate_key_generations(*feed_id).await;
            caches.group.invalidate_members(*feed_id).await;
            caches.user_feeds.remove(address, *feed_id).await;
            caches.feed_meta.remove(address, *feed_id).await;
            bump_members(caches, lookup, *feed_id, *at_block).await?;
        }
        Event::GroupTitleChanged { feed_id, title } => {
            for p in lookup.participants(*feed_id).await? {
                if p.is_active() {
                    caches.feed_meta.update_title(&p.address, *feed_id, title).await;
                }
            }
        }
    }
    Ok(())
}

/// Advances every remaining member's cached `lastBlockIndex` so their
/// next sync observes the membership change.
async fn bump_members(
    caches: &Caches,
    lookup: &dyn MembershipLookup,
    feed_id: FeedId,
    at_block: u64,
) -> anyhow::Result<()> {
    for p in lookup.participants(feed_id).await? {
        if p.is_active() {
            caches
                .feed_meta
                .update_last_block_index(&p.address, feed_id, at_block, None)
                .await;
        }
    }
    Ok(())
}
