//! Projection services: derivative views of durable state
//! materialized in the key-value store, one service per key family
//! and TTL policy.
//!
//! Common contract: no service ever returns an error to its caller.
//! Reads convert any failure into a miss, writes into a logged no-op;
//! the database remains the source of truth and the next read-through
//! repopulates. Each service keeps atomic hit/miss/write/error
//! counters, mirrored into the prometheus default registry.

mod feed_meta;
mod group;
mod identity;
pub mod invalidators;
mod message_tail;
mod metrics;
mod push_tokens;
mod read_watermarks;
mod user_feeds;

pub use feed_meta::{FeedMetaEntry, FeedMetadataCache, FEED_META_TTL};
pub use group::{CachedGeneration, EnrichedMember, GroupCache, GROUP_TTL};
pub use identity::{IdentityCache, PROFILE_TTL};
pub use invalidators::MembershipLookup;
pub use message_tail::{MessageTailCache, MESSAGE_TAIL_LEN, MESSAGE_TAIL_TTL};
pub use metrics::{CounterSnapshot, ProjectionMetrics};
pub use push_tokens::{PushTokenCache, PUSH_TOKEN_TTL};
pub use read_watermarks::{ReadWatermarkCache, READ_WATERMARK_TTL};
pub use user_feeds::{UserFeedsCache, USER_FEEDS_TTL};

use kv::{KvStore, Namespace};
use std::sync::Arc;

/// The full set of projection services over one KV store and
/// namespace.
pub struct Caches {
    pub user_feeds: UserFeedsCache,
    pub feed_meta: FeedMetadataCache,
    pub tails: MessageTailCache,
    pub watermarks: ReadWatermarkCache,
    pub identity: IdentityCache,
    pub group: GroupCache,
    pub push_tokens: PushTokenCache,
}

impl Caches {
    pub fn new(kv: Arc<dyn KvStore>, ns: Namespace) -> Self {
        Self {
            user_feeds: UserFeedsCache::new(kv.clone(), ns.clone()),
            feed_meta: FeedMetadataCache::new(kv.clone(), ns.clone()),
            tails: MessageTailCache::new(kv.clone(), ns.clone()),
            watermarks: ReadWatermarkCache::new(kv.clone(), ns.clone()),
            identity: IdentityCache::new(kv.clone(), ns.clone()),
            group: GroupCache::new(kv.clone(), ns.clone()),
            push_tokens: PushTokenCache::new(kv, ns),
        }
    }
}
