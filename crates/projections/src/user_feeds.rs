use crate::metrics::ProjectionMetrics;
use kv::{KvStore, Namespace, Op};
use models::{Address, FeedId};
use std::sync::Arc;
use std::time::Duration;

pub const USER_FEEDS_TTL: Duration = Duration::from_secs(5 * 60);

/// Membership set of feed identifiers per user:
/// `user:{address}:feeds` -> set of feed id strings.
pub struct UserFeedsCache {
    kv: Arc<dyn KvStore>,
    ns: Namespace,
    metrics: ProjectionMetrics,
}

impl UserFeedsCache {
    pub fn new(kv: Arc<dyn KvStore>, ns: Namespace) -> Self {
        Self {
            kv,
            ns,
            metrics: ProjectionMetrics::new("user_feeds"),
        }
    }

    pub fn metrics(&self) -> &ProjectionMetrics {
        &self.metrics
    }

    fn key(&self, address: &Address) -> String {
        self.ns.key(&format!("user:{address}:feeds"))
    }

    /// The user's feed set, or `None` on a miss or any backend error.
    /// Invalid members are skipped. The TTL is refreshed on every
    /// read.
    pub async fn get(&self, address: &Address) -> Option<Vec<FeedId>> {
        let key = self.key(address);
        let result = async {
            if !self.kv.exists(&key).await? {
                return Ok(None);
            }
            let members = self.kv.smembers(&key).await?;
            self.kv.expire(&key, USER_FEEDS_TTL).await?;
            let feeds = members
                .iter()
                .filter_map(|m| match m.parse::<FeedId>() {
                    Ok(id) => Some(id),
                    Err(err) => {
                        tracing::debug!(%key, member = %m, %err, "skipping invalid feed id");
                        None
                    }
                })
                .collect();
            Ok::<_, kv::KvError>(Some(feeds))
        }
        .await;

        match result {
            Ok(Some(feeds)) => {
                self.metrics.hit();
                Some(feeds)
            }
            Ok(None) => {
                self.metrics.miss();
                None
            }
            Err(err) => {
                self.metrics.read_error();
                tracing::warn!(%err, "user-feeds read failed; treating as miss");
                None
            }
        }
    }

    /// Replaces the cached set. An empty feed list deletes the key
    /// rather than caching an empty set.
    pub async fn set(&self, address: &Address, feeds: &[FeedId]) {
        let key = self.key(address);
        let mut ops = vec![Op::Del { key: key.clone() }];
        if !feeds.is_empty() {
            ops.push(Op::SAdd {
                key: key.clone(),
                members: feeds.iter().map(|id| id.to_string()).collect(),
            });
            ops.push(Op::Expire {
                key: key.clone(),
                ttl: USER_FEEDS_TTL,
            });
        }
        match self.kv.atomic(ops).await {
            Ok(()) => self.metrics.write(),
            Err(err) => {
                self.metrics.write_error();
                tracing::warn!(%err, "user-feeds set failed");
            }
        }
    }

    /// Adds one feed, but only when the set is already cached. The
    /// write path must never create a partial cache entry.
    pub async fn add(&self, address: &Address, feed_id: FeedId) {
        let key = self.key(address);
        let result = async {
            if !self.kv.exists(&key).await? {
                return Ok(false);
            }
            self.kv
                .atomic(vec![
                    Op::SAdd {
                        key: key.clone(),
                        members: vec![feed_id.to_string()],
                    },
                    Op::Expire {
                        key: key.clone(),
                        ttl: USER_FEEDS_TTL,
                    },
                ])
                .await?;
            Ok::<_, kv::KvError>(true)
        }
        .await;

        match result {
            Ok(true) => self.metrics.write(),
            Ok(false) => {}
            Err(err) => {
                self.metrics.write_error();
                tracing::warn!(%err, "user-feeds add failed");
            }
        }
    }

    /// Idempotent removal; absent keys and absent members are fine.
    pub async fn remove(&self, address: &Address, feed_id: FeedId) {
        let key = self.key(address);
        let result = async {
            self.kv.srem(&key, &feed_id.to_string()).await?;
            self.kv.expire(&key, USER_FEEDS_TTL).await?;
            Ok::<_, kv::KvError>(())
        }
        .await;

        match result {
            Ok(()) => self.metrics.write(),
            Err(err) => {
                self.metrics.write_error();
                tracing::warn!(%err, "user-feeds remove failed");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use kv::MemoryStore;

    fn cache() -> (Arc<MemoryStore>, UserFeedsCache) {
        let kv = Arc::new(MemoryStore::new());
        let cache = UserFeedsCache::new(kv.clone(), Namespace::new("t"));
        (kv, cache)
    }

    fn feed(b: u8) -> FeedId {
        FeedId::new([b; 16])
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let (_, cache) = cache();
        let alice = Address::from("alice");
        assert_eq!(cache.get(&alice).await, None);

        cache.set(&alice, &[feed(1), feed(2)]).await;
        let mut got = cache.get(&alice).await.unwrap();
        got.sort();
        assert_eq!(got, vec![feed(1), feed(2)]);

        let snap = cache.metrics().snapshot();
        assert_eq!((snap.hits, snap.misses, snap.writes), (1, 1, 1));
    }

    #[tokio::test]
    async fn empty_set_deletes_the_key() {
        let (kv, cache) = cache();
        let alice = Address::from("alice");
        cache.set(&alice, &[feed(1)]).await;
        cache.set(&alice, &[]).await;
        assert!(kv.keys().is_empty());
        assert_eq!(cache.get(&alice).await, None);
    }

    #[tokio::test]
    async fn add_requires_an_existing_key() {
        let (kv, cache) = cache();
        let alice = Address::from("alice");

        // No cached set: add must not create a partial entry.
        cache.add(&alice, feed(1)).await;
        assert!(kv.keys().is_empty());

        cache.set(&alice, &[feed(1)]).await;
        cache.add(&alice, feed(2)).await;
        let mut got = cache.get(&alice).await.unwrap();
        got.sort();
        assert_eq!(got, vec![feed(1), feed(2)]);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let (_, cache) = cache();
        let alice = Address::from("alice");
        cache.remove(&alice, feed(1)).await;

        cache.set(&alice, &[feed(1), feed(2)]).await;
        cache.remove(&alice, feed(1)).await;
        cache.remove(&alice, feed(1)).await;
        assert_eq!(cache.get(&alice).await.unwrap(), vec![feed(2)]);
    }

    #[tokio::test]
    async fn ttl_is_five_minutes() {
        let (kv, cache) = cache();
        let alice = Address::from("alice");
        cache.set(&alice, &[feed(1)]).await;
        let ttl = kv.ttl_of("t:user:alice:feeds").unwrap();
        assert!(ttl <= USER_FEEDS_TTL && ttl > USER_FEEDS_TTL - Duration::from_secs(5));
    }

    #[tokio::test]
    async fn invalid_members_are_skipped() {
        let (kv, cache) = cache();
        let alice = Address::from("alice");
        cache.set(&alice, &[feed(1)]).await;
        kv.sadd("t:user:alice:feeds", "garbage").await.unwrap();

        assert_eq!(cache.get(&alice).await.unwrap(), vec![feed(1)]);
    }
}
