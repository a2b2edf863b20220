use crate::metrics::ProjectionMetrics;
use kv::{KvStore, Namespace, Op};
use models::{Address, BlockIndex, FeedId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const READ_WATERMARK_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Per-user hash of per-feed max-read block indexes:
/// `user:{address}:read_positions` -> { feedId -> decimal blockIndex }.
///
/// Writes go through the scripted compare-and-set, so concurrent
/// writers cannot regress a watermark.
pub struct ReadWatermarkCache {
    kv: Arc<dyn KvStore>,
    ns: Namespace,
    metrics: ProjectionMetrics,
}

impl ReadWatermarkCache {
    pub fn new(kv: Arc<dyn KvStore>, ns: Namespace) -> Self {
        Self {
            kv,
            ns,
            metrics: ProjectionMetrics::new("read_watermarks"),
        }
    }

    pub fn metrics(&self) -> &ProjectionMetrics {
        &self.metrics
    }

    fn key(&self, address: &Address) -> String {
        self.ns.key(&format!("user:{address}:read_positions"))
    }

    fn legacy_key(&self, address: &Address, feed_id: FeedId) -> String {
        self.ns.key(&format!("user:{address}:read:{feed_id}"))
    }

    /// MAX-wins advancement. Returns whether this call advanced the
    /// stored watermark; `false` also covers backend failure (the
    /// database remains the source of truth).
    pub async fn set(&self, address: &Address, feed_id: FeedId, block_index: BlockIndex) -> bool {
        let key = self.key(address);
        match self
            .kv
            .hset_if_greater(&key, &feed_id.to_string(), block_index)
            .await
        {
            Ok(true) => {
                self.metrics.write();
                if let Err(err) = self.kv.expire(&key, READ_WATERMARK_TTL).await {
                    tracing::warn!(%err, "read-watermark ttl refresh failed");
                }
                true
            }
            Ok(false) => false,
            Err(err) => {
                self.metrics.write_error();
                tracing::warn!(%err, "read-watermark set failed");
                false
            }
        }
    }

    pub async fn get_all(&self, address: &Address) -> Option<HashMap<FeedId, BlockIndex>> {
        let key = self.key(address);
        let fields = match self.kv.hgetall(&key).await {
            Ok(fields) => fields,
            Err(err) => {
                self.metrics.read_error();
                tracing::warn!(%err, "read-watermark read failed; treating as miss");
                return None;
            }
        };
        if fields.is_empty() {
            self.metrics.miss();
            return None;
        }

        let mut positions = HashMap::with_capacity(fields.len());
        for (field, value) in &fields {
            match (field.parse::<FeedId>(), value.parse::<BlockIndex>()) {
                (Ok(feed_id), Ok(block)) => {
                    positions.insert(feed_id, block);
                }
                _ => {
                    tracing::debug!(%key, field, "skipping unparseable read position");
                }
            }
        }
        self.metrics.hit();
        Some(positions)
    }

    /// Bulk repopulation after a miss (or legacy import).
    pub async fn set_all(&self, address: &Address, positions: &HashMap<FeedId, BlockIndex>) {
        if positions.is_empty() {
            return;
        }
        let key = self.key(address);
        let fields = positions
            .iter()
            .map(|(feed_id, block)| (feed_id.to_string(), block.to_string()))
            .collect();
        let result = self
            .kv
            .atomic(vec![
                Op::HSet {
                    key: key.clone(),
                    fields,
                },
                Op::Expire {
                    key,
                    ttl: READ_WATERMARK_TTL,
                },
            ])
            .await;
        match result {
            Ok(()) => self.metrics.write(),
            Err(err) => {
                self.metrics.write_error();
                tracing::warn!(%err, "read-watermark set-all failed");
            }
        }
    }

    /// One-shot migration from the legacy per-feed key layout
    /// (`user:{address}:read:{feedId}` string keys), invoked on the
    /// first miss. Imports whatever legacy keys exist for the given
    /// feeds into the hash and deletes them.
    pub async fn import_legacy(
        &self,
        address: &Address,
        feed_ids: &[FeedId],
    ) -> Option<HashMap<FeedId, BlockIndex>> {
        let mut imported = HashMap::new();
        let mut stale_keys = Vec::new();
        for &feed_id in feed_ids {
            let legacy = self.legacy_key(address, feed_id);
            match self.kv.get(&legacy).await {
                Ok(Some(value)) => {
                    if let Ok(block) = value.parse::<BlockIndex>() {
                        imported.insert(feed_id, block);
                    }
                    stale_keys.push(legacy);
                }
                Ok(None) => {}
                Err(err) => {
                    self.metrics.read_error();
                    tracing::warn!(%err, "legacy read-position scan failed");
                    return None;
                }
            }
        }
        if imported.is_empty() {
            return None;
        }

        self.set_all(address, &imported).await;
        let dels = stale_keys.into_iter().map(|key| Op::Del { key }).collect();
        if let Err(err) = self.kv.atomic(dels).await {
            tracing::warn!(%err, "legacy read-position cleanup failed");
        }
        tracing::debug!(%address, imported = imported.len(), "migrated legacy read positions");
        Some(imported)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn cache() -> (Arc<kv::MemoryStore>, ReadWatermarkCache) {
        let kv = Arc::new(kv::MemoryStore::new());
        let cache = ReadWatermarkCache::new(kv.clone(), Namespace::new("t"));
        (kv, cache)
    }

    fn feed(b: u8) -> FeedId {
        FeedId::new([b; 16])
    }

    #[tokio::test]
    async fn set_is_max_wins() {
        let (_, cache) = cache();
        let alice = Address::from("alice");

        assert!(cache.set(&alice, feed(1), 100).await);
        assert!(!cache.set(&alice, feed(1), 50).await);
        assert!(cache.set(&alice, feed(1), 150).await);

        let got = cache.get_all(&alice).await.unwrap();
        assert_eq!(got[&feed(1)], 150);
    }

    #[tokio::test]
    async fn concurrent_sets_keep_the_maximum() {
        let (_, cache) = cache();
        let cache = Arc::new(cache);
        let alice = Address::from("alice");
        cache.set(&alice, feed(1), 100).await;

        let low = {
            let (cache, alice) = (cache.clone(), alice.clone());
            tokio::spawn(async move { cache.set(&alice, feed(1), 50).await })
        };
        let high = {
            let (cache, alice) = (cache.clone(), alice.clone());
            tokio::spawn(async move { cache.set(&alice, feed(1), 150).await })
        };
        assert!(!low.await.unwrap());
        assert!(high.await.unwrap());

        assert_eq!(cache.get_all(&alice).await.unwrap()[&feed(1)], 150);
    }

    #[tokio::test]
    async fn set_all_then_get_all_round_trips() {
        let (kv, cache) = cache();
        let alice = Address::from("alice");
        let positions = HashMap::from([(feed(1), 10), (feed(2), 20)]);
        cache.set_all(&alice, &positions).await;

        assert_eq!(cache.get_all(&alice).await.unwrap(), positions);
        let ttl = kv.ttl_of("t:user:alice:read_positions").unwrap();
        assert!(ttl <= READ_WATERMARK_TTL);
    }

    #[tokio::test]
    async fn legacy_keys_are_imported_once() {
        let (kv, cache) = cache();
        let alice = Address::from("alice");
        let legacy_key = format!("t:user:alice:read:{}", feed(1));
        kv.set(&legacy_key, "42", None).await.unwrap();

        let imported = cache
            .import_legacy(&alice, &[feed(1), feed(2)])
            .await
            .unwrap();
        assert_eq!(imported, HashMap::from([(feed(1), 42)]));

        // The legacy key is gone and the hash answers now.
        assert_eq!(kv.get(&legacy_key).await.unwrap(), None);
        assert_eq!(cache.get_all(&alice).await.unwrap()[&feed(1)], 42);

        // Nothing left to import.
        assert_eq!(cache.import_legacy(&alice, &[feed(1)]).await, None);
    }
}
