use crate::metrics::ProjectionMetrics;
use kv::{KvStore, Namespace, Op};
use models::{Address, BlockIndex, FeedId, FeedType, Generation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const FEED_META_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// One cached feed summary as seen by one user. Entries predating the
/// current shape lack `title`/`participants` and fail to parse, which
/// deliberately turns the whole read into a miss so the handler
/// re-derives the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedMetaEntry {
    pub title: String,
    #[serde(rename = "type")]
    pub feed_type: FeedType,
    /// Effective block index of the feed for this user; drives client
    /// cache invalidation.
    pub last_block_index: BlockIndex,
    pub participants: Vec<Address>,
    pub created_at_block: BlockIndex,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_key_generation: Option<Generation>,
}

/// Per-user hash of feed summaries:
/// `user:{address}:feed_meta` -> { feedId -> JSON(FeedMetaEntry) }.
pub struct FeedMetadataCache {
    kv: Arc<dyn KvStore>,
    ns: Namespace,
    metrics: ProjectionMetrics,
}

impl FeedMetadataCache {
    pub fn new(kv: Arc<dyn KvStore>, ns: Namespace) -> Self {
        Self {
            kv,
            ns,
            metrics: ProjectionMetrics::new("feed_meta"),
        }
    }

    pub fn metrics(&self) -> &ProjectionMetrics {
        &self.metrics
    }

    fn key(&self, address: &Address) -> String {
        self.ns.key(&format!("user:{address}:feed_meta"))
    }

    /// The full metadata map, or `None` on miss, backend error, or any
    /// legacy/unparseable entry.
    pub async fn get_all(&self, address: &Address) -> Option<HashMap<FeedId, FeedMetaEntry>> {
        let key = self.key(address);
        let fields = match self.kv.hgetall(&key).await {
            Ok(fields) => fields,
            Err(err) => {
                self.metrics.read_error();
                tracing::warn!(%err, "feed-meta read failed; treating as miss");
                return None;
            }
        };
        if fields.is_empty() {
            self.metrics.miss();
            return None;
        }

        let mut entries = HashMap::with_capacity(fields.len());
        for (field, value) in &fields {
            let feed_id: FeedId = match field.parse() {
                Ok(id) => id,
                Err(err) => {
                    tracing::debug!(%key, field, %err, "unparseable feed id; forcing re-derivation");
                    self.metrics.miss();
                    return None;
                }
            };
            match serde_json::from_str::<FeedMetaEntry>(value) {
                Ok(entry) => {
                    entries.insert(feed_id, entry);
                }
                Err(err) => {
                    // Legacy shape (lastBlockIndex only) or corruption.
                    tracing::debug!(%key, field, %err, "legacy feed-meta entry; forcing re-derivation");
                    self.metrics.miss();
                    return None;
                }
            }
        }
        self.metrics.hit();
        Some(entries)
    }

    pub async fn set_one(&self, address: &Address, feed_id: FeedId, entry: &FeedMetaEntry) {
        let key = self.key(address);
        let value = match serde_json::to_string(entry) {
            Ok(value) => value,
            Err(err) => {
                self.metrics.write_error();
                tracing::warn!(%err, "feed-meta entry failed to serialize");
                return;
            }
        };
        let result = self
            .kv
            .atomic(vec![
                Op::HSet {
                    key: key.clone(),
                    fields: vec![(feed_id.to_string(), value)],
                },
                Op::Expire {
                    key,
                    ttl: FEED_META_TTL,
                },
            ])
            .await;
        match result {
            Ok(()) => self.metrics.write(),
            Err(err) => {
                self.metrics.write_error();
                tracing::warn!(%err, "feed-meta set failed");
            }
        }
    }

    pub async fn set_many(&self, address: &Address, entries: &HashMap<FeedId, FeedMetaEntry>) {
        if entries.is_empty() {
            return;
        }
        let key = self.key(address);
        let mut fields = Vec::with_capacity(entries.len());
        for (feed_id, entry) in entries {
            match serde_json::to_string(entry) {
                Ok(value) => fields.push((feed_id.to_string(), value)),
                Err(err) => {
                    self.metrics.write_error();
                    tracing::warn!(%err, "feed-meta entry failed to serialize");
                    return;
                }
            }
        }
        let result = self
            .kv
            .atomic(vec![
                Op::HSet {
                    key: key.clone(),
                    fields,
                },
                Op::Expire {
                    key,
                    ttl: FEED_META_TTL,
                },
            ])
            .await;
        match result {
            Ok(()) => self.metrics.write(),
            Err(err) => {
                self.metrics.write_error();
                tracing::warn!(%err, "feed-meta set failed");
            }
        }
    }

    /// Advances one entry's `lastBlockIndex`. A no-op when the field
    /// is absent or unparseable: the write path never forges partial
    /// entries.
    pub async fn update_last_block_index(
        &self,
        address: &Address,
        feed_id: FeedId,
        block_index: BlockIndex,
        current_key_generation: Option<Generation>,
    ) {
        self.patch(address, feed_id, |entry| {
            entry.last_block_index = entry.last_block_index.max(block_index);
            if current_key_generation.is_some() {
                entry.current_key_generation = current_key_generation;
            }
        })
        .await
    }

    /// Rewrites one entry's title (identity renames, group renames).
    pub async fn update_title(&self, address: &Address, feed_id: FeedId, title: &str) {
        self.patch(address, feed_id, |entry| {
            entry.title = title.to_string();
        })
        .await
    }

    async fn patch(
        &self,
        address: &Address,
        feed_id: FeedId,
        apply: impl FnOnce(&mut FeedMetaEntry),
    ) {
        let key = self.key(address);
        let field = feed_id.to_string();
        let result = async {
            let Some(value) = self.kv.hget(&key, &field).await? else {
                return Ok(false);
            };
            let Ok(mut entry) = serde_json::from_str::<FeedMetaEntry>(&value) else {
                // Legacy entry; the next read misses and re-derives.
                return Ok(false);
            };
            apply(&mut entry);
            let Ok(value) = serde_json::to_string(&entry) else {
                return Ok(false);
            };
            self.kv
                .atomic(vec![
                    Op::HSet {
                        key: key.clone(),
                        fields: vec![(field.clone(), value)],
                    },
                    Op::Expire {
                        key: key.clone(),
                        ttl: FEED_META_TTL,
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
                tracing::warn!(%err, "feed-meta update failed");
            }
        }
    }

    pub async fn remove(&self, address: &Address, feed_id: FeedId) {
        let key = self.key(address);
        match self.kv.hdel(&key, &feed_id.to_string()).await {
            Ok(()) => self.metrics.write(),
            Err(err) => {
                self.metrics.write_error();
                tracing::warn!(%err, "feed-meta remove failed");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use kv::MemoryStore;

    fn cache() -> (Arc<MemoryStore>, FeedMetadataCache) {
        let kv = Arc::new(MemoryStore::new());
        let cache = FeedMetadataCache::new(kv.clone(), Namespace::new("t"));
        (kv, cache)
    }

    fn entry(title: &str, block: BlockIndex) -> FeedMetaEntry {
        FeedMetaEntry {
            title: title.to_string(),
            feed_type: FeedType::Chat,
            last_block_index: block,
            participants: vec![Address::from("alice"), Address::from("bob")],
            created_at_block: 1,
            current_key_generation: None,
        }
    }

    fn feed(b: u8) -> FeedId {
        FeedId::new([b; 16])
    }

    #[tokio::test]
    async fn set_many_then_get_all() {
        let (kv, cache) = cache();
        let alice = Address::from("alice");
        let entries = HashMap::from([(feed(1), entry("Bob", 10)), (feed(2), entry("Carol", 12))]);
        cache.set_many(&alice, &entries).await;

        assert_eq!(cache.get_all(&alice).await.unwrap(), entries);
        let ttl = kv.ttl_of("t:user:alice:feed_meta").unwrap();
        assert!(ttl <= FEED_META_TTL);
    }

    #[tokio::test]
    async fn legacy_entry_forces_full_miss() {
        let (kv, cache) = cache();
        let alice = Address::from("alice");
        cache
            .set_many(&alice, &HashMap::from([(feed(1), entry("Bob", 10))]))
            .await;
        // A legacy lastBlockIndex-only entry alongside a current one.
        kv.hset(
            "t:user:alice:feed_meta",
            &feed(2).to_string(),
            r#"{"lastBlockIndex":7}"#,
        )
        .await
        .unwrap();

        assert_eq!(cache.get_all(&alice).await, None);
    }

    #[tokio::test]
    async fn update_last_block_index_requires_existing_field() {
        let (_, cache) = cache();
        let alice = Address::from("alice");

        // Absent field: nothing is forged.
        cache.update_last_block_index(&alice, feed(1), 12, None).await;
        assert_eq!(cache.get_all(&alice).await, None);

        cache.set_one(&alice, feed(1), &entry("Bob", 10)).await;
        cache.update_last_block_index(&alice, feed(1), 12, Some(3)).await;
        let got = cache.get_all(&alice).await.unwrap();
        assert_eq!(got[&feed(1)].last_block_index, 12);
        assert_eq!(got[&feed(1)].current_key_generation, Some(3));

        // Regressions are ignored; the index is monotone.
        cache.update_last_block_index(&alice, feed(1), 5, None).await;
        let got = cache.get_all(&alice).await.unwrap();
        assert_eq!(got[&feed(1)].last_block_index, 12);
    }

    #[tokio::test]
    async fn update_title_rewrites_in_place() {
        let (_, cache) = cache();
        let alice = Address::from("alice");
        cache.set_one(&alice, feed(1), &entry("Bob", 10)).await;
        cache.update_title(&alice, feed(1), "Robert").await;

        let got = cache.get_all(&alice).await.unwrap();
        assert_eq!(got[&feed(1)].title, "Robert");
        assert_eq!(got[&feed(1)].last_block_index, 10);
    }

    #[tokio::test]
    async fn remove_drops_one_entry() {
        let (_, cache) = cache();
        let alice = Address::from("alice");
        let entries = HashMap::from([(feed(1), entry("Bob", 10)), (feed(2), entry("Carol", 12))]);
        cache.set_many(&alice, &entries).await;
        cache.remove(&alice, feed(1)).await;

        let got = cache.get_all(&alice).await.unwrap();
        assert_eq!(got.len(), 1);
        assert!(got.contains_key(&feed(2)));
    }

    #[tokio::test]
    async fn entry_json_shape_is_stable() {
        let e = entry("Bob", 10);
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "title": "Bob",
                "type": "chat",
                "lastBlockIndex": 10,
                "participants": ["alice", "bob"],
                "createdAtBlock": 1,
            })
        );
    }
}
