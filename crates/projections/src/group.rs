use crate::metrics::ProjectionMetrics;
use kv::{KvStore, Namespace, Op};
use models::{Address, BlockIndex, FeedId, Generation, KeyGeneration, ParticipantRole};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const GROUP_TTL: Duration = Duration::from_secs(60 * 60);

/// Cached form of one key generation. `validToBlock` is retained in
/// the blob but never surfaced to clients, which disambiguate via
/// each message's `keyGeneration` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedGeneration {
    pub version: Generation,
    pub valid_from_block: BlockIndex,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_to_block: Option<BlockIndex>,
    pub encrypted_keys_by_member: BTreeMap<Address, String>,
}

impl From<&KeyGeneration> for CachedGeneration {
    fn from(g: &KeyGeneration) -> Self {
        CachedGeneration {
            version: g.generation,
            valid_from_block: g.valid_from_block,
            valid_to_block: g.valid_to_block,
            encrypted_keys_by_member: g.encrypted_keys.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyBundle {
    key_generations: Vec<CachedGeneration>,
}

/// One entry of the enriched member list, with the display name
/// already resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedMember {
    pub address: Address,
    pub display_name: String,
    pub role: ParticipantRole,
    pub joined_at_block: BlockIndex,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_at_block: Option<BlockIndex>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemberList {
    members: Vec<EnrichedMember>,
}

/// Group-feed projections, three key families with one TTL policy:
/// the active-participant set `feed:{feedId}:participants`, the
/// key-generation bundle `feed:{feedId}:keys`, and the enriched member
/// list `group:{feedId}:members`.
pub struct GroupCache {
    kv: Arc<dyn KvStore>,
    ns: Namespace,
    metrics: ProjectionMetrics,
}

impl GroupCache {
    pub fn new(kv: Arc<dyn KvStore>, ns: Namespace) -> Self {
        Self {
            kv,
            ns,
            metrics: ProjectionMetrics::new("group"),
        }
    }

    pub fn metrics(&self) -> &ProjectionMetrics {
        &self.metrics
    }

    fn participants_key(&self, feed_id: FeedId) -> String {
        self.ns.key(&format!("feed:{feed_id}:participants"))
    }

    fn keys_key(&self, feed_id: FeedId) -> String {
        self.ns.key(&format!("feed:{feed_id}:keys"))
    }

    fn members_key(&self, feed_id: FeedId) -> String {
        self.ns.key(&format!("group:{feed_id}:members"))
    }

    /// Active member addresses, TTL refreshed on hit.
    pub async fn participants(&self, feed_id: FeedId) -> Option<Vec<Address>> {
        let key = self.participants_key(feed_id);
        let result = async {
            if !self.kv.exists(&key).await? {
                return Ok(None);
            }
            let members = self.kv.smembers(&key).await?;
            self.kv.expire(&key, GROUP_TTL).await?;
            Ok::<_, kv::KvError>(Some(members.into_iter().map(Address::from).collect()))
        }
        .await;

        match result {
            Ok(Some(members)) => {
                self.metrics.hit();
                Some(members)
            }
            Ok(None) => {
                self.metrics.miss();
                None
            }
            Err(err) => {
                self.metrics.read_error();
                tracing::warn!(%err, "participants read failed; treating as miss");
                None
            }
        }
    }

    pub async fn set_participants(&self, feed_id: FeedId, members: &[Address]) {
        let key = self.participants_key(feed_id);
        let mut ops = vec![Op::Del { key: key.clone() }];
        if !members.is_empty() {
            ops.push(Op::SAdd {
                key: key.clone(),
                members: members.iter().map(|a| a.to_string()).collect(),
            });
            ops.push(Op::Expire {
                key: key.clone(),
                ttl: GROUP_TTL,
            });
        }
        match self.kv.atomic(ops).await {
            Ok(()) => self.metrics.write(),
            Err(err) => {
                self.metrics.write_error();
                tracing::warn!(%err, "participants set failed");
            }
        }
    }

    /// Guarded add: a missing set is left missing rather than becoming
    /// a one-member partial entry.
    pub async fn add_participant(&self, feed_id: FeedId, address: &Address) {
        let key = self.participants_key(feed_id);
        let result = async {
            if !self.kv.exists(&key).await? {
                return Ok(false);
            }
            self.kv
                .atomic(vec![
                    Op::SAdd {
                        key: key.clone(),
                        members: vec![address.to_string()],
                    },
                    Op::Expire {
                        key: key.clone(),
                        ttl: GROUP_TTL,
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
                tracing::warn!(%err, "participant add failed");
            }
        }
    }

    pub async fn invalidate_participants(&self, feed_id: FeedId) {
        let key = self.participants_key(feed_id);
        match self.kv.del(&key).await {
            Ok(()) => self.metrics.write(),
            Err(err) => {
                self.metrics.write_error();
                tracing::warn!(%err, "participants invalidate failed");
            }
        }
    }

    /// Idempotent removal.
    pub async fn remove_participant(&self, feed_id: FeedId, address: &Address) {
        let key = self.participants_key(feed_id);
        match self.kv.srem(&key, address.as_str()).await {
            Ok(()) => self.metrics.write(),
            Err(err) => {
                self.metrics.write_error();
                tracing::warn!(%err, "participant remove failed");
            }
        }
    }

    /// The cached key-generation bundle, ascending by version. TTL
    /// refreshed on hit.
    pub async fn key_generations(&self, feed_id: FeedId) -> Option<Vec<CachedGeneration>> {
        let key = self.keys_key(feed_id);
        let result = async {
            let Some(value) = self.kv.get(&key).await? else {
                return Ok(None);
            };
            let bundle = match serde_json::from_str::<KeyBundle>(&value) {
                Ok(bundle) => bundle,
                Err(err) => {
                    tracing::debug!(%key, %err, "malformed key bundle; treating as miss");
                    return Ok(None);
                }
            };
            self.kv.expire(&key, GROUP_TTL).await?;
            Ok::<_, kv::KvError>(Some(bundle.key_generations))
        }
        .await;

        match result {
            Ok(Some(generations)) => {
                self.metrics.hit();
                Some(generations)
            }
            Ok(None) => {
                self.metrics.miss();
                None
            }
            Err(err) => {
                self.metrics.read_error();
                tracing::warn!(%err, "key-bundle read failed; treating as miss");
                None
            }
        }
    }

    pub async fn set_key_generations(&self, feed_id: FeedId, generations: &[KeyGeneration]) {
        let key = self.keys_key(feed_id);
        let mut cached: Vec<CachedGeneration> =
            generations.iter().map(CachedGeneration::from).collect();
        cached.sort_by_key(|g| g.version);
        let bundle = KeyBundle {
            key_generations: cached,
        };
        let value = match serde_json::to_string(&bundle) {
            Ok(value) => value,
            Err(err) => {
                self.metrics.write_error();
                tracing::warn!(%err, "key bundle failed to serialize");
                return;
            }
        };
        match self.kv.set(&key, &value, Some(GROUP_TTL)).await {
            Ok(()) => self.metrics.write(),
            Err(err) => {
                self.metrics.write_error();
                tracing::warn!(%err, "key-bundle set failed");
            }
        }
    }

    /// Deleted on every membership change; repopulated by the next
    /// key-generation read.
    pub async fn invalidate_key_generations(&self, feed_id: FeedId) {
        let key = self.keys_key(feed_id);
        match self.kv.del(&key).await {
            Ok(()) => self.metrics.write(),
            Err(err) => {
                self.metrics.write_error();
                tracing::warn!(%err, "key-bundle invalidate failed");
            }
        }
    }

    /// The enriched member list with resolved display names. TTL
    /// refreshed on hit.
    pub async fn members(&self, feed_id: FeedId) -> Option<Vec<EnrichedMember>> {
        let key = self.members_key(feed_id);
        let result = async {
            let Some(value) = self.kv.get(&key).await? else {
                return Ok(None);
            };
            let list = match serde_json::from_str::<MemberList>(&value) {
                Ok(list) => list,
                Err(err) => {
                    tracing::debug!(%key, %err, "malformed member list; treating as miss");
                    return Ok(None);
                }
            };
            self.kv.expire(&key, GROUP_TTL).await?;
            Ok::<_, kv::KvError>(Some(list.members))
        }
        .await;

        match result {
            Ok(Some(members)) => {
                self.metrics.hit();
                Some(members)
            }
            Ok(None) => {
                self.metrics.miss();
                None
            }
            Err(err) => {
                self.metrics.read_error();
                tracing::warn!(%err, "member-list read failed; treating as miss");
                None
            }
        }
    }

    pub async fn set_members(&self, feed_id: FeedId, members: &[EnrichedMember]) {
        let key = self.members_key(feed_id);
        let value = match serde_json::to_string(&MemberList {
            members: members.to_vec(),
        }) {
            Ok(value) => value,
            Err(err) => {
                self.metrics.write_error();
                tracing::warn!(%err, "member list failed to serialize");
                return;
            }
        };
        match self.kv.set(&key, &value, Some(GROUP_TTL)).await {
            Ok(()) => self.metrics.write(),
            Err(err) => {
                self.metrics.write_error();
                tracing::warn!(%err, "member-list set failed");
            }
        }
    }

    pub async fn invalidate_members(&self, feed_id: FeedId) {
        let key = self.members_key(feed_id);
        match self.kv.del(&key).await {
            Ok(()) => self.metrics.write(),
            Err(err) => {
                self.metrics.write_error();
                tracing::warn!(%err, "member-list invalidate failed");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use models::RotationTrigger;

    fn cache() -> (Arc<kv::MemoryStore>, GroupCache) {
        let kv = Arc::new(kv::MemoryStore::new());
        let cache = GroupCache::new(kv.clone(), Namespace::new("t"));
        (kv, cache)
    }

    fn feed() -> FeedId {
        FeedId::new([3; 16])
    }

    fn generation(version: Generation, members: &[&str]) -> KeyGeneration {
        KeyGeneration {
            feed_id: feed(),
            generation: version,
            valid_from_block: 10 * version as u64,
            valid_to_block: None,
            trigger: RotationTrigger::Join,
            encrypted_keys: members
                .iter()
                .map(|m| (Address::from(*m), format!("cipher-for-{m}")))
                .collect(),
        }
    }

    #[tokio::test]
    async fn participant_set_guarded_add_and_remove() {
        let (_, cache) = cache();

        // Guarded: no set cached yet.
        cache.add_participant(feed(), &Address::from("bob")).await;
        assert_eq!(cache.participants(feed()).await, None);

        cache
            .set_participants(feed(), &[Address::from("alice")])
            .await;
        cache.add_participant(feed(), &Address::from("bob")).await;
        let mut got = cache.participants(feed()).await.unwrap();
        got.sort();
        assert_eq!(got, vec![Address::from("alice"), Address::from("bob")]);

        cache.remove_participant(feed(), &Address::from("bob")).await;
        assert_eq!(
            cache.participants(feed()).await.unwrap(),
            vec![Address::from("alice")]
        );
    }

    #[tokio::test]
    async fn key_bundle_round_trips_ascending() {
        let (kv, cache) = cache();
        // Deliberately out of order.
        cache
            .set_key_generations(feed(), &[generation(1, &["alice", "bob"]), generation(0, &["alice"])])
            .await;

        let got = cache.key_generations(feed()).await.unwrap();
        let versions: Vec<Generation> = got.iter().map(|g| g.version).collect();
        assert_eq!(versions, vec![0, 1]);
        assert_eq!(
            got[1].encrypted_keys_by_member[&Address::from("bob")],
            "cipher-for-bob"
        );

        let ttl = kv
            .ttl_of("t:feed:03030303030303030303030303030303:keys")
            .unwrap();
        assert!(ttl <= GROUP_TTL);
    }

    #[tokio::test]
    async fn key_bundle_wire_shape() {
        let (kv, cache) = cache();
        cache
            .set_key_generations(feed(), &[generation(0, &["alice"])])
            .await;
        let raw = kv
            .get("t:feed:03030303030303030303030303030303:keys")
            .await
            .unwrap()
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "keyGenerations": [{
                    "version": 0,
                    "validFromBlock": 0,
                    "encryptedKeysByMember": {"alice": "cipher-for-alice"},
                }]
            })
        );
    }

    #[tokio::test]
    async fn invalidation_clears_the_bundle() {
        let (_, cache) = cache();
        cache
            .set_key_generations(feed(), &[generation(0, &["alice"])])
            .await;
        cache.invalidate_key_generations(feed()).await;
        assert_eq!(cache.key_generations(feed()).await, None);
    }

    #[tokio::test]
    async fn enriched_members_round_trip() {
        let (_, cache) = cache();
        let members = vec![
            EnrichedMember {
                address: Address::from("alice"),
                display_name: "Alice".to_string(),
                role: ParticipantRole::Owner,
                joined_at_block: 1,
                left_at_block: None,
            },
            EnrichedMember {
                address: Address::from("bob"),
                display_name: "Bob".to_string(),
                role: ParticipantRole::Member,
                joined_at_block: 50,
                left_at_block: Some(200),
            },
        ];
        cache.set_members(feed(), &members).await;
        assert_eq!(cache.members(feed()).await.unwrap(), members);

        cache.invalidate_members(feed()).await;
        assert_eq!(cache.members(feed()).await, None);
    }
}
