use crate::metrics::ProjectionMetrics;
use kv::{KvStore, Namespace, Op};
use models::{Address, DeviceToken};
use std::sync::Arc;
use std::time::Duration;

pub const PUSH_TOKEN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Per-user hash of device registrations:
/// `push:v1:user:{address}` -> { tokenId -> JSON(DeviceToken) }.
pub struct PushTokenCache {
    kv: Arc<dyn KvStore>,
    ns: Namespace,
    metrics: ProjectionMetrics,
}

impl PushTokenCache {
    pub fn new(kv: Arc<dyn KvStore>, ns: Namespace) -> Self {
        Self {
            kv,
            ns,
            metrics: ProjectionMetrics::new("push_tokens"),
        }
    }

    pub fn metrics(&self) -> &ProjectionMetrics {
        &self.metrics
    }

    fn key(&self, address: &Address) -> String {
        self.ns.key(&format!("push:v1:user:{address}"))
    }

    pub async fn get_all(&self, address: &Address) -> Option<Vec<DeviceToken>> {
        let key = self.key(address);
        let fields = match self.kv.hgetall(&key).await {
            Ok(fields) => fields,
            Err(err) => {
                self.metrics.read_error();
                tracing::warn!(%err, "push-token read failed; treating as miss");
                return None;
            }
        };
        if fields.is_empty() {
            self.metrics.miss();
            return None;
        }

        let mut tokens = Vec::with_capacity(fields.len());
        for (field, value) in &fields {
            match serde_json::from_str::<DeviceToken>(value) {
                Ok(token) => tokens.push(token),
                Err(err) => {
                    tracing::debug!(%key, field, %err, "skipping malformed device token");
                }
            }
        }
        tokens.sort_by(|a, b| a.token_id.cmp(&b.token_id));
        self.metrics.hit();
        Some(tokens)
    }

    pub async fn set_all(&self, address: &Address, tokens: &[DeviceToken]) {
        let key = self.key(address);
        let mut fields = Vec::with_capacity(tokens.len());
        for token in tokens {
            match serde_json::to_string(token) {
                Ok(value) => fields.push((token.token_id.clone(), value)),
                Err(err) => {
                    self.metrics.write_error();
                    tracing::warn!(%err, "device token failed to serialize");
                    return;
                }
            }
        }
        let mut ops = vec![Op::Del { key: key.clone() }];
        if !fields.is_empty() {
            ops.push(Op::HSet {
                key: key.clone(),
                fields,
            });
            ops.push(Op::Expire {
                key,
                ttl: PUSH_TOKEN_TTL,
            });
        }
        match self.kv.atomic(ops).await {
            Ok(()) => self.metrics.write(),
            Err(err) => {
                self.metrics.write_error();
                tracing::warn!(%err, "push-token set failed");
            }
        }
    }

    /// Add-or-update one registration; the TTL refreshes on write.
    pub async fn upsert(&self, token: &DeviceToken) {
        let key = self.key(&token.address);
        let value = match serde_json::to_string(token) {
            Ok(value) => value,
            Err(err) => {
                self.metrics.write_error();
                tracing::warn!(%err, "device token failed to serialize");
                return;
            }
        };
        let result = self
            .kv
            .atomic(vec![
                Op::HSet {
                    key: key.clone(),
                    fields: vec![(token.token_id.clone(), value)],
                },
                Op::Expire {
                    key,
                    ttl: PUSH_TOKEN_TTL,
                },
            ])
            .await;
        match result {
            Ok(()) => self.metrics.write(),
            Err(err) => {
                self.metrics.write_error();
                tracing::warn!(%err, "push-token upsert failed");
            }
        }
    }

    pub async fn remove(&self, address: &Address, token_id: &str) {
        let key = self.key(address);
        match self.kv.hdel(&key, token_id).await {
            Ok(()) => self.metrics.write(),
            Err(err) => {
                self.metrics.write_error();
                tracing::warn!(%err, "push-token remove failed");
            }
        }
    }

    pub async fn invalidate(&self, address: &Address) {
        let key = self.key(address);
        match self.kv.del(&key).await {
            Ok(()) => self.metrics.write(),
            Err(err) => {
                self.metrics.write_error();
                tracing::warn!(%err, "push-token invalidate failed");
            }
        }
    }

    /// Moves a shared physical token between users: removed from the
    /// old owner's hash before appearing under the new one.
    pub async fn reassign(&self, old_owner: &Address, token: &DeviceToken) {
        self.remove(old_owner, &token.token_id).await;
        self.upsert(token).await;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::{TimeZone, Utc};
    use models::DevicePlatform;

    fn cache() -> (Arc<kv::MemoryStore>, PushTokenCache) {
        let kv = Arc::new(kv::MemoryStore::new());
        let cache = PushTokenCache::new(kv.clone(), Namespace::new("t"));
        (kv, cache)
    }

    fn token(id: &str, owner: &str) -> DeviceToken {
        DeviceToken {
            token_id: id.to_string(),
            address: Address::from(owner),
            platform: DevicePlatform::Ios,
            token: format!("apns-{id}"),
            device_name: Some("phone".to_string()),
            created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            last_used_at: Utc.timestamp_opt(1_700_000_100, 0).unwrap(),
            is_active: true,
        }
    }

    #[tokio::test]
    async fn set_all_then_get_all() {
        let (kv, cache) = cache();
        let alice = Address::from("alice");
        let tokens = vec![token("t1", "alice"), token("t2", "alice")];
        cache.set_all(&alice, &tokens).await;

        assert_eq!(cache.get_all(&alice).await.unwrap(), tokens);
        assert!(kv.ttl_of("t:push:v1:user:alice").unwrap() <= PUSH_TOKEN_TTL);
    }

    #[tokio::test]
    async fn upsert_remove_and_invalidate() {
        let (_, cache) = cache();
        let alice = Address::from("alice");
        cache.upsert(&token("t1", "alice")).await;
        assert_eq!(cache.get_all(&alice).await.unwrap().len(), 1);

        cache.remove(&alice, "t1").await;
        assert_eq!(cache.get_all(&alice).await, None);

        cache.set_all(&alice, &[token("t1", "alice"), token("t2", "alice")]).await;
        cache.invalidate(&alice).await;
        assert_eq!(cache.get_all(&alice).await, None);
    }

    #[tokio::test]
    async fn reassign_moves_between_users() {
        let (_, cache) = cache();
        let alice = Address::from("alice");
        let bob = Address::from("bob");
        cache.set_all(&alice, &[token("t1", "alice"), token("t2", "alice")]).await;

        cache.reassign(&alice, &token("t1", "bob")).await;

        let alice_tokens = cache.get_all(&alice).await.unwrap();
        assert_eq!(alice_tokens.len(), 1);
        assert_eq!(alice_tokens[0].token_id, "t2");

        let bob_tokens = cache.get_all(&bob).await.unwrap();
        assert_eq!(bob_tokens[0].address, bob);
    }
}
