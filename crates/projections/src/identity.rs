use crate::metrics::ProjectionMetrics;
use kv::{KvStore, Namespace};
use models::{Address, Profile};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const PROFILE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Two coordinated identity shapes: the per-address profile blob
/// `identity:{address}` (TTL, refreshed on hit) and the global
/// display-name hash `identities:display_names` (no TTL; rewritten
/// only by identity events).
pub struct IdentityCache {
    kv: Arc<dyn KvStore>,
    ns: Namespace,
    metrics: ProjectionMetrics,
}

impl IdentityCache {
    pub fn new(kv: Arc<dyn KvStore>, ns: Namespace) -> Self {
        Self {
            kv,
            ns,
            metrics: ProjectionMetrics::new("identity"),
        }
    }

    pub fn metrics(&self) -> &ProjectionMetrics {
        &self.metrics
    }

    fn profile_key(&self, address: &Address) -> String {
        self.ns.key(&format!("identity:{address}"))
    }

    fn names_key(&self) -> String {
        self.ns.key("identities:display_names")
    }

    pub async fn get_profile(&self, address: &Address) -> Option<Profile> {
        let key = self.profile_key(address);
        let result = async {
            let Some(value) = self.kv.get(&key).await? else {
                return Ok(None);
            };
            let profile = match serde_json::from_str::<Profile>(&value) {
                Ok(profile) => profile,
                Err(err) => {
                    tracing::debug!(%key, %err, "malformed cached profile; treating as miss");
                    return Ok(None);
                }
            };
            self.kv.expire(&key, PROFILE_TTL).await?;
            Ok::<_, kv::KvError>(Some(profile))
        }
        .await;

        match result {
            Ok(Some(profile)) => {
                self.metrics.hit();
                Some(profile)
            }
            Ok(None) => {
                self.metrics.miss();
                None
            }
            Err(err) => {
                self.metrics.read_error();
                tracing::warn!(%err, "profile read failed; treating as miss");
                None
            }
        }
    }

    pub async fn set_profile(&self, profile: &Profile) {
        let key = self.profile_key(&profile.address);
        let value = match serde_json::to_string(profile) {
            Ok(value) => value,
            Err(err) => {
                self.metrics.write_error();
                tracing::warn!(%err, "profile failed to serialize");
                return;
            }
        };
        match self.kv.set(&key, &value, Some(PROFILE_TTL)).await {
            Ok(()) => self.metrics.write(),
            Err(err) => {
                self.metrics.write_error();
                tracing::warn!(%err, "profile set failed");
            }
        }
    }

    pub async fn invalidate_profile(&self, address: &Address) {
        let key = self.profile_key(address);
        match self.kv.del(&key).await {
            Ok(()) => self.metrics.write(),
            Err(err) => {
                self.metrics.write_error();
                tracing::warn!(%err, "profile invalidate failed");
            }
        }
    }

    /// Resolves display names in one HMGET round-trip. `None` values
    /// mark misses the caller must back-fill from the database. A
    /// backend failure returns `None` (skip cache entirely).
    pub async fn display_names(
        &self,
        addresses: &[Address],
    ) -> Option<HashMap<Address, Option<String>>> {
        if addresses.is_empty() {
            return Some(HashMap::new());
        }
        let key = self.names_key();
        let fields: Vec<String> = addresses.iter().map(|a| a.to_string()).collect();
        match self.kv.hmget(&key, &fields).await {
            Ok(values) => {
                let mut names = HashMap::with_capacity(addresses.len());
                let mut hits = 0usize;
                for (address, value) in addresses.iter().zip(values) {
                    if value.is_some() {
                        hits += 1;
                    }
                    names.insert(address.clone(), value);
                }
                if hits == addresses.len() {
                    self.metrics.hit();
                } else {
                    self.metrics.miss();
                }
                Some(names)
            }
            Err(err) => {
                self.metrics.read_error();
                tracing::warn!(%err, "display-name read failed; skipping cache");
                None
            }
        }
    }

    pub async fn set_display_name(&self, address: &Address, display_name: &str) {
        let key = self.names_key();
        match self.kv.hset(&key, address.as_str(), display_name).await {
            Ok(()) => self.metrics.write(),
            Err(err) => {
                self.metrics.write_error();
                tracing::warn!(%err, "display-name set failed");
            }
        }
    }

    pub async fn set_display_names(&self, names: &[(Address, String)]) {
        if names.is_empty() {
            return;
        }
        let key = self.names_key();
        let fields: Vec<(String, String)> = names
            .iter()
            .map(|(address, name)| (address.to_string(), name.clone()))
            .collect();
        match self.kv.hset_multiple(&key, &fields).await {
            Ok(()) => self.metrics.write(),
            Err(err) => {
                self.metrics.write_error();
                tracing::warn!(%err, "display-name set failed");
            }
        }
    }
}
