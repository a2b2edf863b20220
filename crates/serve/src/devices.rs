use crate::error::ApiError;
use crate::store::SyncStore;
use chrono::{DateTime, Utc};
use models::{Address, DeviceToken};
use projections::Caches;
use std::collections::BTreeSet;
use std::sync::Arc;

pub struct DeviceService {
    store: Arc<dyn SyncStore>,
    caches: Arc<Caches>,
}

impl DeviceService {
    pub fn new(store: Arc<dyn SyncStore>, caches: Arc<Caches>) -> Self {
        Self { store, caches }
    }

    /// Registers (or refreshes) a device token. A physical token
    /// already registered under another address moves to the new
    /// owner: removed from the old user's hash, then written under
    /// the new one.
    pub async fn register(&self, token: DeviceToken) -> Result<(), ApiError> {
        if let Some((old_id, old_owner)) = self
            .store
            .device_token_owner(&token.token)
            .await
            .map_err(ApiError::db)?
        {
            if old_owner != token.address {
                tracing::debug!(%old_owner, new_owner = %token.address, "reassigning shared device token");
                self.store
                    .remove_device_token(&old_owner, &old_id)
                    .await
                    .map_err(ApiError::db)?;
                self.caches.push_tokens.remove(&old_owner, &old_id).await;
            }
        }

        self.store
            .upsert_device_token(&token)
            .await
            .map_err(ApiError::db)?;
        self.caches.push_tokens.upsert(&token).await;
        Ok(())
    }

    pub async fn remove(&self, address: &Address, token_id: &str) -> Result<bool, ApiError> {
        let removed = self
            .store
            .remove_device_token(address, token_id)
            .await
            .map_err(ApiError::db)?;
        self.caches.push_tokens.remove(address, token_id).await;
        Ok(removed)
    }

    pub async fn list(&self, address: &Address) -> Result<Vec<DeviceToken>, ApiError> {
        if let Some(tokens) = self.caches.push_tokens.get_all(address).await {
            return Ok(tokens);
        }
        let tokens = self
            .store
            .device_tokens(address)
            .await
            .map_err(ApiError::db)?;
        if !tokens.is_empty() {
            self.caches.push_tokens.set_all(address, &tokens).await;
        }
        Ok(tokens)
    }

    /// Cleanup sweep, driven by the node's maintenance schedule:
    /// deactivates registrations unused since the cutoff and drops
    /// the affected users' cached hashes. Returns the number of
    /// deactivated tokens.
    pub async fn deactivate_stale(
        &self,
        unused_since: DateTime<Utc>,
    ) -> Result<u64, ApiError> {
        let deactivated = self
            .store
            .deactivate_stale_device_tokens(unused_since)
            .await
            .map_err(ApiError::db)?;
        let affected: BTreeSet<&Address> = deactivated.iter().collect();
        for address in affected {
            self.caches.push_tokens.invalidate(address).await;
        }
        if !deactivated.is_empty() {
            tracing::info!(tokens = deactivated.len(), "deactivated stale device tokens");
        }
        Ok(deactivated.len() as u64)
    }
}
