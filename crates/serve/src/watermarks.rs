use crate::error::ApiError;
use crate::store::SyncStore;
use models::{Address, BlockIndex, FeedId};
use projections::Caches;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetReadPositionReply {
    /// Whether this call advanced the stored watermark (MAX-wins).
    pub advanced: bool,
}

pub struct WatermarkService {
    store: Arc<dyn SyncStore>,
    caches: Arc<Caches>,
}

impl WatermarkService {
    pub fn new(store: Arc<dyn SyncStore>, caches: Arc<Caches>) -> Self {
        Self { store, caches }
    }

    /// Database-first MAX-wins upsert, then the scripted cache CAS.
    /// Both sides are monotone, so any interleaving of concurrent
    /// writers converges on the maximum.
    pub async fn set_read_position(
        &self,
        address: &Address,
        feed_id: FeedId,
        block_index: BlockIndex,
    ) -> Result<SetReadPositionReply, ApiError> {
        let advanced = self
            .store
            .upsert_read_position(address, feed_id, block_index)
            .await
            .map_err(ApiError::db)?;
        self.caches.watermarks.set(address, feed_id, block_index).await;
        Ok(SetReadPositionReply { advanced })
    }

    /// Read-through with the one-shot legacy import on first miss.
    pub async fn get_read_positions(
        &self,
        address: &Address,
    ) -> Result<HashMap<FeedId, BlockIndex>, ApiError> {
        if let Some(positions) = self.caches.watermarks.get_all(address).await {
            return Ok(positions);
        }

        // First miss: sweep any legacy per-feed keys into the hash,
        // then reconcile with the database.
        let feed_ids = self
            .store
            .feed_ids_for_address(address)
            .await
            .map_err(ApiError::db)?;
        let legacy = self
            .caches
            .watermarks
            .import_legacy(address, &feed_ids)
            .await
            .unwrap_or_default();

        let mut positions: HashMap<FeedId, BlockIndex> = self
            .store
            .read_positions(address)
            .await
            .map_err(ApiError::db)?
            .into_iter()
            .collect();
        for (feed_id, block) in legacy {
            let entry = positions.entry(feed_id).or_insert(block);
            *entry = (*entry).max(block);
        }

        self.caches.watermarks.set_all(address, &positions).await;
        Ok(positions)
    }
}
