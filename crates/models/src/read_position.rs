use super::{Address, BlockIndex, FeedId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// ReadPosition records how far a participant has read a feed.
/// Advancement is MAX-wins: `last_read_block_index` is monotone
/// non-decreasing per (address, feed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadPosition {
    pub address: Address,
    pub feed_id: FeedId,
    pub last_read_block_index: BlockIndex,
    pub updated_at: DateTime<Utc>,
}
