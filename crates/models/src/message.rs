use super::{Address, BlockIndex, FeedId, Generation, MessageId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// FeedMessage is immutable once finalized into a block. `content` is
/// opaque ciphertext, carried verbatim in the encoding the client
/// submitted it with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedMessage {
    pub message_id: MessageId,
    pub feed_id: FeedId,
    pub content: String,
    pub issuer_address: Address,
    pub block_index: BlockIndex,
    pub timestamp: DateTime<Utc>,
    /// Key generation the content was encrypted under. Present only
    /// for group feeds; identifies a generation of the same feed valid
    /// at `block_index`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_generation: Option<Generation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_commitment: Option<String>,
}

impl FeedMessage {
    /// Ordering used by the message-tail projection: ascending block
    /// index, ties broken by timestamp.
    pub fn tail_key(&self) -> (BlockIndex, DateTime<Utc>) {
        (self.block_index, self.timestamp)
    }
}
