use super::{Address, BlockIndex};
use serde::{Deserialize, Serialize};

/// Profile is the on-chain identity record of a participant.
/// `block_index` advances with every identity edit and feeds into the
/// effective block index of every feed the participant belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub address: Address,
    pub alias: String,
    pub short_alias: String,
    /// Public encryption key, required to receive group feed keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_encryption_key: Option<String>,
    pub is_public: bool,
    pub block_index: BlockIndex,
}
