use super::{Address, BlockIndex, FeedId, Generation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What caused a key rotation. `Blocked` members keep their key, so
/// blocking is deliberately not a trigger.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RotationTrigger {
    Join,
    Leave,
    Ban,
    Unban,
}

impl std::fmt::Display for RotationTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RotationTrigger::Join => "join",
            RotationTrigger::Leave => "leave",
            RotationTrigger::Ban => "ban",
            RotationTrigger::Unban => "unban",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for RotationTrigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "join" => Ok(RotationTrigger::Join),
            "leave" => Ok(RotationTrigger::Leave),
            "ban" => Ok(RotationTrigger::Ban),
            "unban" => Ok(RotationTrigger::Unban),
            other => Err(format!("unknown rotation trigger {other:?}")),
        }
    }
}

/// KeyGeneration is one symmetric-key epoch of a group feed: a fresh
/// key encrypted once per member active at `valid_from_block`.
/// Generations of a feed are dense: [0, max].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyGeneration {
    pub feed_id: FeedId,
    pub generation: Generation,
    pub valid_from_block: BlockIndex,
    /// Closed by the next rotation. Never exposed to clients, which
    /// disambiguate via each message's `keyGeneration` field instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_to_block: Option<BlockIndex>,
    pub trigger: RotationTrigger,
    /// Member address to ciphertext of the symmetric key.
    pub encrypted_keys: BTreeMap<Address, String>,
}

impl KeyGeneration {
    pub fn key_for(&self, address: &Address) -> Option<&str> {
        self.encrypted_keys.get(address).map(String::as_str)
    }
}
