use super::MessageId;
use serde::{Deserialize, Serialize};

/// Homomorphic reaction aggregate for one message. The tallies are
/// serialized elliptic-curve points, one pair per reaction slot; the
/// node treats them as opaque. `version` is a global monotonic
/// counter used by clients to fetch only changed tallies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionTally {
    pub message_id: MessageId,
    pub version: u64,
    pub total_count: u32,
    pub tally_c1: Vec<String>,
    pub tally_c2: Vec<String>,
}

/// Number of reaction slots carried per tally.
pub const REACTION_SLOTS: usize = 6;
