use super::{Address, BlockIndex, FeedId, Generation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FeedType {
    Personal,
    Chat,
    Group,
    Broadcast,
}

impl std::fmt::Display for FeedType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FeedType::Personal => "personal",
            FeedType::Chat => "chat",
            FeedType::Group => "group",
            FeedType::Broadcast => "broadcast",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for FeedType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "personal" => Ok(FeedType::Personal),
            "chat" => Ok(FeedType::Chat),
            "group" => Ok(FeedType::Group),
            "broadcast" => Ok(FeedType::Broadcast),
            other => Err(format!("unknown feed type {other:?}")),
        }
    }
}

/// Feed is an ordered, append-only sequence of messages finalized
/// into blocks. `block_index` is the feed's own watermark: the last
/// finalized block which touched the feed or its key generations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feed {
    pub feed_id: FeedId,
    #[serde(rename = "type")]
    pub feed_type: FeedType,
    /// Mutable display title. Empty for feeds whose title is derived
    /// from participant aliases (personal, chat).
    pub title: String,
    /// Immutable creation-time name, used as the fallback title of a
    /// group whose display title was never set.
    pub alias: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_public: bool,
    pub block_index: BlockIndex,
    pub created_at_block: BlockIndex,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParticipantRole {
    Owner,
    Admin,
    Member,
    Blocked,
    Banned,
}

impl ParticipantRole {
    /// Admins and owners may perform membership-changing actions.
    pub fn is_admin(&self) -> bool {
        matches!(self, ParticipantRole::Owner | ParticipantRole::Admin)
    }
}

impl std::fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ParticipantRole::Owner => "owner",
            ParticipantRole::Admin => "admin",
            ParticipantRole::Member => "member",
            ParticipantRole::Blocked => "blocked",
            ParticipantRole::Banned => "banned",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ParticipantRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(ParticipantRole::Owner),
            "admin" => Ok(ParticipantRole::Admin),
            "member" => Ok(ParticipantRole::Member),
            "blocked" => Ok(ParticipantRole::Blocked),
            "banned" => Ok(ParticipantRole::Banned),
            other => Err(format!("unknown participant role {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedParticipant {
    pub feed_id: FeedId,
    pub address: Address,
    pub role: ParticipantRole,
    pub joined_at_block: BlockIndex,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_at_block: Option<BlockIndex>,
    /// Block of the most recent leave, retained across rejoins to
    /// enforce the rejoin cooldown window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_leave_block: Option<BlockIndex>,
    /// The participant's copy of the current feed key, encrypted for
    /// them at join time. Absent for non-group feeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_feed_key: Option<String>,
}

impl FeedParticipant {
    /// Whether this participant is an active member of the feed at
    /// block `b`: joined at or before `b`, not yet departed, and not
    /// banned. Blocked members remain active (they can decrypt but
    /// cannot post).
    pub fn active_at(&self, b: BlockIndex) -> bool {
        self.joined_at_block <= b
            && self.left_at_block.map_or(true, |left| left > b)
            && self.role != ParticipantRole::Banned
    }

    /// Active with respect to the latest observed state.
    pub fn is_active(&self) -> bool {
        self.left_at_block.is_none() && self.role != ParticipantRole::Banned
    }
}

/// Current key generation of a group feed, carried in feed metadata so
/// clients know whether they must fetch new key material.
pub fn current_generation(generations: &[Generation]) -> Option<Generation> {
    generations.iter().copied().max()
}
