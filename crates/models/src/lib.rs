mod device;
mod feed;
mod id;
mod keys;
mod message;
mod profile;
mod read_position;
mod reaction;
pub mod titles;

pub use device::{DevicePlatform, DeviceToken};
pub use feed::{current_generation, Feed, FeedParticipant, FeedType, ParticipantRole};
pub use id::{Address, FeedId, MessageId};
pub use keys::{KeyGeneration, RotationTrigger};
pub use message::FeedMessage;
pub use profile::Profile;
pub use read_position::ReadPosition;
pub use reaction::{ReactionTally, REACTION_SLOTS};

/// Monotonic index of a finalized block: the chain's logical clock.
pub type BlockIndex = u64;

/// Label of one symmetric-key epoch of a group feed.
pub type Generation = u32;

/// The effective block index of a feed as observed by a client:
/// the feed watermark joined with every participant's profile
/// watermark, so that identity edits invalidate client caches of
/// feeds the identity appears in.
pub fn effective_block_index(
    feed_block: BlockIndex,
    participant_profile_blocks: impl IntoIterator<Item = BlockIndex>,
) -> BlockIndex {
    participant_profile_blocks
        .into_iter()
        .fold(feed_block, BlockIndex::max)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn effective_block_is_max_over_feed_and_profiles() {
        assert_eq!(effective_block_index(10, []), 10);
        assert_eq!(effective_block_index(10, [3, 7]), 10);
        assert_eq!(effective_block_index(10, [3, 77]), 77);
    }
}
