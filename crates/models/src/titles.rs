use super::{Address, Feed, FeedParticipant, FeedType};
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TitleError {
    #[error("no resolved alias for {0}")]
    MissingAlias(Address),
    #[error("chat feed {0} has no counterpart participant")]
    MissingCounterpart(super::FeedId),
    #[error("{feed_type} feed {feed_id} has an empty title")]
    EmptyTitle {
        feed_id: super::FeedId,
        feed_type: FeedType,
    },
}

/// Computes the per-viewer display title of a feed.
///
/// Personal feeds render the owner's own alias suffixed with "(YOU)";
/// chat feeds render the counterpart's alias; group and broadcast
/// feeds use the stored title, with a group falling back to its
/// creation-time alias. `aliases` must contain resolved aliases for
/// whichever participants the rule consults.
pub fn feed_title(
    feed: &Feed,
    viewer: &Address,
    participants: &[FeedParticipant],
    aliases: &BTreeMap<Address, String>,
) -> Result<String, TitleError> {
    match feed.feed_type {
        FeedType::Personal => {
            let alias = aliases
                .get(viewer)
                .ok_or_else(|| TitleError::MissingAlias(viewer.clone()))?;
            Ok(format!("{alias} (YOU)"))
        }
        FeedType::Chat => {
            let other = participants
                .iter()
                .find(|p| &p.address != viewer)
                .ok_or(TitleError::MissingCounterpart(feed.feed_id))?;
            let alias = aliases
                .get(&other.address)
                .ok_or_else(|| TitleError::MissingAlias(other.address.clone()))?;
            Ok(alias.clone())
        }
        FeedType::Group => {
            if !feed.title.is_empty() {
                Ok(feed.title.clone())
            } else if !feed.alias.is_empty() {
                Ok(feed.alias.clone())
            } else {
                Err(TitleError::EmptyTitle {
                    feed_id: feed.feed_id,
                    feed_type: feed.feed_type,
                })
            }
        }
        FeedType::Broadcast => {
            if !feed.title.is_empty() {
                Ok(feed.title.clone())
            } else {
                Err(TitleError::EmptyTitle {
                    feed_id: feed.feed_id,
                    feed_type: feed.feed_type,
                })
            }
        }
    }
}
