//! In-memory `RotationStore` used by the engine's own tests and, via
//! the `test-support` feature, by downstream crate tests. The shared
//! [`World`] lets a test drive the rotation engine and the sync
//! handlers against one consistent data set.

use crate::{MembershipMutation, RotationCommit, RotationStore};
use models::{
    Address, Feed, FeedId, FeedParticipant, Generation, KeyGeneration, ParticipantRole, Profile,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct World {
    pub feeds: HashMap<FeedId, Feed>,
    pub participants: HashMap<FeedId, BTreeMap<Address, FeedParticipant>>,
    pub generations: HashMap<FeedId, Vec<KeyGeneration>>,
    pub profiles: HashMap<Address, Profile>,
}

impl World {
    pub fn insert_feed(&mut self, feed: Feed) {
        self.feeds.insert(feed.feed_id, feed);
    }

    pub fn insert_profile(&mut self, profile: Profile) {
        self.profiles.insert(profile.address.clone(), profile);
    }

    pub fn insert_participant(&mut self, participant: FeedParticipant) {
        self.participants
            .entry(participant.feed_id)
            .or_default()
            .insert(participant.address.clone(), participant);
    }

    pub fn insert_generation(&mut self, generation: KeyGeneration) {
        self.generations
            .entry(generation.feed_id)
            .or_default()
            .push(generation);
    }

    pub fn generations_of(&self, feed_id: FeedId) -> Vec<KeyGeneration> {
        self.generations.get(&feed_id).cloned().unwrap_or_default()
    }

    pub fn participant(&self, feed_id: FeedId, address: &Address) -> Option<FeedParticipant> {
        self.participants.get(&feed_id)?.get(address).cloned()
    }
}

#[derive(Clone, Default)]
pub struct MemoryRotationStore {
    world: Arc<Mutex<World>>,
}

impl MemoryRotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_world(world: Arc<Mutex<World>>) -> Self {
        Self { world }
    }

    pub fn world(&self) -> Arc<Mutex<World>> {
        self.world.clone()
    }
}

#[async_trait::async_trait]
impl RotationStore for MemoryRotationStore {
    async fn feed(&self, feed_id: FeedId) -> anyhow::Result<Option<Feed>> {
        Ok(self.world.lock().unwrap().feeds.get(&feed_id).cloned())
    }

    async fn participant(
        &self,
        feed_id: FeedId,
        address: &Address,
    ) -> anyhow::Result<Option<FeedParticipant>> {
        Ok(self.world.lock().unwrap().participant(feed_id, address))
    }

    async fn active_participants(&self, feed_id: FeedId) -> anyhow::Result<Vec<FeedParticipant>> {
        Ok(self
            .world
            .lock()
            .unwrap()
            .participants
            .get(&feed_id)
            .map(|ps| ps.values().filter(|p| p.is_active()).cloned().collect())
            .unwrap_or_default())
    }

    async fn max_generation(&self, feed_id: FeedId) -> anyhow::Result<Option<Generation>> {
        Ok(self
            .world
            .lock()
            .unwrap()
            .generations
            .get(&feed_id)
            .and_then(|gs| gs.iter().map(|g| g.generation).max()))
    }

    async fn profiles(&self, addresses: &[Address]) -> anyhow::Result<Vec<Profile>> {
        let world = self.world.lock().unwrap();
        Ok(addresses
            .iter()
            .filter_map(|a| world.profiles.get(a).cloned())
            .collect())
    }

    async fn commit_rotation(&self, commit: RotationCommit) -> anyhow::Result<()> {
        let feed_id = commit.generation.feed_id;
        let mut world = self.world.lock().unwrap();

        match commit.membership {
            MembershipMutation::Insert(participant) => {
                world
                    .participants
                    .entry(feed_id)
                    .or_default()
                    .insert(participant.address.clone(), participant);
            }
            MembershipMutation::Rejoin { address, at_block } => {
                if let Some(p) = world
                    .participants
                    .get_mut(&feed_id)
                    .and_then(|ps| ps.get_mut(&address))
                {
                    p.role = ParticipantRole::Member;
                    p.joined_at_block = at_block;
                    p.left_at_block = None;
                }
            }
            MembershipMutation::Leave { address, at_block } => {
                if let Some(p) = world
                    .participants
                    .get_mut(&feed_id)
                    .and_then(|ps| ps.get_mut(&address))
                {
                    p.left_at_block = Some(at_block);
                    p.last_leave_block = Some(at_block);
                }
            }
            MembershipMutation::Ban { address, at_block } => {
                if let Some(p) = world
                    .participants
                    .get_mut(&feed_id)
                    .and_then(|ps| ps.get_mut(&address))
                {
                    p.role = ParticipantRole::Banned;
                    p.left_at_block = Some(at_block);
                    p.last_leave_block = Some(at_block);
                }
            }
        }

        let valid_from = commit.generation.valid_from_block;
        let generations = world.generations.entry(feed_id).or_default();
        if let Some(previous) = generations.last_mut() {
            previous.valid_to_block = Some(valid_from);
        }
        generations.push(commit.generation);

        if let Some(feed) = world.feeds.get_mut(&feed_id) {
            feed.block_index = feed.block_index.max(commit.feed_block_index);
        }
        Ok(())
    }
}
