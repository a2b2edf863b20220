//! Shared harness for the end-to-end sync tests: one in-memory world
//! backing both the orchestrator's store and the rotation engine's,
//! an in-memory KV store, and a hand-driven block clock.

use chrono::{DateTime, TimeZone, Utc};
use kv::MemoryStore;
use models::{
    Address, BlockIndex, DeviceToken, Feed, FeedId, FeedMessage, FeedParticipant, FeedType,
    KeyGeneration, MessageId, ParticipantRole, Profile, ReactionTally, RotationTrigger,
};
use rotation::memory::{MemoryRotationStore, World};
use rotation::{CipherError, KeyCipher, ManualClock};
use serve::{App, Settings, SyncStore};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

pub struct FakeCipher;

impl KeyCipher for FakeCipher {
    fn encrypt_for(&self, _plaintext: &[u8], public_key: &str) -> Result<Vec<u8>, CipherError> {
        Ok(format!("sealed-for-{public_key}").into_bytes())
    }
}

/// SyncStore over the shared world, with message / tally / watermark /
/// device state of its own.
pub struct FakeSyncStore {
    world: Arc<Mutex<World>>,
    pub messages: Mutex<Vec<FeedMessage>>,
    read_positions: Mutex<HashMap<(Address, FeedId), BlockIndex>>,
    pub tallies: Mutex<Vec<ReactionTally>>,
    device_tokens: Mutex<HashMap<String, DeviceToken>>,
}

impl FakeSyncStore {
    pub fn new(world: Arc<Mutex<World>>) -> Self {
        Self {
            world,
            messages: Mutex::new(Vec::new()),
            read_positions: Mutex::new(HashMap::new()),
            tallies: Mutex::new(Vec::new()),
            device_tokens: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait::async_trait]
impl SyncStore for FakeSyncStore {
    async fn feed(&self, feed_id: FeedId) -> anyhow::Result<Option<Feed>> {
        Ok(self.world.lock().unwrap().feeds.get(&feed_id).cloned())
    }

    async fn feed_exists(&self, feed_id: FeedId) -> anyhow::Result<bool> {
        Ok(self.world.lock().unwrap().feeds.contains_key(&feed_id))
    }

    async fn feeds_for_address(&self, address: &Address) -> anyhow::Result<Vec<Feed>> {
        let world = self.world.lock().unwrap();
        let mut feeds: Vec<Feed> = world
            .feeds
            .values()
            .filter(|feed| {
                world
                    .participant(feed.feed_id, address)
                    .is_some_and(|p| p.is_active())
            })
            .cloned()
            .collect();
        feeds.sort_by_key(|f| f.created_at_block);
        Ok(feeds)
    }

    async fn feed_ids_for_address(&self, address: &Address) -> anyhow::Result<Vec<FeedId>> {
        Ok(self
            .feeds_for_address(address)
            .await?
            .into_iter()
            .map(|f| f.feed_id)
            .collect())
    }

    async fn has_personal_feed(&self, address: &Address) -> anyhow::Result<bool> {
        let world = self.world.lock().unwrap();
        Ok(world.feeds.values().any(|feed| {
            feed.feed_type == FeedType::Personal
                && world.participant(feed.feed_id, address).is_some()
        }))
    }

    async fn participants(&self, feed_id: FeedId) -> anyhow::Result<Vec<FeedParticipant>> {
        Ok(self
            .world
            .lock()
            .unwrap()
            .participants
            .get(&feed_id)
            .map(|ps| ps.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn participant(
        &self,
        feed_id: FeedId,
        address: &Address,
    ) -> anyhow::Result<Option<FeedParticipant>> {
        Ok(self.world.lock().unwrap().participant(feed_id, address))
    }

    async fn profiles(&self, addresses: &[Address]) -> anyhow::Result<Vec<Profile>> {
        let world = self.world.lock().unwrap();
        Ok(addresses
            .iter()
            .filter_map(|a| world.profiles.get(a).cloned())
            .collect())
    }

    async fn display_names(
        &self,
        addresses: &[Address],
    ) -> anyhow::Result<Vec<(Address, String)>> {
        let world = self.world.lock().unwrap();
        Ok(addresses
            .iter()
            .filter_map(|a| {
                world
                    .profiles
                    .get(a)
                    .map(|p| (a.clone(), p.alias.clone()))
            })
            .collect())
    }

    async fn message_tail(&self, feed_id: FeedId, limit: u32) -> anyhow::Result<Vec<FeedMessage>> {
        let messages = self.messages.lock().unwrap();
        let mut tail: Vec<FeedMessage> = messages
            .iter()
            .filter(|m| m.feed_id == feed_id)
            .cloned()
            .collect();
        tail.sort_by_key(|m| std::cmp::Reverse(m.tail_key()));
        tail.truncate(limit as usize);
        Ok(tail)
    }

    async fn message(&self, message_id: MessageId) -> anyhow::Result<Option<FeedMessage>> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.message_id == message_id)
            .cloned())
    }

    async fn key_generations(&self, feed_id: FeedId) -> anyhow::Result<Vec<KeyGeneration>> {
        let mut generations = self.world.lock().unwrap().generations_of(feed_id);
        generations.sort_by_key(|g| g.generation);
        Ok(generations)
    }

    async fn read_positions(
        &self,
        address: &Address,
    ) -> anyhow::Result<Vec<(FeedId, BlockIndex)>> {
        Ok(self
            .read_positions
            .lock()
            .unwrap()
            .iter()
            .filter(|((a, _), _)| a == address)
            .map(|((_, feed_id), block)| (*feed_id, *block))
            .collect())
    }

    async fn upsert_read_position(
        &self,
        address: &Address,
        feed_id: FeedId,
        block_index: BlockIndex,
    ) -> anyhow::Result<bool> {
        let mut positions = self.read_positions.lock().unwrap();
        let entry = positions.entry((address.clone(), feed_id)).or_insert(0);
        if block_index > *entry {
            *entry = block_index;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn tallies_since(
        &self,
        feed_ids: &[FeedId],
        since_version: u64,
    ) -> anyhow::Result<Vec<ReactionTally>> {
        let messages = self.messages.lock().unwrap();
        let in_scope: std::collections::HashSet<MessageId> = messages
            .iter()
            .filter(|m| feed_ids.contains(&m.feed_id))
            .map(|m| m.message_id)
            .collect();
        Ok(self
            .tallies
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.version > since_version && in_scope.contains(&t.message_id))
            .cloned()
            .collect())
    }

    async fn device_tokens(&self, address: &Address) -> anyhow::Result<Vec<DeviceToken>> {
        Ok(self
            .device_tokens
            .lock()
            .unwrap()
            .values()
            .filter(|t| &t.address == address && t.is_active)
            .cloned()
            .collect())
    }

    async fn device_token_owner(
        &self,
        token: &str,
    ) -> anyhow::Result<Option<(String, Address)>> {
        Ok(self
            .device_tokens
            .lock()
            .unwrap()
            .values()
            .find(|t| t.token == token && t.is_active)
            .map(|t| (t.token_id.clone(), t.address.clone())))
    }

    async fn upsert_device_token(&self, token: &DeviceToken) -> anyhow::Result<()> {
        self.device_tokens
            .lock()
            .unwrap()
            .insert(token.token_id.clone(), token.clone());
        Ok(())
    }

    async fn remove_device_token(
        &self,
        address: &Address,
        token_id: &str,
    ) -> anyhow::Result<bool> {
        let mut tokens = self.device_tokens.lock().unwrap();
        match tokens.get(token_id) {
            Some(t) if &t.address == address => {
                tokens.remove(token_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn deactivate_stale_device_tokens(
        &self,
        unused_since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Address>> {
        let mut tokens = self.device_tokens.lock().unwrap();
        let mut affected = Vec::new();
        for t in tokens.values_mut() {
            if t.is_active && t.last_used_at < unused_since {
                t.is_active = false;
                affected.push(t.address.clone());
            }
        }
        Ok(affected)
    }

    async fn create_group_feed(
        &self,
        feed: &Feed,
        participants: &[FeedParticipant],
        generation_zero: &KeyGeneration,
    ) -> anyhow::Result<()> {
        let mut world = self.world.lock().unwrap();
        world.insert_feed(feed.clone());
        for p in participants {
            world.insert_participant(p.clone());
        }
        world.insert_generation(generation_zero.clone());
        Ok(())
    }

    async fn set_role(
        &self,
        feed_id: FeedId,
        address: &Address,
        role: ParticipantRole,
    ) -> anyhow::Result<()> {
        let mut world = self.world.lock().unwrap();
        if let Some(p) = world
            .participants
            .get_mut(&feed_id)
            .and_then(|ps| ps.get_mut(address))
        {
            p.role = role;
        }
        Ok(())
    }

    async fn update_feed_title(
        &self,
        feed_id: FeedId,
        title: &str,
        at_block: BlockIndex,
    ) -> anyhow::Result<()> {
        let mut world = self.world.lock().unwrap();
        if let Some(feed) = world.feeds.get_mut(&feed_id) {
            feed.title = title.to_string();
            feed.block_index = feed.block_index.max(at_block);
        }
        Ok(())
    }

    async fn update_feed_description(
        &self,
        feed_id: FeedId,
        description: &str,
        at_block: BlockIndex,
    ) -> anyhow::Result<()> {
        let mut world = self.world.lock().unwrap();
        if let Some(feed) = world.feeds.get_mut(&feed_id) {
            feed.description = Some(description.to_string());
            feed.block_index = feed.block_index.max(at_block);
        }
        Ok(())
    }

    async fn delete_feed(&self, feed_id: FeedId) -> anyhow::Result<()> {
        let mut world = self.world.lock().unwrap();
        world.feeds.remove(&feed_id);
        world.participants.remove(&feed_id);
        world.generations.remove(&feed_id);
        drop(world);
        self.messages.lock().unwrap().retain(|m| m.feed_id != feed_id);
        Ok(())
    }
}

pub struct Harness {
    pub app: App,
    pub kv: Arc<MemoryStore>,
    pub world: Arc<Mutex<World>>,
    pub clock: Arc<ManualClock>,
    pub store: Arc<FakeSyncStore>,
}

pub fn harness() -> Harness {
    let world = Arc::new(Mutex::new(World::default()));
    let store = Arc::new(FakeSyncStore::new(world.clone()));
    let rotation_store = Arc::new(MemoryRotationStore::with_world(world.clone()));
    let kv = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::at(10));

    let settings = Settings {
        instance_prefix: "t".to_string(),
        ..Settings::default()
    };
    let app = App::assemble(
        settings,
        store.clone(),
        rotation_store,
        kv.clone(),
        Arc::new(FakeCipher),
        clock.clone(),
    );
    Harness {
        app,
        kv,
        world,
        clock,
        store,
    }
}

pub fn addr(s: &str) -> Address {
    Address::from(s)
}

pub fn feed_id(b: u8) -> FeedId {
    FeedId::new([b; 16])
}

pub fn register_user(world: &Arc<Mutex<World>>, address: &str, alias: &str, block: BlockIndex) {
    world.lock().unwrap().insert_profile(Profile {
        address: addr(address),
        alias: alias.to_string(),
        short_alias: alias.to_lowercase(),
        public_encryption_key: Some(format!("pk-{address}")),
        is_public: true,
        block_index: block,
    });
}

pub fn seed_chat(
    world: &Arc<Mutex<World>>,
    id: u8,
    a: &str,
    b: &str,
    at_block: BlockIndex,
) -> FeedId {
    let feed = Feed {
        feed_id: feed_id(id),
        feed_type: FeedType::Chat,
        title: String::new(),
        alias: String::new(),
        description: None,
        is_public: false,
        block_index: at_block,
        created_at_block: at_block,
    };
    let mut world = world.lock().unwrap();
    world.insert_feed(feed);
    for address in [a, b] {
        world.insert_participant(FeedParticipant {
            feed_id: feed_id(id),
            address: addr(address),
            role: ParticipantRole::Member,
            joined_at_block: at_block,
            left_at_block: None,
            last_leave_block: None,
            encrypted_feed_key: None,
        });
    }
    feed_id(id)
}

pub fn seed_personal(
    world: &Arc<Mutex<World>>,
    id: u8,
    owner: &str,
    at_block: BlockIndex,
) -> FeedId {
    let feed = Feed {
        feed_id: feed_id(id),
        feed_type: FeedType::Personal,
        title: String::new(),
        alias: String::new(),
        description: None,
        is_public: false,
        block_index: at_block,
        created_at_block: at_block,
    };
    let mut world = world.lock().unwrap();
    world.insert_feed(feed);
    world.insert_participant(FeedParticipant {
        feed_id: feed_id(id),
        address: addr(owner),
        role: ParticipantRole::Owner,
        joined_at_block: at_block,
        left_at_block: None,
        last_leave_block: None,
        encrypted_feed_key: None,
    });
    feed_id(id)
}

/// A public group with generation 0 and the given members, first one
/// the owner.
pub fn seed_group(
    world: &Arc<Mutex<World>>,
    id: u8,
    title: &str,
    members: &[&str],
    at_block: BlockIndex,
) -> FeedId {
    let feed = Feed {
        feed_id: feed_id(id),
        feed_type: FeedType::Group,
        title: title.to_string(),
        alias: title.to_lowercase(),
        description: None,
        is_public: true,
        block_index: at_block,
        created_at_block: at_block,
    };
    let mut world = world.lock().unwrap();
    world.insert_feed(feed);
    let mut encrypted_keys = BTreeMap::new();
    for (i, address) in members.iter().enumerate() {
        world.insert_participant(FeedParticipant {
            feed_id: feed_id(id),
            address: addr(address),
            role: if i == 0 {
                ParticipantRole::Owner
            } else {
                ParticipantRole::Member
            },
            joined_at_block: at_block,
            left_at_block: None,
            last_leave_block: None,
            encrypted_feed_key: Some(format!("creation-key-{address}")),
        });
        encrypted_keys.insert(addr(address), format!("creation-key-{address}"));
    }
    world.insert_generation(KeyGeneration {
        feed_id: feed_id(id),
        generation: 0,
        valid_from_block: at_block,
        valid_to_block: None,
        trigger: RotationTrigger::Join,
        encrypted_keys,
    });
    feed_id(id)
}

pub fn seed_message(
    store: &FakeSyncStore,
    feed: FeedId,
    id: u8,
    issuer: &str,
    block: BlockIndex,
) -> MessageId {
    let message = FeedMessage {
        message_id: MessageId::new([id; 16]),
        feed_id: feed,
        content: format!("cipher-{id}"),
        issuer_address: addr(issuer),
        block_index: block,
        timestamp: Utc.timestamp_opt(1_700_000_000 + id as i64, 0).unwrap(),
        key_generation: None,
        reply_to_id: None,
        author_commitment: None,
    };
    store.messages.lock().unwrap().push(message);
    MessageId::new([id; 16])
}

/// Waits for an async condition driven by the invalidator task.
pub async fn eventually<F, Fut>(what: &str, check: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("condition never became true: {what}");
}
