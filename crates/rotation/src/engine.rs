use crate::membership::{self, MAX_GROUP_MEMBERS, REJOIN_COOLDOWN_BLOCKS};
use crate::{
    BlockClock, FeedLocks, KeyCipher, MembershipMutation, RotationCommit, RotationError,
    RotationStore,
};
use events::{Bus, Event};
use models::{
    Address, BlockIndex, FeedId, FeedParticipant, FeedType, Generation, KeyGeneration,
    ParticipantRole, Profile, RotationTrigger,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

lazy_static::lazy_static! {
    static ref ROTATIONS: prometheus::IntCounterVec = prometheus::register_int_counter_vec!(
        "group_key_rotations_total",
        "Completed group key rotations by trigger.",
        &["trigger"]
    )
    .unwrap();
    static ref ROTATION_FAILURES: prometheus::IntCounterVec = prometheus::register_int_counter_vec!(
        "group_key_rotation_failures_total",
        "Failed group key rotations by trigger.",
        &["trigger"]
    )
    .unwrap();
}

#[derive(Debug, Clone)]
pub struct RotationConfig {
    pub max_members: usize,
    pub rejoin_cooldown_blocks: u64,
    pub lock_timeout: Duration,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            max_members: MAX_GROUP_MEMBERS,
            rejoin_cooldown_blocks: REJOIN_COOLDOWN_BLOCKS,
            lock_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationOutcome {
    pub generation: Generation,
    pub member_count: usize,
    pub at_block: BlockIndex,
}

/// Drives the group key-rotation protocol: every membership change
/// allocates the next generation under the feed's lock, encrypts a
/// fresh symmetric key for the new member set, and commits membership
/// + generation + feed watermark in one transaction.
pub struct RotationEngine {
    store: Arc<dyn RotationStore>,
    cipher: Arc<dyn KeyCipher>,
    clock: Arc<dyn BlockClock>,
    bus: Bus,
    locks: FeedLocks,
    config: RotationConfig,
}

impl RotationEngine {
    pub fn new(
        store: Arc<dyn RotationStore>,
        cipher: Arc<dyn KeyCipher>,
        clock: Arc<dyn BlockClock>,
        bus: Bus,
        config: RotationConfig,
    ) -> Self {
        Self {
            store,
            cipher,
            clock,
            bus,
            locks: FeedLocks::new(),
            config,
        }
    }

    /// Public join of an open group.
    pub async fn join(
        &self,
        feed_id: FeedId,
        address: &Address,
    ) -> Result<RotationOutcome, RotationError> {
        self.counted(RotationTrigger::Join, async {
            let _guard = self
                .locks
                .acquire(feed_id, self.config.lock_timeout)
                .await?;
            let (feed, current, now) = self.load(feed_id).await?;
            if !feed.is_public {
                return Err(RotationError::NotPublic);
            }
            let existing = self.store.participant(feed_id, address).await?;
            membership::ensure_can_join(
                existing.as_ref(),
                now,
                Some(self.config.rejoin_cooldown_blocks),
            )?;

            let active = self.store.active_participants(feed_id).await?;
            let mut members: Vec<Address> = active.iter().map(|p| p.address.clone()).collect();
            members.push(address.clone());
            let mutation = join_mutation(feed_id, address, existing.as_ref(), now);
            self.seal(feed_id, current, now, RotationTrigger::Join, members, mutation, address, None)
                .await
        })
        .await
    }

    /// Admin-initiated add. `member_public_key` supplements a profile
    /// that has not yet registered an encryption key.
    pub async fn add_member(
        &self,
        feed_id: FeedId,
        admin: &Address,
        new_member: &Address,
        member_public_key: Option<&str>,
    ) -> Result<RotationOutcome, RotationError> {
        self.counted(RotationTrigger::Join, async {
            let _guard = self
                .locks
                .acquire(feed_id, self.config.lock_timeout)
                .await?;
            let (_feed, current, now) = self.load(feed_id).await?;
            let actor = self.store.participant(feed_id, admin).await?;
            membership::ensure_admin(actor.as_ref())?;
            let existing = self.store.participant(feed_id, new_member).await?;
            // Admin adds bypass the rejoin cooldown window.
            membership::ensure_can_join(existing.as_ref(), now, None)?;

            let active = self.store.active_participants(feed_id).await?;
            let mut members: Vec<Address> = active.iter().map(|p| p.address.clone()).collect();
            members.push(new_member.clone());
            let mutation = join_mutation(feed_id, new_member, existing.as_ref(), now);
            self.seal(
                feed_id,
                current,
                now,
                RotationTrigger::Join,
                members,
                mutation,
                new_member,
                member_public_key.map(|k| (new_member.clone(), k.to_string())),
            )
            .await
        })
        .await
    }

    pub async fn leave(
        &self,
        feed_id: FeedId,
        address: &Address,
    ) -> Result<RotationOutcome, RotationError> {
        self.counted(RotationTrigger::Leave, async {
            let _guard = self
                .locks
                .acquire(feed_id, self.config.lock_timeout)
                .await?;
            let (_feed, current, now) = self.load(feed_id).await?;
            let target = self.store.participant(feed_id, address).await?;
            let active = self.store.active_participants(feed_id).await?;
            membership::ensure_can_leave(target.as_ref(), &active)?;

            let members: Vec<Address> = active
                .iter()
                .map(|p| p.address.clone())
                .filter(|a| a != address)
                .collect();
            let mutation = MembershipMutation::Leave {
                address: address.clone(),
                at_block: now,
            };
            self.seal(feed_id, current, now, RotationTrigger::Leave, members, mutation, address, None)
                .await
        })
        .await
    }

    /// Ban: cryptographic exclusion. The target loses membership and
    /// is excluded from the new generation.
    pub async fn ban(
        &self,
        feed_id: FeedId,
        admin: &Address,
        target: &Address,
    ) -> Result<RotationOutcome, RotationError> {
        self.counted(RotationTrigger::Ban, async {
            let _guard = self
                .locks
                .acquire(feed_id, self.config.lock_timeout)
                .await?;
            let (_feed, current, now) = self.load(feed_id).await?;
            let actor = self.store.participant(feed_id, admin).await?;
            membership::ensure_admin(actor.as_ref())?;
            let banned = self.store.participant(feed_id, target).await?;
            membership::ensure_can_ban(banned.as_ref())?;

            let active = self.store.active_participants(feed_id).await?;
            let members: Vec<Address> = active
                .iter()
                .map(|p| p.address.clone())
                .filter(|a| a != target)
                .collect();
            let mutation = MembershipMutation::Ban {
                address: target.clone(),
                at_block: now,
            };
            self.seal(feed_id, current, now, RotationTrigger::Ban, members, mutation, target, None)
                .await
        })
        .await
    }

    pub async fn unban(
        &self,
        feed_id: FeedId,
        admin: &Address,
        target: &Address,
    ) -> Result<RotationOutcome, RotationError> {
        self.counted(RotationTrigger::Unban, async {
            let _guard = self
                .locks
                .acquire(feed_id, self.config.lock_timeout)
                .await?;
            let (_feed, current, now) = self.load(feed_id).await?;
            let actor = self.store.participant(feed_id, admin).await?;
            membership::ensure_admin(actor.as_ref())?;
            let banned = self.store.participant(feed_id, target).await?;
            membership::ensure_can_unban(banned.as_ref())?;

            let active = self.store.active_participants(feed_id).await?;
            let mut members: Vec<Address> = active.iter().map(|p| p.address.clone()).collect();
            members.push(target.clone());
            let mutation = MembershipMutation::Rejoin {
                address: target.clone(),
                at_block: now,
            };
            self.seal(feed_id, current, now, RotationTrigger::Unban, members, mutation, target, None)
                .await
        })
        .await
    }

    async fn counted(
        &self,
        trigger: RotationTrigger,
        work: impl std::future::Future<Output = Result<RotationOutcome, RotationError>>,
    ) -> Result<RotationOutcome, RotationError> {
        let result = work.await;
        let label = trigger.to_string();
        match &result {
            Ok(_) => ROTATIONS.with_label_values(&[&label]).inc(),
            Err(_) => ROTATION_FAILURES.with_label_values(&[&label]).inc(),
        }
        result
    }

    async fn load(
        &self,
        feed_id: FeedId,
    ) -> Result<(models::Feed, Generation, BlockIndex), RotationError> {
        let feed = self
            .store
            .feed(feed_id)
            .await?
            .ok_or(RotationError::FeedNotFound)?;
        if feed.feed_type != FeedType::Group {
            return Err(RotationError::NotAGroup);
        }
        // Group feeds are born with generation 0; its absence means
        // the feed is unknown to the key protocol.
        let current = self
            .store
            .max_generation(feed_id)
            .await?
            .ok_or(RotationError::FeedNotFound)?;
        let now = self.clock.current_block().await?;
        Ok((feed, current, now))
    }

    /// Steps 3-8 of the rotation: validate the prospective member
    /// set, encrypt a fresh key per member, commit atomically, and
    /// announce the membership change.
    #[allow(clippy::too_many_arguments)]
    async fn seal(
        &self,
        feed_id: FeedId,
        current: Generation,
        now: BlockIndex,
        trigger: RotationTrigger,
        members: Vec<Address>,
        mutation: MembershipMutation,
        subject: &Address,
        key_override: Option<(Address, String)>,
    ) -> Result<RotationOutcome, RotationError> {
        if members.is_empty() {
            return Err(RotationError::EmptyGroup);
        }
        if members.len() > self.config.max_members {
            return Err(RotationError::GroupTooLarge(members.len()));
        }

        let symmetric = self.cipher.generate_symmetric_key();
        let profiles: BTreeMap<Address, Profile> = self
            .store
            .profiles(&members)
            .await?
            .into_iter()
            .map(|p| (p.address.clone(), p))
            .collect();

        let mut encrypted_keys = BTreeMap::new();
        for member in &members {
            let override_key = key_override
                .as_ref()
                .filter(|(address, _)| address == member)
                .map(|(_, key)| key.as_str());
            let public_key = override_key.or_else(|| {
                profiles
                    .get(member)
                    .and_then(|p| p.public_encryption_key.as_deref())
            });
            let Some(public_key) = public_key else {
                return Err(RotationError::IdentityMissing(member.clone()));
            };
            let cipher_text = self
                .cipher
                .encrypt_for(&symmetric, public_key)
                .map_err(|source| RotationError::EncryptionFailed {
                    address: member.clone(),
                    source,
                })?;
            encrypted_keys.insert(member.clone(), base64::encode(cipher_text));
        }

        let generation = KeyGeneration {
            feed_id,
            generation: current + 1,
            valid_from_block: now,
            valid_to_block: None,
            trigger,
            encrypted_keys,
        };
        let allocated = generation.generation;

        self.store
            .commit_rotation(RotationCommit {
                generation,
                membership: mutation,
                feed_block_index: now,
            })
            .await?;

        let event = match trigger {
            RotationTrigger::Join | RotationTrigger::Unban => Event::UserJoinedGroup {
                feed_id,
                address: subject.clone(),
                at_block: now,
            },
            RotationTrigger::Leave => Event::UserLeftGroup {
                feed_id,
                address: subject.clone(),
                at_block: now,
            },
            RotationTrigger::Ban => Event::UserBannedFromGroup {
                feed_id,
                address: subject.clone(),
                at_block: now,
            },
        };
        self.bus.publish(event);

        tracing::info!(
            %feed_id,
            generation = allocated,
            %trigger,
            members = members.len(),
            at_block = now,
            "rotated group feed key"
        );
        Ok(RotationOutcome {
            generation: allocated,
            member_count: members.len(),
            at_block: now,
        })
    }
}

fn join_mutation(
    feed_id: FeedId,
    address: &Address,
    existing: Option<&FeedParticipant>,
    now: BlockIndex,
) -> MembershipMutation {
    match existing {
        Some(_) => MembershipMutation::Rejoin {
            address: address.clone(),
            at_block: now,
        },
        None => MembershipMutation::Insert(FeedParticipant {
            feed_id,
            address: address.clone(),
            role: ParticipantRole::Member,
            joined_at_block: now,
            left_at_block: None,
            last_leave_block: None,
            encrypted_feed_key: None,
        }),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::memory::{MemoryRotationStore, World};
    use crate::{CipherError, ManualClock};
    use pretty_assertions::assert_eq;

    struct FakeCipher;

    impl KeyCipher for FakeCipher {
        fn encrypt_for(&self, _plaintext: &[u8], public_key: &str) -> Result<Vec<u8>, CipherError> {
            if public_key == "malformed" {
                return Err(CipherError::InvalidKeyFormat(public_key.to_string()));
            }
            Ok(format!("sealed-for-{public_key}").into_bytes())
        }
    }

    fn group_id() -> FeedId {
        FeedId::new([7; 16])
    }

    fn profile(address: &str) -> Profile {
        Profile {
            address: Address::from(address),
            alias: address.to_string(),
            short_alias: address.to_string(),
            public_encryption_key: Some(format!("pk-{address}")),
            is_public: true,
            block_index: 1,
        }
    }

    fn owner(address: &str) -> FeedParticipant {
        FeedParticipant {
            feed_id: group_id(),
            address: Address::from(address),
            role: ParticipantRole::Owner,
            joined_at_block: 1,
            left_at_block: None,
            last_leave_block: None,
            encrypted_feed_key: Some("creation-key".to_string()),
        }
    }

    fn member(address: &str) -> FeedParticipant {
        FeedParticipant {
            role: ParticipantRole::Member,
            ..owner(address)
        }
    }

    /// A public group owned by alice at generation 0, with profiles
    /// for the given extra users.
    fn seeded_store(members: &[FeedParticipant], extra_profiles: &[&str]) -> MemoryRotationStore {
        let store = MemoryRotationStore::new();
        {
            let world_arc = store.world();
            let mut world = world_arc.lock().unwrap();
            world.insert_feed(models::Feed {
                feed_id: group_id(),
                feed_type: FeedType::Group,
                title: "Climbing".to_string(),
                alias: "climbing".to_string(),
                description: None,
                is_public: true,
                block_index: 1,
                created_at_block: 1,
            });
            let mut generation_zero = KeyGeneration {
                feed_id: group_id(),
                generation: 0,
                valid_from_block: 1,
                valid_to_block: None,
                trigger: RotationTrigger::Join,
                encrypted_keys: BTreeMap::new(),
            };
            for p in members {
                world.insert_profile(profile(p.address.as_str()));
                generation_zero
                    .encrypted_keys
                    .insert(p.address.clone(), "creation-key".to_string());
                world.insert_participant(p.clone());
            }
            for address in extra_profiles {
                world.insert_profile(profile(address));
            }
            world.insert_generation(generation_zero);
        }
        store
    }

    fn engine(store: &MemoryRotationStore, clock: Arc<ManualClock>) -> RotationEngine {
        RotationEngine::new(
            Arc::new(store.clone()),
            Arc::new(FakeCipher),
            clock,
            Bus::default(),
            RotationConfig::default(),
        )
    }

    fn engine_with(
        store: &MemoryRotationStore,
        clock: Arc<ManualClock>,
        bus: Bus,
        config: RotationConfig,
    ) -> RotationEngine {
        RotationEngine::new(Arc::new(store.clone()), Arc::new(FakeCipher), clock, bus, config)
    }

    fn world_of(store: &MemoryRotationStore) -> std::sync::Arc<std::sync::Mutex<World>> {
        store.world()
    }

    #[tokio::test]
    async fn join_allocates_the_next_generation() {
        let store = seeded_store(&[owner("alice")], &["bob"]);
        let clock = Arc::new(ManualClock::at(50));
        let bus = Bus::default();
        let mut events = bus.subscribe();
        let engine = engine_with(&store, clock, bus.clone(), RotationConfig::default());

        let outcome = engine.join(group_id(), &Address::from("bob")).await.unwrap();
        assert_eq!(outcome.generation, 1);
        assert_eq!(outcome.member_count, 2);
        assert_eq!(outcome.at_block, 50);

        let world_arc = world_of(&store);
        let world = world_arc.lock().unwrap();
        let generations = world.generations_of(group_id());
        assert_eq!(generations.len(), 2);
        assert_eq!(generations[0].valid_to_block, Some(50));
        let latest = &generations[1];
        assert_eq!(latest.generation, 1);
        assert_eq!(latest.valid_from_block, 50);
        assert_eq!(
            latest.encrypted_keys.keys().cloned().collect::<Vec<_>>(),
            vec![Address::from("alice"), Address::from("bob")]
        );

        let bob = world.participant(group_id(), &Address::from("bob")).unwrap();
        assert!(bob.is_active());
        assert_eq!(bob.joined_at_block, 50);
        assert_eq!(world.feeds[&group_id()].block_index, 50);
        drop(world);

        assert_eq!(
            events.recv().await,
            Some(Event::UserJoinedGroup {
                feed_id: group_id(),
                address: Address::from("bob"),
                at_block: 50,
            })
        );
    }

    #[tokio::test]
    async fn ban_excludes_the_target_from_the_new_generation() {
        let store = seeded_store(&[owner("alice"), member("bob")], &[]);
        let clock = Arc::new(ManualClock::at(200));
        let engine = engine(&store, clock);

        let outcome = engine
            .ban(group_id(), &Address::from("alice"), &Address::from("bob"))
            .await
            .unwrap();
        assert_eq!(outcome.generation, 1);
        assert_eq!(outcome.member_count, 1);

        let world_arc = world_of(&store);
        let world = world_arc.lock().unwrap();
        let latest = world.generations_of(group_id()).pop().unwrap();
        assert_eq!(
            latest.encrypted_keys.keys().cloned().collect::<Vec<_>>(),
            vec![Address::from("alice")]
        );
        let bob = world.participant(group_id(), &Address::from("bob")).unwrap();
        assert_eq!(bob.role, ParticipantRole::Banned);
        assert_eq!(bob.left_at_block, Some(200));
    }

    #[tokio::test]
    async fn sole_admin_cannot_leave_but_members_can() {
        let store = seeded_store(&[owner("alice"), member("bob")], &[]);
        let clock = Arc::new(ManualClock::at(60));
        let engine = engine(&store, clock);

        let err = engine.leave(group_id(), &Address::from("alice")).await.unwrap_err();
        assert!(matches!(err, RotationError::LastAdmin));

        let outcome = engine.leave(group_id(), &Address::from("bob")).await.unwrap();
        assert_eq!(outcome.generation, 1);
        assert_eq!(outcome.member_count, 1);
    }

    #[tokio::test]
    async fn rejoin_respects_the_cooldown() {
        let store = seeded_store(&[owner("alice"), member("bob")], &[]);
        let clock = Arc::new(ManualClock::at(100));
        let engine = engine(&store, clock.clone());
        let bob = Address::from("bob");

        engine.leave(group_id(), &bob).await.unwrap();

        clock.set(150);
        let err = engine.join(group_id(), &bob).await.unwrap_err();
        assert!(matches!(err, RotationError::CooldownActive { until: 200 }));

        clock.set(200);
        let outcome = engine.join(group_id(), &bob).await.unwrap();
        assert_eq!(outcome.generation, 2);

        // The failed attempt did not burn a generation number.
        let world_arc = world_of(&store);
        let world = world_arc.lock().unwrap();
        let numbers: Vec<Generation> = world
            .generations_of(group_id())
            .iter()
            .map(|g| g.generation)
            .collect();
        assert_eq!(numbers, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn oversized_group_rejects_the_join_untouched() {
        let store = seeded_store(&[owner("alice"), member("bob")], &["carol"]);
        let clock = Arc::new(ManualClock::at(10));
        let config = RotationConfig {
            max_members: 2,
            ..RotationConfig::default()
        };
        let engine = engine_with(&store, clock, Bus::default(), config);

        let err = engine.join(group_id(), &Address::from("carol")).await.unwrap_err();
        assert!(matches!(err, RotationError::GroupTooLarge(3)));

        let world_arc = world_of(&store);
        let world = world_arc.lock().unwrap();
        assert_eq!(world.generations_of(group_id()).len(), 1);
        assert!(world.participant(group_id(), &Address::from("carol")).is_none());
    }

    #[tokio::test]
    async fn missing_identity_aborts_without_mutation() {
        // dave has no profile at all.
        let store = seeded_store(&[owner("alice")], &[]);
        let clock = Arc::new(ManualClock::at(10));
        let engine = engine(&store, clock);

        let err = engine.join(group_id(), &Address::from("dave")).await.unwrap_err();
        assert!(matches!(err, RotationError::IdentityMissing(a) if a == Address::from("dave")));

        let world_arc = world_of(&store);
        let world = world_arc.lock().unwrap();
        assert_eq!(world.generations_of(group_id()).len(), 1);
        assert!(world.participant(group_id(), &Address::from("dave")).is_none());
    }

    #[tokio::test]
    async fn encryption_failure_cites_the_offending_member() {
        let store = seeded_store(&[owner("alice")], &[]);
        {
            let world_arc = store.world();
            let mut world = world_arc.lock().unwrap();
            world.insert_profile(Profile {
                public_encryption_key: Some("malformed".to_string()),
                ..profile("eve")
            });
        }
        let clock = Arc::new(ManualClock::at(10));
        let engine = engine(&store, clock);

        let err = engine.join(group_id(), &Address::from("eve")).await.unwrap_err();
        assert!(
            matches!(err, RotationError::EncryptionFailed { ref address, .. } if address == &Address::from("eve"))
        );
    }

    #[tokio::test]
    async fn private_groups_reject_public_joins_but_not_admin_adds() {
        let store = seeded_store(&[owner("alice")], &["bob"]);
        {
            let world_arc = store.world();
            world_arc.lock().unwrap().feeds.get_mut(&group_id()).unwrap().is_public = false;
        }
        let clock = Arc::new(ManualClock::at(10));
        let engine = engine(&store, clock);
        let bob = Address::from("bob");

        let err = engine.join(group_id(), &bob).await.unwrap_err();
        assert!(matches!(err, RotationError::NotPublic));

        let outcome = engine
            .add_member(group_id(), &Address::from("alice"), &bob, None)
            .await
            .unwrap();
        assert_eq!(outcome.generation, 1);
    }

    #[tokio::test]
    async fn unban_readmits_and_rotates_again() {
        let store = seeded_store(&[owner("alice"), member("bob")], &[]);
        let clock = Arc::new(ManualClock::at(200));
        let engine = engine(&store, clock.clone());
        let (alice, bob) = (Address::from("alice"), Address::from("bob"));

        engine.ban(group_id(), &alice, &bob).await.unwrap();
        clock.set(250);
        let outcome = engine.unban(group_id(), &alice, &bob).await.unwrap();
        assert_eq!(outcome.generation, 2);

        let world_arc = world_of(&store);
        let world = world_arc.lock().unwrap();
        let latest = world.generations_of(group_id()).pop().unwrap();
        assert!(latest.encrypted_keys.contains_key(&bob));
        assert_eq!(latest.trigger, RotationTrigger::Unban);
        let bob_row = world.participant(group_id(), &bob).unwrap();
        assert_eq!(bob_row.role, ParticipantRole::Member);
        assert!(bob_row.is_active());
    }

    #[tokio::test]
    async fn concurrent_joins_allocate_dense_generations() {
        let users = ["u1", "u2", "u3", "u4", "u5"];
        let store = seeded_store(&[owner("alice")], &users);
        let clock = Arc::new(ManualClock::at(10));
        let engine = Arc::new(engine(&store, clock));

        let mut handles = Vec::new();
        for user in users {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine.join(group_id(), &Address::from(user)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let world_arc = world_of(&store);
        let world = world_arc.lock().unwrap();
        let numbers: Vec<Generation> = world
            .generations_of(group_id())
            .iter()
            .map(|g| g.generation)
            .collect();
        assert_eq!(numbers, vec![0, 1, 2, 3, 4, 5]);

        // Each join added exactly one key holder, whatever order the
        // tasks won the lock in.
        for g in world.generations_of(group_id()) {
            assert_eq!(g.encrypted_keys.len(), g.generation as usize + 1);
        }
        let final_keys: std::collections::BTreeSet<Address> = world
            .generations_of(group_id())
            .last()
            .unwrap()
            .encrypted_keys
            .keys()
            .cloned()
            .collect();
        assert_eq!(final_keys.len(), 6);
        assert!(final_keys.contains(&Address::from("alice")));
    }

    #[tokio::test]
    async fn unknown_feed_fails() {
        let store = MemoryRotationStore::new();
        let clock = Arc::new(ManualClock::at(10));
        let engine = engine(&store, clock);

        let err = engine
            .join(FeedId::new([9; 16]), &Address::from("bob"))
            .await
            .unwrap_err();
        assert!(matches!(err, RotationError::FeedNotFound));
    }
}
