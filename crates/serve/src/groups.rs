use crate::error::ApiError;
use crate::names::resolve_display_names;
use crate::store::SyncStore;
use events::{Bus, Event};
use models::{
    Address, BlockIndex, Feed, FeedId, FeedParticipant, FeedType, Generation, KeyGeneration,
    ParticipantRole, RotationTrigger,
};
use projections::{CachedGeneration, Caches, EnrichedMember};
use rotation::{membership, BlockClock, RotationEngine, RotationError, RotationOutcome};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const TITLE_MAX_CHARS: usize = 100;
pub const DESCRIPTION_MAX_CHARS: usize = 500;

/// The `{success, message}` envelope of every mutating group RPC.
/// Expected failures (validation, authorization, membership state)
/// ride here; transport-level errors are reserved for internal and
/// cancellation cases.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationReply {
    pub success: bool,
    pub message: String,
}

impl MutationReply {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewParticipant {
    pub address: Address,
    pub role: ParticipantRole,
    pub encrypted_feed_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    pub feed_id: FeedId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_public: bool,
    pub participants: Vec<NewParticipant>,
}

/// One key generation as exposed to a requesting member: only their
/// own encrypted key, and no `validToBlock` (clients disambiguate via
/// each message's `keyGeneration` field).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyGenerationRecord {
    pub generation: Generation,
    pub encrypted_key_for_requester: String,
    pub valid_from_block: BlockIndex,
}

pub struct GroupService {
    store: Arc<dyn SyncStore>,
    caches: Arc<Caches>,
    engine: Arc<RotationEngine>,
    bus: Bus,
    clock: Arc<dyn BlockClock>,
}

impl GroupService {
    pub fn new(
        store: Arc<dyn SyncStore>,
        caches: Arc<Caches>,
        engine: Arc<RotationEngine>,
        bus: Bus,
        clock: Arc<dyn BlockClock>,
    ) -> Self {
        Self {
            store,
            caches,
            engine,
            bus,
            clock,
        }
    }

    /// Full member list (active and departed) with resolved display
    /// names, served from the enriched cache.
    pub async fn get_group_members(
        &self,
        feed_id: FeedId,
    ) -> Result<Vec<EnrichedMember>, ApiError> {
        if let Some(members) = self.caches.group.members(feed_id).await {
            return Ok(members);
        }

        let participants = self
            .store
            .participants(feed_id)
            .await
            .map_err(ApiError::db)?;
        if participants.is_empty() && !self.store.feed_exists(feed_id).await.map_err(ApiError::db)?
        {
            return Err(ApiError::NotFound("feed"));
        }

        let addresses: Vec<Address> = participants.iter().map(|p| p.address.clone()).collect();
        let names =
            resolve_display_names(self.store.as_ref(), &self.caches.identity, &addresses).await?;

        let members: Vec<EnrichedMember> = participants
            .into_iter()
            .map(|p| {
                let display_name = names
                    .get(&p.address)
                    .cloned()
                    .unwrap_or_else(|| p.address.to_string());
                EnrichedMember {
                    address: p.address,
                    display_name,
                    role: p.role,
                    joined_at_block: p.joined_at_block,
                    left_at_block: p.left_at_block,
                }
            })
            .collect();

        self.caches.group.set_members(feed_id, &members).await;
        Ok(members)
    }

    /// Per-requester view of the key-generation bundle.
    pub async fn get_key_generations(
        &self,
        feed_id: FeedId,
        requester: &Address,
    ) -> Result<Vec<KeyGenerationRecord>, ApiError> {
        let generations = match self.caches.group.key_generations(feed_id).await {
            Some(generations) => generations,
            None => {
                let from_db = self
                    .store
                    .key_generations(feed_id)
                    .await
                    .map_err(ApiError::db)?;
                if from_db.is_empty() {
                    return if self.store.feed_exists(feed_id).await.map_err(ApiError::db)? {
                        Ok(Vec::new())
                    } else {
                        Err(ApiError::NotFound("feed"))
                    };
                }
                self.caches
                    .group
                    .set_key_generations(feed_id, &from_db)
                    .await;
                from_db.iter().map(CachedGeneration::from).collect()
            }
        };

        Ok(generations
            .into_iter()
            .map(|g| KeyGenerationRecord {
                generation: g.version,
                encrypted_key_for_requester: g
                    .encrypted_keys_by_member
                    .get(requester)
                    .cloned()
                    .unwrap_or_default(),
                valid_from_block: g.valid_from_block,
            })
            .collect())
    }

    /// Creates the group with caller-supplied per-participant feed
    /// keys as generation 0.
    pub async fn create_group_feed(
        &self,
        request: CreateGroupRequest,
    ) -> Result<MutationReply, ApiError> {
        if request.title.is_empty() || request.title.chars().count() > TITLE_MAX_CHARS {
            return Ok(MutationReply::rejected(format!(
                "title must be 1..={TITLE_MAX_CHARS} characters"
            )));
        }
        if let Some(description) = &request.description {
            if description.chars().count() > DESCRIPTION_MAX_CHARS {
                return Ok(MutationReply::rejected(format!(
                    "description must be at most {DESCRIPTION_MAX_CHARS} characters"
                )));
            }
        }
        if request.participants.is_empty() {
            return Ok(MutationReply::rejected("a group needs participants"));
        }
        if request.participants.len() > membership::MAX_GROUP_MEMBERS {
            return Ok(MutationReply::rejected("group too large"));
        }
        let owners = request
            .participants
            .iter()
            .filter(|p| p.role == ParticipantRole::Owner)
            .count();
        if owners != 1 {
            return Ok(MutationReply::rejected("exactly one owner is required"));
        }
        if request.participants.iter().any(|p| {
            p.encrypted_feed_key.is_empty()
                || matches!(
                    p.role,
                    ParticipantRole::Blocked | ParticipantRole::Banned
                )
        }) {
            return Ok(MutationReply::rejected(
                "every participant needs an encrypted feed key and an admissible role",
            ));
        }
        if self
            .store
            .feed_exists(request.feed_id)
            .await
            .map_err(ApiError::db)?
        {
            return Ok(MutationReply::rejected("feed already exists"));
        }

        let now = self.clock.current_block().await?;
        let feed = Feed {
            feed_id: request.feed_id,
            feed_type: FeedType::Group,
            title: request.title.clone(),
            alias: request.title,
            description: request.description,
            is_public: request.is_public,
            block_index: now,
            created_at_block: now,
        };
        let participants: Vec<FeedParticipant> = request
            .participants
            .iter()
            .map(|p| FeedParticipant {
                feed_id: feed.feed_id,
                address: p.address.clone(),
                role: p.role,
                joined_at_block: now,
                left_at_block: None,
                last_leave_block: None,
                encrypted_feed_key: Some(p.encrypted_feed_key.clone()),
            })
            .collect();
        let encrypted_keys: BTreeMap<Address, String> = request
            .participants
            .into_iter()
            .map(|p| (p.address, p.encrypted_feed_key))
            .collect();
        let generation_zero = KeyGeneration {
            feed_id: feed.feed_id,
            generation: 0,
            valid_from_block: now,
            valid_to_block: None,
            trigger: RotationTrigger::Join,
            encrypted_keys,
        };

        self.store
            .create_group_feed(&feed, &participants, &generation_zero)
            .await
            .map_err(ApiError::db)?;

        tracing::info!(feed_id = %feed.feed_id, members = participants.len(), "created group feed");
        Ok(MutationReply::ok("group feed created"))
    }

    pub async fn join_group(
        &self,
        feed_id: FeedId,
        address: &Address,
    ) -> Result<MutationReply, ApiError> {
        envelope(self.engine.join(feed_id, address).await)
    }

    pub async fn leave_group(
        &self,
        feed_id: FeedId,
        address: &Address,
    ) -> Result<MutationReply, ApiError> {
        envelope(self.engine.leave(feed_id, address).await)
    }

    pub async fn add_member(
        &self,
        feed_id: FeedId,
        admin: &Address,
        new_member: &Address,
        member_public_key: Option<&str>,
    ) -> Result<MutationReply, ApiError> {
        envelope(
            self.engine
                .add_member(feed_id, admin, new_member, member_public_key)
                .await,
        )
    }

    pub async fn ban_member(
        &self,
        feed_id: FeedId,
        admin: &Address,
        target: &Address,
    ) -> Result<MutationReply, ApiError> {
        envelope(self.engine.ban(feed_id, admin, target).await)
    }

    pub async fn unban_member(
        &self,
        feed_id: FeedId,
        admin: &Address,
        target: &Address,
    ) -> Result<MutationReply, ApiError> {
        envelope(self.engine.unban(feed_id, admin, target).await)
    }

    /// Block: the member keeps decryption ability but cannot post.
    /// No rotation.
    pub async fn block_member(
        &self,
        feed_id: FeedId,
        admin: &Address,
        target: &Address,
    ) -> Result<MutationReply, ApiError> {
        self.role_change(feed_id, admin, target, ParticipantRole::Blocked, |t| {
            membership::ensure_can_block(t)
        })
        .await
    }

    pub async fn unblock_member(
        &self,
        feed_id: FeedId,
        admin: &Address,
        target: &Address,
    ) -> Result<MutationReply, ApiError> {
        self.role_change(feed_id, admin, target, ParticipantRole::Member, |t| {
            membership::ensure_can_unblock(t)
        })
        .await
    }

    pub async fn promote_to_admin(
        &self,
        feed_id: FeedId,
        admin: &Address,
        target: &Address,
    ) -> Result<MutationReply, ApiError> {
        self.role_change(feed_id, admin, target, ParticipantRole::Admin, |t| {
            membership::ensure_can_promote(t)
        })
        .await
    }

    async fn role_change(
        &self,
        feed_id: FeedId,
        admin: &Address,
        target: &Address,
        role: ParticipantRole,
        check: impl Fn(Option<&FeedParticipant>) -> Result<(), RotationError>,
    ) -> Result<MutationReply, ApiError> {
        let actor = self
            .store
            .participant(feed_id, admin)
            .await
            .map_err(ApiError::db)?;
        if let Err(err) = membership::ensure_admin(actor.as_ref()) {
            return Ok(MutationReply::rejected(err.to_string()));
        }
        let current = self
            .store
            .participant(feed_id, target)
            .await
            .map_err(ApiError::db)?;
        if let Err(err) = check(current.as_ref()) {
            return Ok(MutationReply::rejected(err.to_string()));
        }

        self.store
            .set_role(feed_id, target, role)
            .await
            .map_err(ApiError::db)?;
        self.caches.group.invalidate_members(feed_id).await;

        Ok(MutationReply::ok(format!("{target} is now {role}")))
    }

    pub async fn update_title(
        &self,
        feed_id: FeedId,
        admin: &Address,
        title: &str,
    ) -> Result<MutationReply, ApiError> {
        if title.is_empty() || title.chars().count() > TITLE_MAX_CHARS {
            return Ok(MutationReply::rejected(format!(
                "title must be 1..={TITLE_MAX_CHARS} characters"
            )));
        }
        if let Some(reply) = self.ensure_group_admin(feed_id, admin).await? {
            return Ok(reply);
        }

        let now = self.clock.current_block().await?;
        self.store
            .update_feed_title(feed_id, title, now)
            .await
            .map_err(ApiError::db)?;
        self.bus.publish(Event::GroupTitleChanged {
            feed_id,
            title: title.to_string(),
        });
        Ok(MutationReply::ok("title updated"))
    }

    pub async fn update_description(
        &self,
        feed_id: FeedId,
        admin: &Address,
        description: &str,
    ) -> Result<MutationReply, ApiError> {
        if description.chars().count() > DESCRIPTION_MAX_CHARS {
            return Ok(MutationReply::rejected(format!(
                "description must be at most {DESCRIPTION_MAX_CHARS} characters"
            )));
        }
        if let Some(reply) = self.ensure_group_admin(feed_id, admin).await? {
            return Ok(reply);
        }

        let now = self.clock.current_block().await?;
        self.store
            .update_feed_description(feed_id, description, now)
            .await
            .map_err(ApiError::db)?;
        Ok(MutationReply::ok("description updated"))
    }

    pub async fn delete_group_feed(
        &self,
        feed_id: FeedId,
        owner: &Address,
    ) -> Result<MutationReply, ApiError> {
        let actor = self
            .store
            .participant(feed_id, owner)
            .await
            .map_err(ApiError::db)?;
        match actor {
            Some(p) if p.is_active() && p.role == ParticipantRole::Owner => {}
            Some(_) => return Ok(MutationReply::rejected("only the owner may delete the feed")),
            None => return Ok(MutationReply::rejected("not a participant of this feed")),
        }

        let participants = self
            .store
            .participants(feed_id)
            .await
            .map_err(ApiError::db)?;
        self.store.delete_feed(feed_id).await.map_err(ApiError::db)?;

        for p in &participants {
            self.caches.user_feeds.remove(&p.address, feed_id).await;
            self.caches.feed_meta.remove(&p.address, feed_id).await;
        }
        self.caches.group.invalidate_participants(feed_id).await;
        self.caches.group.invalidate_key_generations(feed_id).await;
        self.caches.group.invalidate_members(feed_id).await;
        self.caches.tails.invalidate(feed_id).await;

        tracing::info!(%feed_id, "deleted group feed");
        Ok(MutationReply::ok("group feed deleted"))
    }

    /// Admin gate shared by the metadata mutations; also rejects
    /// non-group feeds.
    async fn ensure_group_admin(
        &self,
        feed_id: FeedId,
        admin: &Address,
    ) -> Result<Option<MutationReply>, ApiError> {
        let feed = self.store.feed(feed_id).await.map_err(ApiError::db)?;
        match feed {
            None => return Err(ApiError::NotFound("feed")),
            Some(feed) if feed.feed_type != FeedType::Group => {
                return Ok(Some(MutationReply::rejected("not a group feed")));
            }
            Some(_) => {}
        }
        let actor = self
            .store
            .participant(feed_id, admin)
            .await
            .map_err(ApiError::db)?;
        if let Err(err) = membership::ensure_admin(actor.as_ref()) {
            return Ok(Some(MutationReply::rejected(err.to_string())));
        }
        Ok(None)
    }
}

/// Folds a rotation result into the mutation envelope: expected
/// failures are user-visible rejections; store failures surface as
/// transport errors.
fn envelope(result: Result<RotationOutcome, RotationError>) -> Result<MutationReply, ApiError> {
    match result {
        Ok(outcome) => Ok(MutationReply::ok(format!(
            "key generation {} active for {} members",
            outcome.generation, outcome.member_count
        ))),
        Err(RotationError::Store(err)) => Err(ApiError::db(err)),
        Err(err @ RotationError::LockTimeout) => Ok(MutationReply::rejected(format!(
            "{err}; the membership change was not applied, retry shortly"
        ))),
        Err(err) => Ok(MutationReply::rejected(err.to_string())),
    }
}
