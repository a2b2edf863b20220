//! Group key-rotation engine and the membership state machine behind
//! it. Every membership change of a group feed allocates a dense,
//! monotone key generation under a per-feed lock and distributes a
//! fresh symmetric key to the surviving member set.

mod cipher;
mod clock;
mod engine;
mod locks;
pub mod membership;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
mod store;

pub use cipher::{CipherError, KeyCipher};
pub use clock::{BlockClock, ManualClock};
pub use engine::{RotationConfig, RotationEngine, RotationOutcome};
pub use locks::FeedLocks;
pub use store::{MembershipMutation, PgRotationStore, RotationCommit, RotationStore};

use models::{Address, BlockIndex, ParticipantRole};

#[derive(Debug, thiserror::Error)]
pub enum RotationError {
    #[error("feed not found")]
    FeedNotFound,
    #[error("not a group feed")]
    NotAGroup,
    #[error("feed is not public")]
    NotPublic,
    #[error("group would be empty after rotation")]
    EmptyGroup,
    #[error("group too large: {0} members")]
    GroupTooLarge(usize),
    #[error("no encryption key registered for {0}")]
    IdentityMissing(Address),
    #[error("failed to encrypt feed key for {address}")]
    EncryptionFailed {
        address: Address,
        #[source]
        source: CipherError,
    },
    #[error("{0} is already a member")]
    AlreadyMember(Address),
    #[error("{0} is not a member of this feed")]
    NotAMember(Address),
    #[error("no such participant in this feed")]
    UnknownParticipant,
    #[error("{0} is not banned")]
    NotBanned(Address),
    #[error("{0} is banned from this feed")]
    BannedMember(Address),
    #[error("the feed owner cannot be targeted")]
    OwnerImmune,
    #[error("{address} cannot transition from the {role} role")]
    InvalidRole {
        address: Address,
        role: ParticipantRole,
    },
    #[error("not authorized")]
    NotAuthorized,
    #[error("another admin is required first")]
    LastAdmin,
    #[error("rejoin cooldown active until block {until}")]
    CooldownActive { until: BlockIndex },
    #[error("rotation lock timed out")]
    LockTimeout,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
