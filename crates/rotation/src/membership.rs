//! The membership state machine of a group feed. Transitions are
//! validated here and applied by the engine (rotating actions) or the
//! service layer (block/unblock/promote, which do not rotate).

use crate::RotationError;
use models::{BlockIndex, FeedParticipant, ParticipantRole};

pub const MAX_GROUP_MEMBERS: usize = 512;
pub const REJOIN_COOLDOWN_BLOCKS: u64 = 100;

/// The acting participant must be an active admin or the owner.
pub fn ensure_admin(actor: Option<&FeedParticipant>) -> Result<(), RotationError> {
    match actor {
        Some(p) if p.is_active() && p.role.is_admin() => Ok(()),
        _ => Err(RotationError::NotAuthorized),
    }
}

/// Absent -> Member, or Left -> Member once the cooldown window has
/// passed. `cooldown` is `None` for admin adds, which bypass the
/// window.
pub fn ensure_can_join(
    existing: Option<&FeedParticipant>,
    current_block: BlockIndex,
    cooldown: Option<u64>,
) -> Result<(), RotationError> {
    match existing {
        None => Ok(()),
        Some(p) if p.role == ParticipantRole::Banned => {
            Err(RotationError::BannedMember(p.address.clone()))
        }
        Some(p) if p.is_active() => Err(RotationError::AlreadyMember(p.address.clone())),
        Some(p) => {
            if let (Some(cooldown), Some(last_leave)) = (cooldown, p.last_leave_block) {
                let until = last_leave + cooldown;
                if current_block < until {
                    return Err(RotationError::CooldownActive { until });
                }
            }
            Ok(())
        }
    }
}

/// Any active participant may leave, except the last remaining
/// admin/owner, who must hand over first.
pub fn ensure_can_leave(
    target: Option<&FeedParticipant>,
    active: &[FeedParticipant],
) -> Result<(), RotationError> {
    let p = active_or_not_a_member(target)?;
    if p.role.is_admin() {
        let other_admins = active
            .iter()
            .filter(|a| a.address != p.address && a.role.is_admin())
            .count();
        if other_admins == 0 {
            return Err(RotationError::LastAdmin);
        }
    }
    Ok(())
}

/// Member -> Banned. Admins must be demoted first; the owner is
/// immune.
pub fn ensure_can_ban(target: Option<&FeedParticipant>) -> Result<(), RotationError> {
    let p = active_or_not_a_member(target)?;
    match p.role {
        ParticipantRole::Member | ParticipantRole::Blocked => Ok(()),
        ParticipantRole::Owner => Err(RotationError::OwnerImmune),
        role => Err(RotationError::InvalidRole {
            address: p.address.clone(),
            role,
        }),
    }
}

/// Banned -> Member.
pub fn ensure_can_unban(target: Option<&FeedParticipant>) -> Result<(), RotationError> {
    match target {
        Some(p) if p.role == ParticipantRole::Banned => Ok(()),
        Some(p) => Err(RotationError::NotBanned(p.address.clone())),
        None => Err(RotationError::UnknownParticipant),
    }
}

/// Member -> Blocked. A blocked member keeps decryption ability but
/// cannot post, so blocking does not rotate.
pub fn ensure_can_block(target: Option<&FeedParticipant>) -> Result<(), RotationError> {
    let p = active_or_not_a_member(target)?;
    match p.role {
        ParticipantRole::Member => Ok(()),
        ParticipantRole::Owner => Err(RotationError::OwnerImmune),
        role => Err(RotationError::InvalidRole {
            address: p.address.clone(),
            role,
        }),
    }
}

/// Blocked -> Member.
pub fn ensure_can_unblock(target: Option<&FeedParticipant>) -> Result<(), RotationError> {
    let p = active_or_not_a_member(target)?;
    match p.role {
        ParticipantRole::Blocked => Ok(()),
        role => Err(RotationError::InvalidRole {
            address: p.address.clone(),
            role,
        }),
    }
}

/// Member -> Admin.
pub fn ensure_can_promote(target: Option<&FeedParticipant>) -> Result<(), RotationError> {
    let p = active_or_not_a_member(target)?;
    match p.role {
        ParticipantRole::Member => Ok(()),
        role => Err(RotationError::InvalidRole {
            address: p.address.clone(),
            role,
        }),
    }
}

fn active_or_not_a_member(
    target: Option<&FeedParticipant>,
) -> Result<&FeedParticipant, RotationError> {
    match target {
        Some(p) if p.is_active() => Ok(p),
        Some(p) => Err(RotationError::NotAMember(p.address.clone())),
        None => Err(RotationError::UnknownParticipant),
    }
}
