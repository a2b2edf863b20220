use models::{Address, BlockIndex, FeedId, FeedParticipant, ParticipantRole};
use sqlx::types::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub struct ParticipantRow {
    pub feed_id: Uuid,
    pub address: String,
    pub role: String,
    pub joined_at_block: i64,
    pub left_at_block: Option<i64>,
    pub last_leave_block: Option<i64>,
    pub encrypted_feed_key: Option<String>,
}

impl TryFrom<ParticipantRow> for FeedParticipant {
    type Error = sqlx::Error;

    fn try_from(row: ParticipantRow) -> Result<Self, Self::Error> {
        let role: ParticipantRole = row.role.parse().map_err(crate::decode_err)?;
        Ok(FeedParticipant {
            feed_id: FeedId::from_uuid(row.feed_id),
            address: Address::from(row.address),
            role,
            joined_at_block: row.joined_at_block as u64,
            left_at_block: row.left_at_block.map(|b| b as u64),
            last_leave_block: row.last_leave_block.map(|b| b as u64),
            encrypted_feed_key: row.encrypted_feed_key,
        })
    }
}

/// All participants of a feed, active and departed.
pub async fn fetch_all(
    executor: impl sqlx::PgExecutor<'_>,
    feed_id: FeedId,
) -> sqlx::Result<Vec<FeedParticipant>> {
    let rows = sqlx::query_as::<_, ParticipantRow>(
        r#"
        SELECT feed_id, address, role, joined_at_block, left_at_block, last_leave_block,
               encrypted_feed_key
        FROM feed_participants
        WHERE feed_id = $1
        ORDER BY joined_at_block
        "#,
    )
    .bind(feed_id.to_uuid())
    .fetch_all(executor)
    .await?;
    rows.into_iter().map(FeedParticipant::try_from).collect()
}

/// Active members only: not departed and not banned.
pub async fn fetch_active(
    executor: impl sqlx::PgExecutor<'_>,
    feed_id: FeedId,
) -> sqlx::Result<Vec<FeedParticipant>> {
    let rows = sqlx::query_as::<_, ParticipantRow>(
        r#"
        SELECT feed_id, address, role, joined_at_block, left_at_block, last_leave_block,
               encrypted_feed_key
        FROM feed_participants
        WHERE feed_id = $1
          AND left_at_block IS NULL
          AND role != 'banned'
        ORDER BY joined_at_block
        "#,
    )
    .bind(feed_id.to_uuid())
    .fetch_all(executor)
    .await?;
    rows.into_iter().map(FeedParticipant::try_from).collect()
}

pub async fn fetch_one(
    executor: impl sqlx::PgExecutor<'_>,
    feed_id: FeedId,
    address: &Address,
) -> sqlx::Result<Option<FeedParticipant>> {
    let row = sqlx::query_as::<_, ParticipantRow>(
        r#"
        SELECT feed_id, address, role, joined_at_block, left_at_block, last_leave_block,
               encrypted_feed_key
        FROM feed_participants
        WHERE feed_id = $1 AND address = $2
        "#,
    )
    .bind(feed_id.to_uuid())
    .bind(address.as_str())
    .fetch_optional(executor)
    .await?;
    row.map(FeedParticipant::try_from).transpose()
}

/// Feeds the address is an active participant of.
pub async fn feed_ids_for_address(
    executor: impl sqlx::PgExecutor<'_>,
    address: &Address,
) -> sqlx::Result<Vec<FeedId>> {
    let rows = sqlx::query_as::<_, (Uuid,)>(
        r#"
        SELECT feed_id
        FROM feed_participants
        WHERE address = $1 AND left_at_block IS NULL AND role != 'banned'
        "#,
    )
    .bind(address.as_str())
    .fetch_all(executor)
    .await?;
    Ok(rows.into_iter().map(|(id,)| FeedId::from_uuid(id)).collect())
}

pub async fn insert(
    txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    participant: &FeedParticipant,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO feed_participants (feed_id, address, role, joined_at_block, left_at_block,
                                       last_leave_block, encrypted_feed_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(participant.feed_id.to_uuid())
    .bind(participant.address.as_str())
    .bind(participant.role.to_string())
    .bind(participant.joined_at_block as i64)
    .bind(participant.left_at_block.map(|b| b as i64))
    .bind(participant.last_leave_block.map(|b| b as i64))
    .bind(&participant.encrypted_feed_key)
    .execute(&mut *txn)
    .await?;
    Ok(())
}

/// Re-admits a previously departed (or banned) participant: the join
/// block advances and the departure marker clears, while
/// `last_leave_block` is retained for the cooldown window.
pub async fn rejoin(
    txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    feed_id: FeedId,
    address: &Address,
    at_block: BlockIndex,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        UPDATE feed_participants
        SET role = 'member', joined_at_block = $3, left_at_block = NULL
        WHERE feed_id = $1 AND address = $2
        "#,
    )
    .bind(feed_id.to_uuid())
    .bind(address.as_str())
    .bind(at_block as i64)
    .execute(&mut *txn)
    .await?;
    Ok(())
}

pub async fn mark_left(
    txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    feed_id: FeedId,
    address: &Address,
    at_block: BlockIndex,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        UPDATE feed_participants
        SET left_at_block = $3, last_leave_block = $3
        WHERE feed_id = $1 AND address = $2
        "#,
    )
    .bind(feed_id.to_uuid())
    .bind(address.as_str())
    .bind(at_block as i64)
    .execute(&mut *txn)
    .await?;
    Ok(())
}

/// A ban is a departure that also pins the banned role, so the member
/// cannot rejoin without an explicit unban.
pub async fn mark_banned(
    txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    feed_id: FeedId,
    address: &Address,
    at_block: BlockIndex,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        UPDATE feed_participants
        SET role = 'banned', left_at_block = $3, last_leave_block = $3
        WHERE feed_id = $1 AND address = $2
        "#,
    )
    .bind(feed_id.to_uuid())
    .bind(address.as_str())
    .bind(at_block as i64)
    .execute(&mut *txn)
    .await?;
    Ok(())
}

pub async fn set_role(
    txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    feed_id: FeedId,
    address: &Address,
    role: ParticipantRole,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        UPDATE feed_participants SET role = $3 WHERE feed_id = $1 AND address = $2
        "#,
    )
    .bind(feed_id.to_uuid())
    .bind(address.as_str())
    .bind(role.to_string())
    .execute(&mut *txn)
    .await?;
    Ok(())
}
