use chrono::{DateTime, Utc};
use models::{Address, BlockIndex, FeedId, ReadPosition};
use sqlx::types::Uuid;

pub async fn fetch_all(
    executor: impl sqlx::PgExecutor<'_>,
    address: &Address,
) -> sqlx::Result<Vec<ReadPosition>> {
    let rows = sqlx::query_as::<_, (Uuid, i64, DateTime<Utc>)>(
        r#"
        SELECT feed_id, last_read_block, updated_at
        FROM read_positions
        WHERE address = $1
        "#,
    )
    .bind(address.as_str())
    .fetch_all(executor)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(feed_id, block, updated_at)| ReadPosition {
            address: address.clone(),
            feed_id: FeedId::from_uuid(feed_id),
            last_read_block_index: block as u64,
            updated_at,
        })
        .collect())
}

/// MAX-wins upsert: the stored watermark only ever advances. Returns
/// whether this call advanced it.
pub async fn upsert_max(
    executor: impl sqlx::PgExecutor<'_>,
    address: &Address,
    feed_id: FeedId,
    block_index: BlockIndex,
) -> sqlx::Result<bool> {
    let advanced: Option<(i64,)> = sqlx::query_as(
        r#"
        INSERT INTO read_positions (address, feed_id, last_read_block, updated_at)
        VALUES ($1, $2, $3, NOW())
        ON CONFLICT (address, feed_id) DO UPDATE
            SET last_read_block = EXCLUDED.last_read_block, updated_at = NOW()
            WHERE read_positions.last_read_block < EXCLUDED.last_read_block
        RETURNING last_read_block
        "#,
    )
    .bind(address.as_str())
    .bind(feed_id.to_uuid())
    .bind(block_index as i64)
    .fetch_optional(executor)
    .await?;
    Ok(advanced.is_some())
}
