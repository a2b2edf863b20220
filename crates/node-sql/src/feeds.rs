use models::{Address, BlockIndex, Feed, FeedId, FeedType};
use sqlx::types::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub struct FeedRow {
    pub feed_id: Uuid,
    pub feed_type: String,
    pub title: String,
    pub alias: String,
    pub description: Option<String>,
    pub is_public: bool,
    pub block_index: i64,
    pub created_at_block: i64,
}

impl TryFrom<FeedRow> for Feed {
    type Error = sqlx::Error;

    fn try_from(row: FeedRow) -> Result<Self, Self::Error> {
        let feed_type: FeedType = row.feed_type.parse().map_err(crate::decode_err)?;
        Ok(Feed {
            feed_id: FeedId::from_uuid(row.feed_id),
            feed_type,
            title: row.title,
            alias: row.alias,
            description: row.description,
            is_public: row.is_public,
            block_index: row.block_index as u64,
            created_at_block: row.created_at_block as u64,
        })
    }
}

pub async fn fetch_one(
    executor: impl sqlx::PgExecutor<'_>,
    feed_id: FeedId,
) -> sqlx::Result<Option<Feed>> {
    let row = sqlx::query_as::<_, FeedRow>(
        r#"
        SELECT feed_id, feed_type, title, alias, description, is_public, block_index, created_at_block
        FROM feeds
        WHERE feed_id = $1
        "#,
    )
    .bind(feed_id.to_uuid())
    .fetch_optional(executor)
    .await?;
    row.map(Feed::try_from).transpose()
}

pub async fn exists(executor: impl sqlx::PgExecutor<'_>, feed_id: FeedId) -> sqlx::Result<bool> {
    let exists: (bool,) =
        sqlx::query_as("SELECT EXISTS(SELECT 1 FROM feeds WHERE feed_id = $1)")
            .bind(feed_id.to_uuid())
            .fetch_one(executor)
            .await?;
    Ok(exists.0)
}

/// Feeds in which the address is an active participant (not departed,
/// not banned). Blocked members still see the feed.
pub async fn fetch_for_address(
    executor: impl sqlx::PgExecutor<'_>,
    address: &Address,
) -> sqlx::Result<Vec<Feed>> {
    let rows = sqlx::query_as::<_, FeedRow>(
        r#"
        SELECT f.feed_id, f.feed_type, f.title, f.alias, f.description, f.is_public,
               f.block_index, f.created_at_block
        FROM feeds f
        JOIN feed_participants p ON p.feed_id = f.feed_id
        WHERE p.address = $1
          AND p.left_at_block IS NULL
          AND p.role != 'banned'
        ORDER BY f.created_at_block
        "#,
    )
    .bind(address.as_str())
    .fetch_all(executor)
    .await?;
    rows.into_iter().map(Feed::try_from).collect()
}

pub async fn has_personal_feed(
    executor: impl sqlx::PgExecutor<'_>,
    address: &Address,
) -> sqlx::Result<bool> {
    let exists: (bool,) = sqlx::query_as(
        r#"
        SELECT EXISTS(
            SELECT 1
            FROM feeds f
            JOIN feed_participants p ON p.feed_id = f.feed_id
            WHERE f.feed_type = 'personal' AND p.address = $1
        )
        "#,
    )
    .bind(address.as_str())
    .fetch_one(executor)
    .await?;
    Ok(exists.0)
}

pub async fn insert(
    txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    feed: &Feed,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO feeds (feed_id, feed_type, title, alias, description, is_public,
                           block_index, created_at_block)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(feed.feed_id.to_uuid())
    .bind(feed.feed_type.to_string())
    .bind(&feed.title)
    .bind(&feed.alias)
    .bind(&feed.description)
    .bind(feed.is_public)
    .bind(feed.block_index as i64)
    .bind(feed.created_at_block as i64)
    .execute(&mut *txn)
    .await?;
    Ok(())
}

/// Advances the feed watermark. Monotone: a concurrent larger value
/// is never regressed.
pub async fn update_block_index(
    txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    feed_id: FeedId,
    block_index: BlockIndex,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        UPDATE feeds SET block_index = GREATEST(block_index, $2) WHERE feed_id = $1
        "#,
    )
    .bind(feed_id.to_uuid())
    .bind(block_index as i64)
    .execute(&mut *txn)
    .await?;
    Ok(())
}

pub async fn update_title(
    txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    feed_id: FeedId,
    title: &str,
    block_index: BlockIndex,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        UPDATE feeds
        SET title = $2, block_index = GREATEST(block_index, $3)
        WHERE feed_id = $1
        "#,
    )
    .bind(feed_id.to_uuid())
    .bind(title)
    .bind(block_index as i64)
    .execute(&mut *txn)
    .await?;
    Ok(())
}

pub async fn update_description(
    txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    feed_id: FeedId,
    description: &str,
    block_index: BlockIndex,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        UPDATE feeds
        SET description = $2, block_index = GREATEST(block_index, $3)
        WHERE feed_id = $1
        "#,
    )
    .bind(feed_id.to_uuid())
    .bind(description)
    .bind(block_index as i64)
    .execute(&mut *txn)
    .await?;
    Ok(())
}

/// Removes the feed and its dependent rows.
pub async fn delete(
    txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    feed_id: FeedId,
) -> sqlx::Result<()> {
    let feed_id = feed_id.to_uuid();
    sqlx::query("DELETE FROM key_generations WHERE feed_id = $1")
        .bind(feed_id)
        .execute(&mut *txn)
        .await?;
    sqlx::query("DELETE FROM feed_messages WHERE feed_id = $1")
        .bind(feed_id)
        .execute(&mut *txn)
        .await?;
    sqlx::query("DELETE FROM feed_participants WHERE feed_id = $1")
        .bind(feed_id)
        .execute(&mut *txn)
        .await?;
    sqlx::query("DELETE FROM feeds WHERE feed_id = $1")
        .bind(feed_id)
        .execute(&mut *txn)
        .await?;
    Ok(())
}
