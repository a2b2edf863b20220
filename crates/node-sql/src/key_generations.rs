use models::{Address, BlockIndex, FeedId, Generation, KeyGeneration, RotationTrigger};
use sqlx::types::{Json, Uuid};
use std::collections::BTreeMap;

#[derive(Debug, sqlx::FromRow)]
pub struct KeyGenerationRow {
    pub feed_id: Uuid,
    pub generation: i32,
    pub valid_from_block: i64,
    pub valid_to_block: Option<i64>,
    pub trigger: String,
    pub encrypted_keys: Json<BTreeMap<String, String>>,
}

impl TryFrom<KeyGenerationRow> for KeyGeneration {
    type Error = sqlx::Error;

    fn try_from(row: KeyGenerationRow) -> Result<Self, Self::Error> {
        let trigger: RotationTrigger = row.trigger.parse().map_err(crate::decode_err)?;
        Ok(KeyGeneration {
            feed_id: FeedId::from_uuid(row.feed_id),
            generation: row.generation as u32,
            valid_from_block: row.valid_from_block as u64,
            valid_to_block: row.valid_to_block.map(|b| b as u64),
            trigger,
            encrypted_keys: row
                .encrypted_keys
                .0
                .into_iter()
                .map(|(address, cipher)| (Address::from(address), cipher))
                .collect(),
        })
    }
}

/// All generations of a feed, ascending. The set is dense: [0, max].
pub async fn fetch_all(
    executor: impl sqlx::PgExecutor<'_>,
    feed_id: FeedId,
) -> sqlx::Result<Vec<KeyGeneration>> {
    let rows = sqlx::query_as::<_, KeyGenerationRow>(
        r#"
        SELECT feed_id, generation, valid_from_block, valid_to_block, trigger, encrypted_keys
        FROM key_generations
        WHERE feed_id = $1
        ORDER BY generation
        "#,
    )
    .bind(feed_id.to_uuid())
    .fetch_all(executor)
    .await?;
    rows.into_iter().map(KeyGeneration::try_from).collect()
}

pub async fn max_generation(
    executor: impl sqlx::PgExecutor<'_>,
    feed_id: FeedId,
) -> sqlx::Result<Option<Generation>> {
    let row: Option<(i32,)> = sqlx::query_as(
        r#"
        SELECT generation
        FROM key_generations
        WHERE feed_id = $1
        ORDER BY generation DESC
        LIMIT 1
        "#,
    )
    .bind(feed_id.to_uuid())
    .fetch_optional(executor)
    .await?;
    Ok(row.map(|(g,)| g as u32))
}

/// As `max_generation`, but takes a row lock on the newest generation,
/// serializing concurrent allocators at the database as a second line
/// of defense behind the per-feed rotation lock.
pub async fn max_generation_for_update(
    txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    feed_id: FeedId,
) -> sqlx::Result<Option<Generation>> {
    let row: Option<(i32,)> = sqlx::query_as(
        r#"
        SELECT generation
        FROM key_generations
        WHERE feed_id = $1
        ORDER BY generation DESC
        LIMIT 1
        FOR UPDATE
        "#,
    )
    .bind(feed_id.to_uuid())
    .fetch_optional(&mut *txn)
    .await?;
    Ok(row.map(|(g,)| g as u32))
}

pub async fn insert(
    txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    generation: &KeyGeneration,
) -> sqlx::Result<()> {
    let keys: BTreeMap<String, String> = generation
        .encrypted_keys
        .iter()
        .map(|(address, cipher)| (address.to_string(), cipher.clone()))
        .collect();
    sqlx::query(
        r#"
        INSERT INTO key_generations (feed_id, generation, valid_from_block, valid_to_block,
                                     trigger, encrypted_keys)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(generation.feed_id.to_uuid())
    .bind(generation.generation as i32)
    .bind(generation.valid_from_block as i64)
    .bind(generation.valid_to_block.map(|b| b as i64))
    .bind(generation.trigger.to_string())
    .bind(Json(keys))
    .execute(&mut *txn)
    .await?;
    Ok(())
}

/// Closes the superseded generation's validity window. The bound is
/// kept server-side only and never exposed to clients.
pub async fn close_generation(
    txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    feed_id: FeedId,
    generation: Generation,
    valid_to_block: BlockIndex,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        UPDATE key_generations
        SET valid_to_block = $3
        WHERE feed_id = $1 AND generation = $2
        "#,
    )
    .bind(feed_id.to_uuid())
    .bind(generation as i32)
    .bind(valid_to_block as i64)
    .execute(&mut *txn)
    .await?;
    Ok(())
}
