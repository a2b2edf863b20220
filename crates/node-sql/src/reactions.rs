use models::{FeedId, MessageId, ReactionTally};
use sqlx::types::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub struct TallyRow {
    pub message_id: Uuid,
    pub version: i64,
    pub total_count: i32,
    pub tally_c1: Vec<String>,
    pub tally_c2: Vec<String>,
}

impl From<TallyRow> for ReactionTally {
    fn from(row: TallyRow) -> Self {
        ReactionTally {
            message_id: MessageId::from_uuid(row.message_id),
            version: row.version as u64,
            total_count: row.total_count as u32,
            tally_c1: row.tally_c1,
            tally_c2: row.tally_c2,
        }
    }
}

/// Tallies of messages in the given feeds whose version advanced past
/// the caller's watermark.
pub async fn fetch_updated_since(
    executor: impl sqlx::PgExecutor<'_>,
    feed_ids: &[FeedId],
    since_version: u64,
) -> sqlx::Result<Vec<ReactionTally>> {
    let feed_ids: Vec<Uuid> = feed_ids.iter().map(|id| id.to_uuid()).collect();
    let rows = sqlx::query_as::<_, TallyRow>(
        r#"
        SELECT t.message_id, t.version, t.total_count, t.tally_c1, t.tally_c2
        FROM reaction_tallies t
        JOIN feed_messages m ON m.message_id = t.message_id
        WHERE m.feed_id = ANY($1) AND t.version > $2
        ORDER BY t.version
        "#,
    )
    .bind(&feed_ids)
    .bind(since_version as i64)
    .fetch_all(executor)
    .await?;
    Ok(rows.into_iter().map(ReactionTally::from).collect())
}
