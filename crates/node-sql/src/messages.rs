use chrono::{DateTime, Utc};
use models::{Address, FeedId, FeedMessage, MessageId};
use sqlx::types::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub struct MessageRow {
    pub message_id: Uuid,
    pub feed_id: Uuid,
    pub content: String,
    pub issuer_address: String,
    pub block_index: i64,
    pub timestamp: DateTime<Utc>,
    pub key_generation: Option<i32>,
    pub reply_to_id: Option<Uuid>,
    pub author_commitment: Option<String>,
}

impl From<MessageRow> for FeedMessage {
    fn from(row: MessageRow) -> Self {
        FeedMessage {
            message_id: MessageId::from_uuid(row.message_id),
            feed_id: FeedId::from_uuid(row.feed_id),
            content: row.content,
            issuer_address: Address::from(row.issuer_address),
            block_index: row.block_index as u64,
            timestamp: row.timestamp,
            key_generation: row.key_generation.map(|g| g as u32),
            reply_to_id: row.reply_to_id.map(MessageId::from_uuid),
            author_commitment: row.author_commitment,
        }
    }
}

/// Newest `limit` messages of a feed, newest first.
pub async fn fetch_tail(
    executor: impl sqlx::PgExecutor<'_>,
    feed_id: FeedId,
    limit: u32,
) -> sqlx::Result<Vec<FeedMessage>> {
    let rows = sqlx::query_as::<_, MessageRow>(
        r#"
        SELECT message_id, feed_id, content, issuer_address, block_index, timestamp,
               key_generation, reply_to_id, author_commitment
        FROM feed_messages
        WHERE feed_id = $1
        ORDER BY block_index DESC, timestamp DESC
        LIMIT $2
        "#,
    )
    .bind(feed_id.to_uuid())
    .bind(limit as i64)
    .fetch_all(executor)
    .await?;
    Ok(rows.into_iter().map(FeedMessage::from).collect())
}

pub async fn fetch_one(
    executor: impl sqlx::PgExecutor<'_>,
    message_id: MessageId,
) -> sqlx::Result<Option<FeedMessage>> {
    let row = sqlx::query_as::<_, MessageRow>(
        r#"
        SELECT message_id, feed_id, content, issuer_address, block_index, timestamp,
               key_generation, reply_to_id, author_commitment
        FROM feed_messages
        WHERE message_id = $1
        "#,
    )
    .bind(message_id.to_uuid())
    .fetch_optional(executor)
    .await?;
    Ok(row.map(FeedMessage::from))
}
