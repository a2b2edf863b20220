use crate::metrics::ProjectionMetrics;
use kv::{KvStore, Namespace, Op};
use models::{BlockIndex, FeedId, FeedMessage};
use std::sync::Arc;
use std::time::Duration;

pub const MESSAGE_TAIL_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const MESSAGE_TAIL_LEN: usize = 100;

/// Bounded newest-first list of a feed's messages:
/// `feed:{feedId}:messages` -> [ JSON(FeedMessage), ... ].
pub struct MessageTailCache {
    kv: Arc<dyn KvStore>,
    ns: Namespace,
    metrics: ProjectionMetrics,
}

impl MessageTailCache {
    pub fn new(kv: Arc<dyn KvStore>, ns: Namespace) -> Self {
        Self {
            kv,
            ns,
            metrics: ProjectionMetrics::new("message_tail"),
        }
    }

    pub fn metrics(&self) -> &ProjectionMetrics {
        &self.metrics
    }

    fn key(&self, feed_id: FeedId) -> String {
        self.ns.key(&format!("feed:{feed_id}:messages"))
    }

    /// Prepends a freshly finalized message, re-bounds the list, and
    /// refreshes the TTL, atomically.
    pub async fn add(&self, feed_id: FeedId, message: &FeedMessage) {
        let key = self.key(feed_id);
        let value = match serde_json::to_string(message) {
            Ok(value) => value,
            Err(err) => {
                self.metrics.write_error();
                tracing::warn!(%err, "message failed to serialize");
                return;
            }
        };
        let result = self
            .kv
            .atomic(vec![
                Op::LPush {
                    key: key.clone(),
                    values: vec![value],
                },
                Op::LTrim {
                    key: key.clone(),
                    start: 0,
                    stop: MESSAGE_TAIL_LEN as i64 - 1,
                },
                Op::Expire {
                    key,
                    ttl: MESSAGE_TAIL_TTL,
                },
            ])
            .await;
        match result {
            Ok(()) => self.metrics.write(),
            Err(err) => {
                self.metrics.write_error();
                tracing::warn!(%err, "message-tail add failed");
            }
        }
    }

    /// The cached tail, newest first, optionally filtered to messages
    /// past the caller's block watermark. `None` on miss or backend
    /// error; individual malformed entries are skipped, not fatal.
    pub async fn get(&self, feed_id: FeedId, since: Option<BlockIndex>) -> Option<Vec<FeedMessage>> {
        let key = self.key(feed_id);
        let result = async {
            if !self.kv.exists(&key).await? {
                return Ok(None);
            }
            let raw = self.kv.lrange(&key, 0, -1).await?;
            let mut messages = Vec::with_capacity(raw.len());
            for value in &raw {
                match serde_json::from_str::<FeedMessage>(value) {
                    Ok(message) => messages.push(message),
                    Err(err) => {
                        tracing::debug!(%key, %err, "skipping malformed cached message");
                    }
                }
            }
            if let Some(since) = since {
                messages.retain(|m| m.block_index > since);
            }
            Ok::<_, kv::KvError>(Some(messages))
        }
        .await;

        match result {
            Ok(Some(messages)) => {
                self.metrics.hit();
                Some(messages)
            }
            Ok(None) => {
                self.metrics.miss();
                None
            }
            Err(err) => {
                self.metrics.read_error();
                tracing::warn!(%err, "message-tail read failed; treating as miss");
                None
            }
        }
    }

    /// Rebuilds the tail from a database read. Messages are pushed in
    /// ascending (blockIndex, timestamp) order so the newest ends at
    /// the head, then the list is bounded to the newest
    /// [`MESSAGE_TAIL_LEN`].
    pub async fn populate(&self, feed_id: FeedId, messages: &[FeedMessage]) {
        let key = self.key(feed_id);
        let mut ascending: Vec<&FeedMessage> = messages.iter().collect();
        ascending.sort_by_key(|m| m.tail_key());

        let mut values = Vec::with_capacity(ascending.len());
        for message in ascending {
            match serde_json::to_string(message) {
                Ok(value) => values.push(value),
                Err(err) => {
                    self.metrics.write_error();
                    tracing::warn!(%err, "message failed to serialize");
                    return;
                }
            }
        }

        let mut ops = vec![Op::Del { key: key.clone() }];
        if !values.is_empty() {
            ops.push(Op::LPush {
                key: key.clone(),
                values,
            });
            ops.push(Op::LTrim {
                key: key.clone(),
                start: 0,
                stop: MESSAGE_TAIL_LEN as i64 - 1,
            });
            ops.push(Op::Expire {
                key,
                ttl: MESSAGE_TAIL_TTL,
            });
        }
        match self.kv.atomic(ops).await {
            Ok(()) => self.metrics.write(),
            Err(err) => {
                self.metrics.write_error();
                tracing::warn!(%err, "message-tail populate failed");
            }
        }
    }

    pub async fn invalidate(&self, feed_id: FeedId) {
        let key = self.key(feed_id);
        match self.kv.del(&key).await {
            Ok(()) => self.metrics.write(),
            Err(err) => {
                self.metrics.write_error();
                tracing::warn!(%err, "message-tail invalidate failed");
            }
        }
    }
}
