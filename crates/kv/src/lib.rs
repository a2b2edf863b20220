use std::collections::HashMap;
use std::time::Duration;

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("key-value backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("wrong value type stored at key: {0}")]
    TypeMismatch(String),
    #[error("server-side script failed: {0}")]
    ScriptError(String),
}

/// One step of an atomic multi-op unit. The unit executes with no
/// interleaved observer: either a MULTI/EXEC pipeline (Redis) or a
/// single critical section (memory adapter).
#[derive(Debug, Clone)]
pub enum Op {
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    Del {
        key: String,
    },
    SAdd {
        key: String,
        members: Vec<String>,
    },
    SRem {
        key: String,
        members: Vec<String>,
    },
    HSet {
        key: String,
        fields: Vec<(String, String)>,
    },
    HDel {
        key: String,
        fields: Vec<String>,
    },
    /// Values are pushed in argument order, so the LAST value lands at
    /// the head of the list.
    LPush {
        key: String,
        values: Vec<String>,
    },
    RPush {
        key: String,
        values: Vec<String>,
    },
    /// Retains the inclusive range [start, stop]; negative indices
    /// count from the tail.
    LTrim {
        key: String,
        start: i64,
        stop: i64,
    },
    Expire {
        key: String,
        ttl: Duration,
    },
}

/// Capability surface over the external key-value store. All keys are
/// caller-namespaced (see [`Namespace`]); all values are numeric text,
/// UTF-8 JSON, or opaque printable bytes.
///
/// Every method is a suspension point. Callers treat any error as
/// "skip cache" and continue against the database.
#[async_trait::async_trait]
pub trait KvStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, KvError>;
    /// One round-trip; the result preserves the order of `fields`,
    /// with `None` marking absent fields.
    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<String>>, KvError>;
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), KvError>;
    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> Result<(), KvError>;
    async fn hdel(&self, key: &str, field: &str) -> Result<(), KvError>;

    async fn sadd(&self, key: &str, member: &str) -> Result<(), KvError>;
    async fn srem(&self, key: &str, member: &str) -> Result<(), KvError>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError>;
    async fn sismember(&self, key: &str, member: &str) -> Result<bool, KvError>;
    async fn scard(&self, key: &str) -> Result<u64, KvError>;

    /// Inclusive range with Redis index semantics.
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, KvError>;

    async fn del(&self, key: &str) -> Result<(), KvError>;
    async fn exists(&self, key: &str) -> Result<bool, KvError>;
    /// Returns false when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError>;

    /// Enqueue-then-execute multi-op unit.
    async fn atomic(&self, ops: Vec<Op>) -> Result<(), KvError>;

    /// Scripted compare-and-set over a numeric hash field: writes
    /// `value` only when the field is absent or currently smaller.
    /// Returns whether the write happened. This is the port's only
    /// server-side scripted evaluation.
    async fn hset_if_greater(&self, key: &str, field: &str, value: u64) -> Result<bool, KvError>;
}

/// Per-node instance namespace prepended to every key.
#[derive(Debug, Clone)]
pub struct Namespace {
    prefix: String,
}

impl Namespace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn key(&self, suffix: &str) -> String {
        if self.prefix.is_empty() {
            suffix.to_string()
        } else {
            format!("{}:{}", self.prefix, suffix)
        }
    }
}
