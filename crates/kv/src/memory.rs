use super::{KvError, KvStore, Op};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
    List(VecDeque<String>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Hash(_) => "hash",
            Value::Set(_) => "set",
            Value::List(_) => "list",
        }
    }

    fn is_empty_collection(&self) -> bool {
        match self {
            Value::Str(_) => false,
            Value::Hash(h) => h.is_empty(),
            Value::Set(s) => s.is_empty(),
            Value::List(l) => l.is_empty(),
        }
    }
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

/// In-memory KvStore with Redis semantics: typed keys, lazy TTL
/// expiry, empty collections removed. Used by tests and embeddable as
/// a degraded single-process cache.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, Entry>>,
}

/// Applies Redis LRANGE/LTRIM index semantics to a list of `len`
/// elements, returning the inclusive [start, end) element range.
fn resolve_range(len: usize, start: i64, stop: i64) -> (usize, usize) {
    let len = len as i64;
    let clamp = |i: i64| -> i64 {
        if i < 0 {
            (len + i).max(0)
        } else {
            i.min(len)
        }
    };
    let start = clamp(start);
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || len == 0 {
        return (0, 0);
    }
    (start as usize, (stop + 1).min(len) as usize)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining TTL of a live key. `None` when the key is absent or
    /// has no expiry.
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        let mut map = self.inner.lock().unwrap();
        Self::purge(&mut map, key);
        map.get(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Deletes every key, as a FLUSHALL would.
    pub fn flush(&self) {
        self.inner.lock().unwrap().clear();
    }

    pub fn keys(&self) -> Vec<String> {
        let mut map = self.inner.lock().unwrap();
        let stale: Vec<String> = map
            .iter()
            .filter(|(_, e)| e.expires_at.is_some_and(|at| at <= Instant::now()))
            .map(|(k, _)| k.clone())
            .collect();
        for k in stale {
            map.remove(&k);
        }
        map.keys().cloned().collect()
    }

    fn purge(map: &mut HashMap<String, Entry>, key: &str) {
        if map
            .get(key)
            .is_some_and(|e| e.expires_at.is_some_and(|at| at <= Instant::now()))
        {
            map.remove(key);
        }
    }

    fn drop_if_empty(map: &mut HashMap<String, Entry>, key: &str) {
        if map.get(key).is_some_and(|e| e.value.is_empty_collection()) {
            map.remove(key);
        }
    }
}

fn mismatch(key: &str, value: &Value) -> KvError {
    KvError::TypeMismatch(format!("{key} holds a {}", value.type_name()))
}

macro_rules! typed {
    ($map:expr, $key:expr, $variant:ident) => {
        match $map.get_mut($key) {
            Some(Entry {
                value: Value::$variant(v),
                ..
            }) => Some(v),
            Some(entry) => return Err(mismatch($key, &entry.value)),
            None => None,
        }
    };
}

/// Inserts `key` if absent, preserving any existing expiry, and
/// returns the typed collection inside.
macro_rules! typed_or_default {
    ($map:expr, $key:expr, $variant:ident) => {{
        let entry = $map.entry($key.to_string()).or_insert_with(|| Entry {
            value: Value::$variant(Default::default()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::$variant(v) => v,
            other => return Err(mismatch($key, other)),
        }
    }};
}

fn apply(map: &mut HashMap<String, Entry>, op: Op) -> Result<(), KvError> {
    match op {
        Op::Set { key, value, ttl } => {
            map.insert(
                key,
                Entry {
                    value: Value::Str(value),
                    expires_at: ttl.map(|t| Instant::now() + t),
                },
            );
        }
        Op::Del { key } => {
            map.remove(&key);
        }
        Op::SAdd { key, members } => {
            let set = typed_or_default!(map, &key, Set);
            set.extend(members);
        }
        Op::SRem { key, members } => {
            if let Some(set) = typed!(map, &key, Set) {
                for m in &members {
                    set.remove(m);
                }
                MemoryStore::drop_if_empty(map, &key);
            }
        }
        Op::HSet { key, fields } => {
            let hash = typed_or_default!(map, &key, Hash);
            hash.extend(fields);
        }
        Op::HDel { key, fields } => {
            if let Some(hash) = typed!(map, &key, Hash) {
                for f in &fields {
                    hash.remove(f);
                }
                MemoryStore::drop_if_empty(map, &key);
            }
        }
        Op::LPush { key, values } => {
            let list = typed_or_default!(map, &key, List);
            for v in values {
                list.push_front(v);
            }
        }
        Op::RPush { key, values } => {
            let list = typed_or_default!(map, &key, List);
            for v in values {
                list.push_back(v);
            }
        }
        Op::LTrim { key, start, stop } => {
            if let Some(list) = typed!(map, &key, List) {
                let (lo, hi) = resolve_range(list.len(), start, stop);
                let kept: VecDeque<String> = list.iter().skip(lo).take(hi - lo).cloned().collect();
                *list = kept;
                MemoryStore::drop_if_empty(map, &key);
            }
        }
        Op::Expire { key, ttl } => {
            if let Some(entry) = map.get_mut(&key) {
                entry.expires_at = Some(Instant::now() + ttl);
            }
        }
    }
    Ok(())
}

#[async_trait::async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut map = self.inner.lock().unwrap();
        Self::purge(&mut map, key);
        match map.get(key) {
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(entry) => Err(mismatch(key, &entry.value)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        let mut map = self.inner.lock().unwrap();
        apply(
            &mut map,
            Op::Set {
                key: key.to_string(),
                value: value.to_string(),
                ttl,
            },
        )
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError> {
        let mut map = self.inner.lock().unwrap();
        Self::purge(&mut map, key);
        Ok(typed!(map, key, Hash).and_then(|h| h.get(field).cloned()))
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, KvError> {
        let mut map = self.inner.lock().unwrap();
        Self::purge(&mut map, key);
        Ok(typed!(map, key, Hash).cloned().unwrap_or_default())
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<String>>, KvError> {
        let mut map = self.inner.lock().unwrap();
        Self::purge(&mut map, key);
        let hash = typed!(map, key, Hash);
        Ok(fields
            .iter()
            .map(|f| hash.as_ref().and_then(|h| h.get(f).cloned()))
            .collect())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), KvError> {
        let mut map = self.inner.lock().unwrap();
        Self::purge(&mut map, key);
        apply(
            &mut map,
            Op::HSet {
                key: key.to_string(),
                fields: vec![(field.to_string(), value.to_string())],
            },
        )
    }

    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> Result<(), KvError> {
        let mut map = self.inner.lock().unwrap();
        Self::purge(&mut map, key);
        apply(
            &mut map,
            Op::HSet {
                key: key.to_string(),
                fields: fields.to_vec(),
            },
        )
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), KvError> {
        let mut map = self.inner.lock().unwrap();
        Self::purge(&mut map, key);
        apply(
            &mut map,
            Op::HDel {
                key: key.to_string(),
                fields: vec![field.to_string()],
            },
        )
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), KvError> {
        let mut map = self.inner.lock().unwrap();
        Self::purge(&mut map, key);
        apply(
            &mut map,
            Op::SAdd {
                key: key.to_string(),
                members: vec![member.to_string()],
            },
        )
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), KvError> {
        let mut map = self.inner.lock().unwrap();
        Self::purge(&mut map, key);
        apply(
            &mut map,
            Op::SRem {
                key: key.to_string(),
                members: vec![member.to_string()],
            },
        )
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError> {
        let mut map = self.inner.lock().unwrap();
        Self::purge(&mut map, key);
        let mut members: Vec<String> = typed!(map, key, Set)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        Ok(members)
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, KvError> {
        let mut map = self.inner.lock().unwrap();
        Self::purge(&mut map, key);
        Ok(typed!(map, key, Set).is_some_and(|s| s.contains(member)))
    }

    async fn scard(&self, key: &str) -> Result<u64, KvError> {
        let mut map = self.inner.lock().unwrap();
        Self::purge(&mut map, key);
        Ok(typed!(map, key, Set).map(|s| s.len() as u64).unwrap_or(0))
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, KvError> {
        let mut map = self.inner.lock().unwrap();
        Self::purge(&mut map, key);
        let list = match typed!(map, key, List) {
            Some(list) => list,
            None => return Ok(Vec::new()),
        };
        let (lo, hi) = resolve_range(list.len(), start, stop);
        Ok(list.iter().skip(lo).take(hi - lo).cloned().collect())
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        self.inner.lock().unwrap().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        let mut map = self.inner.lock().unwrap();
        Self::purge(&mut map, key);
        Ok(map.contains_key(key))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut map = self.inner.lock().unwrap();
        Self::purge(&mut map, key);
        match map.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn atomic(&self, ops: Vec<Op>) -> Result<(), KvError> {
        let mut map = self.inner.lock().unwrap();
        for op in ops {
            apply(&mut map, op)?;
        }
        Ok(())
    }

    async fn hset_if_greater(&self, key: &str, field: &str, value: u64) -> Result<bool, KvError> {
        let mut map = self.inner.lock().unwrap();
        Self::purge(&mut map, key);
        let hash = typed_or_default!(map, key, Hash);
        let current = hash.get(field).and_then(|v| v.parse::<u64>().ok());
        match current {
            Some(current) if value <= current => Ok(false),
            _ => {
                hash.insert(field.to_string(), value.to_string());
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn string_set_get_with_expiry() {
        let kv = MemoryStore::new();
        kv.set("k", "v", Some(Duration::from_secs(60))).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), Some("v".to_string()));
        assert!(kv.ttl_of("k").unwrap() <= Duration::from_secs(60));

        kv.set("k2", "v2", Some(Duration::from_nanos(1))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(kv.get("k2").await.unwrap(), None);
        assert!(!kv.exists("k2").await.unwrap());
    }

    #[tokio::test]
    async fn wrong_type_is_a_mismatch() {
        let kv = MemoryStore::new();
        kv.set("k", "v", None).await.unwrap();
        assert!(matches!(
            kv.smembers("k").await,
            Err(KvError::TypeMismatch(_))
        ));
        assert!(matches!(
            kv.hgetall("k").await,
            Err(KvError::TypeMismatch(_))
        ));
    }

    #[tokio::test]
    async fn sets_vanish_when_emptied() {
        let kv = MemoryStore::new();
        kv.sadd("s", "a").await.unwrap();
        kv.sadd("s", "b").await.unwrap();
        assert_eq!(kv.scard("s").await.unwrap(), 2);

        kv.srem("s", "a").await.unwrap();
        kv.srem("s", "b").await.unwrap();
        assert!(!kv.exists("s").await.unwrap());
    }

    #[tokio::test]
    async fn hmget_preserves_field_order() {
        let kv = MemoryStore::new();
        kv.hset("h", "a", "1").await.unwrap();
        kv.hset("h", "c", "3").await.unwrap();
        let got = kv
            .hmget("h", &["a".into(), "b".into(), "c".into()])
            .await
            .unwrap();
        assert_eq!(
            got,
            vec![Some("1".to_string()), None, Some("3".to_string())]
        );
    }

    #[tokio::test]
    async fn lpush_order_and_trim() {
        let kv = MemoryStore::new();
        // Last pushed value lands at the head.
        kv.atomic(vec![Op::LPush {
            key: "l".into(),
            values: vec!["a".into(), "b".into(), "c".into()],
        }])
        .await
        .unwrap();
        assert_eq!(kv.lrange("l", 0, -1).await.unwrap(), vec!["c", "b", "a"]);

        kv.atomic(vec![Op::LTrim {
            key: "l".into(),
            start: 0,
            stop: 1,
        }])
        .await
        .unwrap();
        assert_eq!(kv.lrange("l", 0, -1).await.unwrap(), vec!["c", "b"]);
    }

    #[tokio::test]
    async fn atomic_unit_applies_all_ops() {
        let kv = MemoryStore::new();
        kv.sadd("s", "stale").await.unwrap();
        kv.atomic(vec![
            Op::Del { key: "s".into() },
            Op::SAdd {
                key: "s".into(),
                members: vec!["f1".into(), "f2".into()],
            },
            Op::Expire {
                key: "s".into(),
                ttl: Duration::from_secs(300),
            },
        ])
        .await
        .unwrap();
        assert_eq!(kv.smembers("s").await.unwrap(), vec!["f1", "f2"]);
        assert!(kv.ttl_of("s").is_some());
    }

    #[tokio::test]
    async fn hset_if_greater_is_max_wins() {
        let kv = MemoryStore::new();
        assert!(kv.hset_if_greater("h", "f", 100).await.unwrap());
        assert!(!kv.hset_if_greater("h", "f", 50).await.unwrap());
        assert!(kv.hset_if_greater("h", "f", 150).await.unwrap());
        assert_eq!(kv.hget("h", "f").await.unwrap(), Some("150".to_string()));
    }

    #[test]
    fn lrange_index_arithmetic() {
        assert_eq!(resolve_range(5, 0, -1), (0, 5));
        assert_eq!(resolve_range(5, 1, 3), (1, 4));
        assert_eq!(resolve_range(5, -2, -1), (3, 5));
        assert_eq!(resolve_range(5, 3, 1), (0, 0));
        assert_eq!(resolve_range(0, 0, -1), (0, 0));
        assert_eq!(resolve_range(5, 0, 99), (0, 5));
    }
}
