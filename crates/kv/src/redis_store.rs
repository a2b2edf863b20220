use super::{KvError, KvStore, Op};
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::time::Duration;

/// Lua compare-and-set: write the field only when absent or smaller
/// than the proposed value. Runs atomically on the server, so
/// concurrent writers cannot regress the stored maximum.
const HSET_IF_GREATER: &str = r#"
local current = redis.call('HGET', KEYS[1], ARGV[1])
if current == false or tonumber(ARGV[2]) > tonumber(current) then
  redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
  return 1
end
return 0
"#;

/// KvStore adapter over a shared Redis connection. The
/// ConnectionManager re-establishes dropped connections and is cheap
/// to clone per operation.
pub struct RedisStore {
    manager: ConnectionManager,
    script: redis::Script,
}

impl RedisStore {
    pub fn new(manager: ConnectionManager) -> Self {
        Self {
            manager,
            script: redis::Script::new(HSET_IF_GREATER),
        }
    }

    pub async fn connect(url: &str) -> Result<Self, KvError> {
        let client = redis::Client::open(url)
            .map_err(|err| KvError::BackendUnavailable(err.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|err| KvError::BackendUnavailable(err.to_string()))?;
        Ok(Self::new(manager))
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

fn map_err(err: redis::RedisError) -> KvError {
    if err.kind() == redis::ErrorKind::TypeError {
        KvError::TypeMismatch(err.to_string())
    } else {
        KvError::BackendUnavailable(err.to_string())
    }
}

fn map_script_err(err: redis::RedisError) -> KvError {
    if err.kind() == redis::ErrorKind::TypeError {
        KvError::TypeMismatch(err.to_string())
    } else if err.is_io_error() {
        KvError::BackendUnavailable(err.to_string())
    } else {
        KvError::ScriptError(err.to_string())
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

fn apply(pipe: &mut redis::Pipeline, op: Op) {
    match op {
        Op::Set { key, value, ttl } => {
            match ttl {
                Some(ttl) => pipe.cmd("SET").arg(key).arg(value).arg("EX").arg(ttl_secs(ttl)),
                None => pipe.cmd("SET").arg(key).arg(value),
            }
            .ignore();
        }
        Op::Del { key } => {
            pipe.cmd("DEL").arg(key).ignore();
        }
        Op::SAdd { key, members } => {
            if !members.is_empty() {
                pipe.cmd("SADD").arg(key).arg(members).ignore();
            }
        }
        Op::SRem { key, members } => {
            if !members.is_empty() {
                pipe.cmd("SREM").arg(key).arg(members).ignore();
            }
        }
        Op::HSet { key, fields } => {
            if !fields.is_empty() {
                let cmd = pipe.cmd("HSET");
                cmd.arg(key);
                for (field, value) in fields {
                    cmd.arg(field).arg(value);
                }
                cmd.ignore();
            }
        }
        Op::HDel { key, fields } => {
            if !fields.is_empty() {
                pipe.cmd("HDEL").arg(key).arg(fields).ignore();
            }
        }
        Op::LPush { key, values } => {
            if !values.is_empty() {
                pipe.cmd("LPUSH").arg(key).arg(values).ignore();
            }
        }
        Op::RPush { key, values } => {
            if !values.is_empty() {
                pipe.cmd("RPUSH").arg(key).arg(values).ignore();
            }
        }
        Op::LTrim { key, start, stop } => {
            pipe.cmd("LTRIM").arg(key).arg(start).arg(stop).ignore();
        }
        Op::Expire { key, ttl } => {
            pipe.cmd("EXPIRE").arg(key).arg(ttl_secs(ttl)).ignore();
        }
    }
}

#[async_trait::async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(map_err)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl_secs(ttl));
        }
        cmd.query_async(&mut self.conn()).await.map_err(map_err)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError> {
        redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut self.conn())
            .await
            .map_err(map_err)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, KvError> {
        redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(map_err)
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<String>>, KvError> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        redis::cmd("HMGET")
            .arg(key)
            .arg(fields)
            .query_async(&mut self.conn())
            .await
            .map_err(map_err)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), KvError> {
        redis::cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value)
            .query_async::<()>(&mut self.conn())
            .await
            .map_err(map_err)
    }

    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> Result<(), KvError> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }
        cmd.query_async::<()>(&mut self.conn())
            .await
            .map_err(map_err)
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), KvError> {
        redis::cmd("HDEL")
            .arg(key)
            .arg(field)
            .query_async::<()>(&mut self.conn())
            .await
            .map_err(map_err)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), KvError> {
        redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query_async::<()>(&mut self.conn())
            .await
            .map_err(map_err)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), KvError> {
        redis::cmd("SREM")
            .arg(key)
            .arg(member)
            .query_async::<()>(&mut self.conn())
            .await
            .map_err(map_err)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError> {
        redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(map_err)
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, KvError> {
        redis::cmd("SISMEMBER")
            .arg(key)
            .arg(member)
            .query_async(&mut self.conn())
            .await
            .map_err(map_err)
    }

    async fn scard(&self, key: &str) -> Result<u64, KvError> {
        redis::cmd("SCARD")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(map_err)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, KvError> {
        redis::cmd("LRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut self.conn())
            .await
            .map_err(map_err)
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        redis::cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut self.conn())
            .await
            .map_err(map_err)
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(map_err)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        let set: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs(ttl))
            .query_async(&mut self.conn())
            .await
            .map_err(map_err)?;
        Ok(set == 1)
    }

    async fn atomic(&self, ops: Vec<Op>) -> Result<(), KvError> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in ops {
            apply(&mut pipe, op);
        }
        pipe.query_async::<()>(&mut self.conn())
            .await
            .map_err(map_err)
    }

    async fn hset_if_greater(&self, key: &str, field: &str, value: u64) -> Result<bool, KvError> {
        let mut invocation = self.script.key(key);
        invocation.arg(field).arg(value);
        let updated: i64 = invocation
            .invoke_async(&mut self.conn())
            .await
            .map_err(map_script_err)?;
        Ok(updated == 1)
    }
}
