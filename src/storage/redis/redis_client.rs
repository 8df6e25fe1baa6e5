use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, ErrorKind, RedisError, RedisResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::common::utils::{RetryPolicy, retry_with_backoff};

/// Single multiplexed Redis connection shared by clones. A connection that
/// fails at the transport level is dropped and re-established lazily by the
/// next call.
#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
    conn: Arc<Mutex<Option<MultiplexedConnection>>>,
    op_timeout: Duration,
    retry: RetryPolicy,
}

pub fn is_connection_error(e: &RedisError) -> bool {
    e.is_io_error() || e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal()
}

fn timeout_error() -> RedisError {
    RedisError::from((ErrorKind::IoError, "operation timed out"))
}

// Takes KEYS[1] for ARGV[1] when free or already ours; returns the holder.
const CLAIM_SCRIPT: &str = r"
local holder = redis.call('GET', KEYS[1])
if holder == false or holder == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
    return ARGV[1]
end
return holder
";

const RELEASE_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

/// SCAN MATCH pattern selecting every key that starts with `prefix`.
fn prefix_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

impl RedisClient {
    pub fn open(url: &str, op_timeout: Duration, retry: RetryPolicy) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            conn: Arc::new(Mutex::new(None)),
            op_timeout,
            retry,
        })
    }

    /// Opens the client and checks the server answers before returning.
    pub async fn connect(url: &str, op_timeout: Duration, retry: RetryPolicy) -> anyhow::Result<Self> {
        let client = Self::open(url, op_timeout, retry)?;
        client.ping().await?;
        log::debug!("Connected to Redis at {}", url);
        Ok(client)
    }

    pub fn client(&self) -> &redis::Client {
        &self.client
    }

    pub fn op_timeout(&self) -> Duration {
        self.op_timeout
    }

    async fn connection(&self) -> RedisResult<MultiplexedConnection> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = timeout(self.op_timeout, self.client.get_multiplexed_async_connection())
            .await
            .map_err(|_| timeout_error())??;
        log::debug!("Established Redis connection");
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn reset(&self) {
        let mut guard = self.conn.lock().await;
        if guard.take().is_some() {
            log::warn!("Dropped broken Redis connection");
        }
    }

    async fn run<T, F, Fut>(&self, f: F) -> RedisResult<T>
    where
        F: Fn(MultiplexedConnection) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let conn = match self.connection().await {
            Ok(conn) => conn,
            Err(e) => {
                self.reset().await;
                return Err(e);
            }
        };
        let result = match timeout(self.op_timeout, f(conn)).await {
            Ok(r) => r,
            Err(_) => Err(timeout_error()),
        };
        if let Err(e) = &result {
            if is_connection_error(e) {
                self.reset().await;
            }
        }
        result
    }

    async fn run_with_retry<T, F, Fut>(&self, op: &str, f: F) -> RedisResult<T>
    where
        F: Fn(MultiplexedConnection) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        retry_with_backoff(&self.retry, op, is_connection_error, || self.run(&f)).await
    }

    pub async fn ping(&self) -> RedisResult<()> {
        self.run_with_retry("PING", |mut conn| async move {
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    pub async fn get(&self, key: &str) -> RedisResult<Option<String>> {
        self.run_with_retry("GET", |mut conn| async move {
            let value: Option<String> = conn.get(key).await?;
            Ok(value)
        })
        .await
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> RedisResult<()> {
        self.run_with_retry("SET", |mut conn| async move {
            match ttl {
                Some(ttl) => {
                    let millis = ttl.as_millis().max(1) as u64;
                    let _: () = conn.pset_ex(key, value, millis).await?;
                }
                None => {
                    let _: () = conn.set(key, value).await?;
                }
            }
            Ok(())
        })
        .await
    }

    pub async fn del(&self, key: &str) -> RedisResult<usize> {
        self.run_with_retry("DEL", |mut conn| async move {
            let removed: usize = conn.del(key).await?;
            Ok(removed)
        })
        .await
    }

    /// Not retried: a lost reply would otherwise increment twice.
    pub async fn incr(&self, key: &str) -> RedisResult<u64> {
        self.run(|mut conn| async move {
            let value: u64 = conn.incr(key, 1u64).await?;
            Ok(value)
        })
        .await
    }

    /// Compare-and-set ownership claim, run as one script so two instances
    /// can't both take a free key. Retrying is safe: a repeat by the same
    /// owner only refreshes the expiry.
    pub async fn claim(&self, key: &str, owner: &str, ttl: Duration) -> RedisResult<String> {
        let script = redis::Script::new(CLAIM_SCRIPT);
        let script = &script;
        let millis = ttl.as_millis().max(1) as u64;
        self.run_with_retry("CLAIM", |mut conn| async move {
            let holder: String = script.key(key).arg(owner).arg(millis).invoke_async(&mut conn).await?;
            Ok(holder)
        })
        .await
    }

    pub async fn release(&self, key: &str, owner: &str) -> RedisResult<usize> {
        let script = redis::Script::new(RELEASE_SCRIPT);
        let script = &script;
        self.run_with_retry("RELEASE", |mut conn| async move {
            let removed: usize = script.key(key).arg(owner).invoke_async(&mut conn).await?;
            Ok(removed)
        })
        .await
    }

    /// Cursor-walks SCAN for keys under `prefix` and fetches their values
    /// with MGET. Keys that vanish between the two steps are skipped.
    pub async fn scan_prefix(&self, prefix: &str) -> RedisResult<Vec<(String, String)>> {
        let pattern = prefix_pattern(prefix);
        let pattern = pattern.as_str();
        self.run(|mut conn| async move {
            let mut cursor: u64 = 0;
            let mut keys: Vec<String> = Vec::new();
            loop {
                let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(pattern)
                    .arg("COUNT")
                    .arg(100)
                    .query_async(&mut conn)
                    .await?;
                keys.extend(batch);
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            keys.sort();
            keys.dedup();
            log::debug!("Scanned {} keys matching pattern '{}'", keys.len(), pattern);
            if keys.is_empty() {
                return Ok(Vec::new());
            }
            let values: Vec<Option<String>> = redis::cmd("MGET").arg(&keys).query_async(&mut conn).await?;
            Ok(keys
                .into_iter()
                .zip(values)
                .filter_map(|(k, v)| v.map(|v| (k, v)))
                .collect())
        })
        .await
    }

    pub async fn publish(&self, channel: &str, payload: &str) -> RedisResult<()> {
        self.run_with_retry("PUBLISH", |mut conn| async move {
            let receivers: i64 = conn.publish(channel, payload).await?;
            log::debug!("Published to {} ({} receivers)", channel, receivers);
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_pattern_escapes_glob_characters() {
        assert_eq!(prefix_pattern("fleet:server:"), "fleet:server:*");
        assert_eq!(prefix_pattern("a*b?[c]"), "a\\*b\\?\\[c\\]*");
    }
}
