use rand::{Rng, rng};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

pub fn jittered_delay(base: u64) -> u64 {
    let mut rng = rng();
    let jitter: f64 = rng.random_range(0.5..=1.5); // ±50% jitter
    (base as f64 * jitter) as u64
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn record_key(prefix: &str, server_id: &str) -> String {
    format!("{}:{}", prefix, server_id)
}

pub fn seq_key(prefix: &str, server_id: &str) -> String {
    format!("{}:{}:seq", prefix, server_id)
}

pub fn claim_key(prefix: &str, server_id: &str) -> String {
    format!("{}:{}:owner", prefix, server_id)
}

/// Ids are non-blank and never contain the key separator, so a record key
/// can't collide with another server's counter or claim key.
pub fn is_valid_server_id(server_id: &str) -> bool {
    !server_id.trim().is_empty() && !server_id.contains(':')
}

/// Server id for a record key, `None` for counter, claim and foreign keys.
pub fn server_id_from_key<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    let id = key.strip_prefix(prefix)?.strip_prefix(':')?;
    if !is_valid_server_id(id) {
        return None;
    }
    Some(id)
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> u64 {
        let exp = self
            .base_delay_ms
            .saturating_mul(1u64 << attempt.min(16));
        jittered_delay(exp.min(self.max_delay_ms))
    }
}

/// Runs `f` until it succeeds, `retryable` rejects the error, or the attempt
/// budget is spent. Returns the last error.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    op: &str,
    retryable: R,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt + 1 < attempts && retryable(&e) => {
                let delay = policy.delay_for(attempt);
                log::debug!(
                    "{} failed (attempt {}/{}): {}. Retrying in {}ms",
                    op,
                    attempt + 1,
                    attempts,
                    e,
                    delay
                );
                sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
            Err(e) => {
                log::warn!("{} failed after {} attempt(s): {}", op, attempt + 1, e);
                return Err(e);
            }
        }
    }
}
