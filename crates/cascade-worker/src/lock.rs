//! Distributed run locks.
//!
//! A lock's timeout is both the lease TTL and the acquisition deadline.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{WorkerError, WorkerResult};

const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// A held lock
#[async_trait]
pub trait Lease: Send + Sync {
    /// Key the lease holds
    fn key(&self) -> &str;

    /// Give the lock up; a lease that already expired and was taken over is left alone
    async fn release(self: Box<Self>) -> WorkerResult<()>;
}

/// Cluster-wide mutual exclusion keyed by string
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Wait up to `timeout` for the lock, holding it for at most `timeout`
    async fn acquire(&self, key: &str, timeout: Duration) -> WorkerResult<Box<dyn Lease>>;
}

fn lock_timeout(key: &str, timeout: Duration) -> WorkerError {
    WorkerError::LockTimeout {
        key: key.to_string(),
        timeout_ms: timeout.as_millis() as u64,
    }
}

#[derive(Debug)]
struct Holder {
    token: Uuid,
    expires_at: Instant,
}

/// Process-local lock
#[derive(Debug, Clone)]
pub struct InMemoryLock {
    holders: Arc<Mutex<HashMap<String, Holder>>>,
    retry_interval: Duration,
}

impl InMemoryLock {
    pub fn new() -> Self {
        Self::with_retry_interval(DEFAULT_RETRY_INTERVAL)
    }

    pub fn with_retry_interval(retry_interval: Duration) -> Self {
        Self {
            holders: Arc::new(Mutex::new(HashMap::new())),
            retry_interval,
        }
    }

    fn try_take(&self, key: &str, ttl: Duration) -> Option<Uuid> {
        let now = Instant::now();
        let mut holders = self.holders.lock();
        match holders.get(key) {
            Some(holder) if holder.expires_at > now => None,
            _ => {
                let token = Uuid::new_v4();
                holders.insert(
                    key.to_string(),
                    Holder {
                        token,
                        expires_at: now + ttl,
                    },
                );
                Some(token)
            }
        }
    }
}

impl Default for InMemoryLock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DistributedLock for InMemoryLock {
    async fn acquire(&self, key: &str, timeout: Duration) -> WorkerResult<Box<dyn Lease>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(token) = self.try_take(key, timeout) {
                debug!(key = %key, "Lock acquired");
                return Ok(Box::new(InMemoryLease {
                    key: key.to_string(),
                    token,
                    holders: Arc::clone(&self.holders),
                }));
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(lock_timeout(key, timeout));
            }
            tokio::time::sleep(self.retry_interval.min(deadline - now)).await;
        }
    }
}

struct InMemoryLease {
    key: String,
    token: Uuid,
    holders: Arc<Mutex<HashMap<String, Holder>>>,
}

#[async_trait]
impl Lease for InMemoryLease {
    fn key(&self) -> &str {
        &self.key
    }

    async fn release(self: Box<Self>) -> WorkerResult<()> {
        let mut holders = self.holders.lock();
        if holders.get(&self.key).map(|h| h.token) == Some(self.token) {
            holders.remove(&self.key);
            debug!(key = %self.key, "Lock released");
        }
        Ok(())
    }
}

/// Build the lock backend named by `lock_url`
pub fn create_lock(lock_url: &str) -> WorkerResult<Arc<dyn DistributedLock>> {
    if lock_url.starts_with("memory://") {
        info!("Using in-memory run lock");
        Ok(Arc::new(InMemoryLock::new()))
    } else if lock_url.starts_with("redis://") {
        #[cfg(feature = "redis")]
        {
            info!("Using Redis run lock");
            Ok(Arc::new(redis::RedisLock::new(lock_url)?))
        }

        #[cfg(not(feature = "redis"))]
        {
            Err(WorkerError::Configuration(
                "Redis lock requested but 'redis' feature not enabled".to_string(),
            ))
        }
    } else {
        Err(WorkerError::Configuration(format!("Unsupported lock URL: {}", lock_url)))
    }
}

// Redis implementation if the redis feature is enabled
#[cfg(feature = "redis")]
pub mod redis {
    use super::*;
    use ::redis::{Client, Script};

    const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

    fn lock_error(e: ::redis::RedisError) -> WorkerError {
        WorkerError::Lock(format!("Redis error: {}", e))
    }

    /// `SET NX PX` lock with compare-and-delete release
    pub struct RedisLock {
        client: Client,
        retry_interval: Duration,
    }

    impl RedisLock {
        pub fn new(redis_url: &str) -> WorkerResult<Self> {
            let client = Client::open(redis_url).map_err(lock_error)?;
            Ok(Self {
                client,
                retry_interval: DEFAULT_RETRY_INTERVAL,
            })
        }
    }

    #[async_trait]
    impl DistributedLock for RedisLock {
        async fn acquire(&self, key: &str, timeout: Duration) -> WorkerResult<Box<dyn Lease>> {
            let deadline = Instant::now() + timeout;
            let token = Uuid::new_v4().to_string();
            let mut conn = self.client.get_async_connection().await.map_err(lock_error)?;

            loop {
                let acquired: Option<String> = ::redis::cmd("SET")
                    .arg(key)
                    .arg(&token)
                    .arg("NX")
                    .arg("PX")
                    .arg(timeout.as_millis() as u64)
                    .query_async(&mut conn)
                    .await
                    .map_err(lock_error)?;

                if acquired.is_some() {
                    debug!(key = %key, "Redis lock acquired");
                    return Ok(Box::new(RedisLease {
                        key: key.to_string(),
                        token,
                        client: self.client.clone(),
                    }));
                }

                let now = Instant::now();
                if now >= deadline {
                    return Err(lock_timeout(key, timeout));
                }
                tokio::time::sleep(self.retry_interval.min(deadline - now)).await;
            }
        }
    }

    struct RedisLease {
        key: String,
        token: String,
        client: Client,
    }

    #[async_trait]
    impl Lease for RedisLease {
        fn key(&self) -> &str {
            &self.key
        }

        async fn release(self: Box<Self>) -> WorkerResult<()> {
            let mut conn = self.client.get_async_connection().await.map_err(lock_error)?;
            let _: i64 = Script::new(RELEASE_SCRIPT)
                .key(&self.key)
                .arg(&self.token)
                .invoke_async(&mut conn)
                .await
                .map_err(lock_error)?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_second_acquire_times_out() {
        let lock = InMemoryLock::with_retry_interval(Duration::from_millis(5));
        let _lease = lock.acquire("flow-run:run-1", Duration::from_secs(5)).await.unwrap();

        let err = match lock.acquire("flow-run:run-1", Duration::from_millis(30)).await {
            Err(e) => e,
            Ok(_) => panic!("lock acquired twice"),
        };
        assert!(matches!(err, WorkerError::LockTimeout { timeout_ms: 30, .. }));
    }

    #[tokio::test]
    async fn test_release_allows_next_holder() {
        let lock = InMemoryLock::new();
        let lease = lock.acquire("k", Duration::from_secs(5)).await.unwrap();
        assert_eq!(lease.key(), "k");
        lease.release().await.unwrap();

        assert!(lock.acquire("k", Duration::from_millis(10)).await.is_ok());
    }

    #[tokio::test]
    async fn test_expired_lease_is_taken_over() {
        let lock = InMemoryLock::with_retry_interval(Duration::from_millis(5));
        let stale = lock.acquire("k", Duration::from_millis(20)).await.unwrap();

        let fresh = lock.acquire("k", Duration::from_millis(200)).await.unwrap();
        // the stale holder must not free the new holder's lock
        stale.release().await.unwrap();
        assert!(lock.acquire("k", Duration::from_millis(10)).await.is_err());

        fresh.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_different_keys_are_independent() {
        let lock = InMemoryLock::new();
        let _a = lock.acquire("flow-run:a", Duration::from_secs(5)).await.unwrap();
        assert!(lock.acquire("flow-run:b", Duration::from_millis(10)).await.is_ok());
    }

    #[tokio::test]
    async fn test_racing_holders_are_serialized() {
        let lock = Arc::new(InMemoryLock::with_retry_interval(Duration::from_millis(1)));
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                tokio::spawn(async move {
                    let lease = lock.acquire("flow-run:shared", Duration::from_secs(5)).await.unwrap();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                    lease.release().await.unwrap();
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_create_lock_rejects_unknown_scheme() {
        assert!(create_lock("memory://local").is_ok());
        assert!(matches!(create_lock("zk://host"), Err(WorkerError::Configuration(_))));
    }
}
