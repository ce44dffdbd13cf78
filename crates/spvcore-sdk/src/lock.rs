use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Lock key serializing work on one owner.
pub fn xpub_lock_key(xpub_id: &str) -> String {
    format!("lock-xpub-{xpub_id}")
}

/// A mutual-exclusion service shared by every engine instance that touches
/// the same ledger. Locks expire after their TTL so a crashed holder cannot
/// block an owner forever.
pub trait Locker: Send + Sync {
    /// Take `key` if it is free or expired. Never blocks.
    fn try_lock(&self, key: &str, ttl: Duration) -> bool;
    fn release(&self, key: &str);
}

/// In-process [`Locker`].
#[derive(Debug, Default)]
pub struct MemoryLocker {
    held: Mutex<HashMap<String, Instant>>,
}

impl MemoryLocker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Locker for MemoryLocker {
    fn try_lock(&self, key: &str, ttl: Duration) -> bool {
        let Ok(mut held) = self.held.lock() else {
            return false;
        };
        let now = Instant::now();
        match held.get(key) {
            Some(expires) if *expires > now => false,
            _ => {
                held.insert(key.to_string(), now + ttl);
                true
            }
        }
    }

    fn release(&self, key: &str) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(key);
        }
    }
}

/// Releases its key when dropped.
pub struct LockGuard {
    locker: Arc<dyn Locker>,
    key: String,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("key", &self.key).finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.locker.release(&self.key);
    }
}

/// Poll for `key` until it is taken or `wait` elapses.
pub async fn acquire_wait_lock(
    locker: &Arc<dyn Locker>,
    key: &str,
    ttl: Duration,
    wait: Duration,
) -> Result<LockGuard> {
    let deadline = Instant::now() + wait;
    loop {
        if locker.try_lock(key, ttl) {
            return Ok(LockGuard {
                locker: Arc::clone(locker),
                key: key.to_string(),
            });
        }
        if Instant::now() >= deadline {
            return Err(Error::LockTimeout(key.to_string()));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_lock_can_be_taken() {
        let locker = MemoryLocker::new();
        assert!(locker.try_lock("k", Duration::from_millis(0)));
        assert!(locker.try_lock("k", Duration::from_secs(30)));
        assert!(!locker.try_lock("k", Duration::from_secs(30)));
        locker.release("k");
        assert!(locker.try_lock("k", Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn guard_releases_on_drop() {
        let locker: Arc<dyn Locker> = Arc::new(MemoryLocker::new());
        let ttl = Duration::from_secs(30);
        {
            let guard = acquire_wait_lock(&locker, "lock-xpub-a", ttl, Duration::from_millis(50))
                .await
                .unwrap();
            assert_eq!(guard.key(), "lock-xpub-a");
            let second =
                acquire_wait_lock(&locker, "lock-xpub-a", ttl, Duration::from_millis(50)).await;
            assert!(matches!(second, Err(Error::LockTimeout(_))));
        }
        assert!(locker.try_lock("lock-xpub-a", ttl));
    }

    #[tokio::test]
    async fn waiter_gets_lock_after_release() {
        let locker: Arc<dyn Locker> = Arc::new(MemoryLocker::new());
        let ttl = Duration::from_secs(30);
        let guard = acquire_wait_lock(&locker, "k", ttl, Duration::ZERO)
            .await
            .unwrap();
        let waiter = {
            let locker = Arc::clone(&locker);
            tokio::spawn(async move {
                acquire_wait_lock(&locker, "k", ttl, Duration::from_secs(2))
                    .await
                    .map(|_| ())
            })
        };
        tokio::time::sleep(Duration::from_millis(60)).await;
        drop(guard);
        assert!(waiter.await.unwrap().is_ok());
    }
}
