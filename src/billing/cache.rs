use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::error::Result;

/// Injected time source so cache freshness is testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// 缓存 5 分钟
pub const RATIO_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

struct Slot {
    value: i64,
    expires_at: Instant,
}

/// Time-bounded cache for the credit-to-quota conversion ratio.
///
/// Reads take the shared lock; an expired slot upgrades to the exclusive
/// lock and re-checks freshness before fetching, so N concurrent readers
/// trigger at most one network fetch. A non-positive value is never trusted,
/// so a misconfigured ledger is retried on the next read instead of being
/// cached for the full TTL.
pub struct RatioCache {
    slot: RwLock<Option<Slot>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl RatioCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            slot: RwLock::new(None),
            ttl,
            clock,
        }
    }

    fn fresh(&self, slot: &Option<Slot>) -> Option<i64> {
        slot.as_ref()
            .filter(|s| s.value > 0 && self.clock.now() < s.expires_at)
            .map(|s| s.value)
    }

    pub async fn get_or_refresh<F, Fut>(&self, fetch: F) -> Result<i64>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<i64>>,
    {
        // 乐观读
        {
            let slot = self.slot.read().await;
            if let Some(value) = self.fresh(&slot) {
                return Ok(value);
            }
        }

        // 写锁下双重检查，防止并发重复拉取
        let mut slot = self.slot.write().await;
        if let Some(value) = self.fresh(&slot) {
            return Ok(value);
        }

        let value = fetch().await?;
        *slot = Some(Slot {
            value,
            expires_at: self.clock.now() + self.ttl,
        });
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ManualClock {
        now: Mutex<Instant>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                now: Mutex::new(Instant::now()),
            }
        }

        fn advance(&self, by: Duration) {
            let mut now = self.now.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.now.lock().unwrap()
        }
    }

    #[tokio::test]
    async fn concurrent_readers_trigger_a_single_fetch() {
        let cache = Arc::new(RatioCache::new(RATIO_CACHE_TTL, Arc::new(SystemClock)));
        let fetches = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let fetches = fetches.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_refresh(|| async move {
                        fetches.fetch_add(1, Ordering::SeqCst);
                        // let other readers pile up on the lock
                        tokio::task::yield_now().await;
                        Ok(500_000)
                    })
                    .await
                    .unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 500_000);
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_value_is_refetched() {
        let clock = Arc::new(ManualClock::new());
        let cache = RatioCache::new(RATIO_CACHE_TTL, clock.clone());
        let fetches = AtomicUsize::new(0);
        let fetches = &fetches;

        for _ in 0..3 {
            let value = cache
                .get_or_refresh(|| async move {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await
                .unwrap();
            assert_eq!(value, 7);
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        clock.advance(RATIO_CACHE_TTL + Duration::from_secs(1));
        cache
            .get_or_refresh(|| async move {
                fetches.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            })
            .await
            .unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_positive_values_are_not_cached() {
        let cache = RatioCache::new(RATIO_CACHE_TTL, Arc::new(SystemClock));
        let fetches = AtomicUsize::new(0);
        let fetches = &fetches;

        for _ in 0..2 {
            let _ = cache
                .get_or_refresh(|| async move {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Ok(0)
                })
                .await;
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fetch_failure_leaves_cache_empty() {
        let cache = RatioCache::new(RATIO_CACHE_TTL, Arc::new(SystemClock));
        let err = cache
            .get_or_refresh(|| async move {
                Err(crate::error::GatewayError::Config("ledger down".into()))
            })
            .await;
        assert!(err.is_err());

        let value = cache.get_or_refresh(|| async move { Ok(9) }).await.unwrap();
        assert_eq!(value, 9);
    }
}
