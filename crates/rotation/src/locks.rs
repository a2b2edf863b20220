use crate::RotationError;
use models::FeedId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

/// Keyed async mutexes serializing rotations per feed. Generation
/// numbers stay dense and monotone because allocation only happens
/// under the feed's lock. Map entries are evicted once no guard or
/// waiter holds them.
#[derive(Default)]
pub struct FeedLocks {
    inner: Mutex<HashMap<FeedId, Arc<tokio::sync::Mutex<()>>>>,
}

impl FeedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the feed's lock, waiting at most `timeout`.
    pub async fn acquire(
        &self,
        feed_id: FeedId,
        timeout: Duration,
    ) -> Result<OwnedMutexGuard<()>, RotationError> {
        let lock = {
            let mut map = self.inner.lock().unwrap();
            map.retain(|_, l| Arc::strong_count(l) > 1);
            map.entry(feed_id)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        tokio::time::timeout(timeout, lock.lock_owned())
            .await
            .map_err(|_| RotationError::LockTimeout)
    }

    #[cfg(test)]
    fn live_entries(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}
