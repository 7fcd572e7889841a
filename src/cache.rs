use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{Mutex, MutexGuard, RwLock},
    time::Instant,
};

use crate::models::{ContributorStats, RepoStats};

/// How long a stored snapshot stays fresh before a read forces a refresh.
pub const CACHE_DURATION: Duration = Duration::from_secs(15 * 60);

/// One statistic kind's slot: the latest complete payload and the time it was
/// stored. Empty until the first successful fetch; after that only ever
/// replaced in full, never partially mutated.
pub struct CacheSlot<T> {
    ttl: Duration,
    entry: RwLock<Option<(Arc<T>, Instant)>>,
    refresh: Mutex<()>,
}

impl<T> CacheSlot<T> {
    fn new(ttl: Duration) -> Self {
        Self { ttl, entry: RwLock::new(None), refresh: Mutex::new(()) }
    }

    /// Current payload, if one was ever stored. Never waits on a refresh.
    pub async fn get(&self) -> Option<Arc<T>> {
        self.entry.read().await.as_ref().map(|(payload, _)| payload.clone())
    }

    /// True if no payload was ever stored, or the stored one outlived the TTL.
    pub async fn is_stale(&self) -> bool {
        let entry = self.entry.read().await;
        match &*entry {
            Some((_, stored_at)) => stored_at.elapsed() > self.ttl,
            None => true,
        }
    }

    /// Replace the payload wholesale and stamp the current time.
    pub async fn put(&self, payload: T) -> Arc<T> {
        let payload = Arc::new(payload);
        *self.entry.write().await = Some((payload.clone(), Instant::now()));
        payload
    }

    /// Serializes refreshes of this slot so concurrent stale readers share one
    /// upstream sweep. Callers must re-check freshness after acquiring.
    pub async fn begin_refresh(&self) -> MutexGuard<'_, ()> {
        self.refresh.lock().await
    }
}

/// The two snapshot slots. They are fully independent: a write or in-flight
/// refresh on one kind never blocks the other.
pub struct StatsCache {
    pub repos: CacheSlot<Vec<RepoStats>>,
    pub contributors: CacheSlot<Vec<ContributorStats>>,
}

impl StatsCache {
    pub fn new() -> Self {
        Self::with_ttl(CACHE_DURATION)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self { repos: CacheSlot::new(ttl), contributors: CacheSlot::new(ttl) }
    }
}

impl Default for StatsCache {
    fn default() -> Self {
        Self::new()
    }
}
