use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use tokio::time::timeout;
use url::Url;

use crate::{
    cache::StatsCache,
    config::GitHubConfig,
    github::StatsSource,
    models::{ContributorStats, RepoStats, RepoStatsResponse},
    stats::{fetch_contributor_stats, fetch_repo_stats},
};

/// Upper bound on a single aggregation sweep. An upstream call that hangs past
/// this fails the attempt; the cache keeps whatever it held before.
const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Decides, per read, whether to trust the cache or sweep upstream again.
pub struct StatsService {
    org: String,
    github_url: Url,
    source: Arc<dyn StatsSource>,
    cache: StatsCache,
}

impl StatsService {
    pub fn new(source: Arc<dyn StatsSource>, config: &GitHubConfig) -> Arc<Self> {
        Arc::new(Self {
            org: config.org.clone(),
            github_url: config.base_url.clone(),
            source,
            cache: StatsCache::new(),
        })
    }

    /// Warm both slots without blocking startup. Each kind refreshes in its
    /// own detached task; a failure is logged and leaves the slot as-is.
    pub fn prefetch(self: &Arc<Self>) {
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(e) = service.repo_snapshot().await {
                tracing::error!("Failed to prefetch repository stats: {:?}", e);
            }
        });
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(e) = service.contributor_snapshot().await {
                tracing::error!("Failed to prefetch contributor stats: {:?}", e);
            }
        });
    }

    pub async fn repo_stats(&self) -> Result<RepoStatsResponse> {
        let snapshot = self.repo_snapshot().await?;
        Ok(RepoStatsResponse::new(&snapshot, self.github_url.clone()))
    }

    /// The cache always holds the full sorted sequence; a requested limit
    /// applies to a copy at read time.
    pub async fn contributors(&self, limit: usize) -> Result<Vec<ContributorStats>> {
        let snapshot = self.contributor_snapshot().await?;
        let mut contributors = snapshot.as_ref().clone();
        if limit > 0 && limit < contributors.len() {
            contributors.truncate(limit);
        }
        Ok(contributors)
    }

    async fn repo_snapshot(&self) -> Result<Arc<Vec<RepoStats>>> {
        if let Some(snapshot) = self.cache.repos.get().await {
            if !self.cache.repos.is_stale().await {
                return Ok(snapshot);
            }
        }
        let _guard = self.cache.repos.begin_refresh().await;
        // Another reader may have refreshed while we waited for the guard.
        if let Some(snapshot) = self.cache.repos.get().await {
            if !self.cache.repos.is_stale().await {
                return Ok(snapshot);
            }
        }
        let stats = timeout(FETCH_TIMEOUT, fetch_repo_stats(&self.source, &self.org))
            .await
            .map_err(|_| anyhow!("Timed out fetching repository stats"))??;
        Ok(self.cache.repos.put(stats).await)
    }

    async fn contributor_snapshot(&self) -> Result<Arc<Vec<ContributorStats>>> {
        if let Some(snapshot) = self.cache.contributors.get().await {
            if !self.cache.contributors.is_stale().await {
                return Ok(snapshot);
            }
        }
        let _guard = self.cache.contributors.begin_refresh().await;
        if let Some(snapshot) = self.cache.contributors.get().await {
            if !self.cache.contributors.is_stale().await {
                return Ok(snapshot);
            }
        }
        let contributors =
            timeout(FETCH_TIMEOUT, fetch_contributor_stats(&self.source, &self.org, 0))
                .await
                .map_err(|_| anyhow!("Timed out fetching contributor stats"))??;
        Ok(self.cache.contributors.put(contributors).await)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::atomic::Ordering,
    };

    use tokio::time::advance;

    use super::*;
    use crate::{
        cache::CACHE_DURATION,
        github::testing::{record, repo, MockSource},
    };

    fn config() -> GitHubConfig {
        GitHubConfig {
            token: String::new(),
            org: "example-org".to_string(),
            base_url: Url::parse("https://github.com/example-org/").unwrap(),
        }
    }

    fn mock_with_repo() -> MockSource {
        MockSource {
            repos: vec![repo("a", false, 10), repo("b", false, 20)],
            contributors: HashMap::from([
                ("a".to_string(), vec![record("alice", 50), record("bob", 30)]),
                ("b".to_string(), vec![record("carol", 40)]),
            ]),
            commits: HashMap::from([("a".to_string(), 5), ("b".to_string(), 7)]),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_reads_are_served_from_cache() {
        let mock = Arc::new(mock_with_repo());
        let service = StatsService::new(mock.clone(), &config());
        service.repo_stats().await.unwrap();
        service.repo_stats().await.unwrap();
        service.repo_stats().await.unwrap();
        assert_eq!(mock.listing_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_read_triggers_refresh() {
        let mock = Arc::new(mock_with_repo());
        let service = StatsService::new(mock.clone(), &config());
        service.repo_stats().await.unwrap();
        advance(CACHE_DURATION + Duration::from_secs(1)).await;
        service.repo_stats().await.unwrap();
        assert_eq!(mock.listing_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_leaves_cache_untouched() {
        let mock = Arc::new(mock_with_repo());
        let service = StatsService::new(mock.clone(), &config());
        let first = service.repo_stats().await.unwrap();

        mock.fail_listing.store(true, Ordering::SeqCst);
        advance(CACHE_DURATION + Duration::from_secs(1)).await;
        assert!(service.repo_stats().await.is_err());

        // Payload and timestamp both survive the failed sweep.
        let cached = service.cache.repos.get().await.unwrap();
        let mut cached_names = cached.iter().map(|r| r.name.clone()).collect::<Vec<_>>();
        cached_names.sort();
        let mut expected = first.repositories.iter().map(|r| r.name.clone()).collect::<Vec<_>>();
        expected.sort();
        assert_eq!(cached_names, expected);
        assert!(service.cache.repos.is_stale().await);
    }

    #[tokio::test(start_paused = true)]
    async fn early_read_sees_absent_and_errors_without_blocking() {
        let mock = Arc::new(MockSource::default());
        mock.fail_listing.store(true, Ordering::SeqCst);
        let service = StatsService::new(mock.clone(), &config());
        assert!(service.cache.repos.get().await.is_none());
        assert!(service.repo_stats().await.is_err());
        assert!(service.cache.repos.get().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_stale_reads_share_one_refresh() {
        let mut mock = mock_with_repo();
        mock.delay = Some(Duration::from_millis(50));
        let mock = Arc::new(mock);
        let service = StatsService::new(mock.clone(), &config());
        let (a, b) = tokio::join!(service.repo_stats(), service.repo_stats());
        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(mock.listing_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_times_out_without_corrupting_cache() {
        let mut mock = mock_with_repo();
        mock.delay = Some(FETCH_TIMEOUT + Duration::from_secs(60));
        let service = StatsService::new(Arc::new(mock), &config());
        assert!(service.repo_stats().await.is_err());
        assert!(service.cache.repos.get().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn contributor_limit_applies_to_a_copy() {
        let mock = Arc::new(mock_with_repo());
        let service = StatsService::new(mock.clone(), &config());

        let top = service.contributors(2).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].login, "alice");

        // The slot still holds the unlimited sequence and needs no re-fetch.
        let all = service.contributors(0).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(mock.listing_calls.load(Ordering::SeqCst), 1);
        let cached = service.cache.contributors.get().await.unwrap();
        assert_eq!(cached.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn repo_stats_response_totals_and_order() {
        let mock = Arc::new(mock_with_repo());
        let service = StatsService::new(mock, &config());
        let response = service.repo_stats().await.unwrap();
        assert_eq!(response.total_stars, 30);
        assert_eq!(response.total_contributors, 3);
        assert_eq!(response.total_commits, 12);
        // Presentation order is stars descending even though "a" lists first.
        assert_eq!(response.repositories[0].name, "b");
        assert_eq!(response.repositories[1].name, "a");
    }

    #[tokio::test(start_paused = true)]
    async fn kinds_do_not_share_refresh_state() {
        let mock = Arc::new(mock_with_repo());
        let service = StatsService::new(mock.clone(), &config());
        service.repo_stats().await.unwrap();
        // The contributor slot is still empty; a contributor read sweeps
        // upstream on its own while the repo slot keeps serving from cache.
        service.contributors(0).await.unwrap();
        service.repo_stats().await.unwrap();
        assert_eq!(mock.listing_calls.load(Ordering::SeqCst), 2);
    }
}
