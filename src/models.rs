use chrono::{DateTime, Utc};
use serde::Serialize;
use url::Url;

/// One repository's snapshot. Replaced wholesale on every refresh.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct RepoStats {
    pub name: String,
    pub stars: u32,
    pub forks: u32,
    pub contributors: u32,
    pub commits: u32,
    pub license: String,
    pub last_updated: DateTime<Utc>,
    pub description: String,
    pub language: String,
    pub language_color: String,
    pub open_issues: u32,
    pub default_branch: String,
    pub topics: Vec<String>,
}

/// One person's contributions aggregated across the organization.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ContributorStats {
    pub login: String,
    pub avatar_url: String,
    pub contributions: u64,
    pub repositories: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoStatsResponse {
    pub repositories: Vec<RepoStats>,
    pub total_stars: u64,
    pub total_forks: u64,
    pub total_contributors: u64,
    pub total_commits: u64,
    pub github_url: Url,
}

impl RepoStatsResponse {
    /// Build the outward response from the current snapshot. Totals are
    /// recomputed on every read and the repository list is ordered by stars
    /// descending; neither is ever stored back into the cache.
    pub fn new(snapshot: &[RepoStats], github_url: Url) -> Self {
        let mut repositories = snapshot.to_vec();
        repositories.sort_by(|a, b| b.stars.cmp(&a.stars));
        Self {
            total_stars: snapshot.iter().map(|r| u64::from(r.stars)).sum(),
            total_forks: snapshot.iter().map(|r| u64::from(r.forks)).sum(),
            total_contributors: snapshot.iter().map(|r| u64::from(r.contributors)).sum(),
            total_commits: snapshot.iter().map(|r| u64::from(r.commits)).sum(),
            repositories,
            github_url,
        }
    }
}
