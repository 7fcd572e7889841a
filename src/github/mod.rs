use std::pin::pin;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use octocrab::{params, Octocrab};
use serde::Deserialize;

use crate::config::GitHubConfig;

/// What the aggregator needs to know about one listed repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSummary {
    pub name: String,
    pub private: bool,
    pub stars: u32,
    pub forks: u32,
    pub license: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub language: Option<String>,
    pub open_issues: u32,
    pub default_branch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContributorRecord {
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub avatar_url: String,
    #[serde(default)]
    pub contributions: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub sha: String,
}

/// Upstream source of repository and contributor data. Abstract so the
/// aggregation and refresh logic can run against an in-memory fake in tests.
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn list_org_repos(&self, org: &str) -> Result<Vec<RepoSummary>>;
    async fn list_contributors(&self, org: &str, repo: &str) -> Result<Vec<ContributorRecord>>;
    async fn list_commits(&self, org: &str, repo: &str) -> Result<Vec<CommitRecord>>;
    async fn list_topics(&self, org: &str, repo: &str) -> Result<Vec<String>>;
}

#[derive(Clone)]
pub struct GitHub {
    pub client: Octocrab,
}

impl GitHub {
    pub async fn new(config: &GitHubConfig) -> Result<Self> {
        let client = Octocrab::builder()
            .personal_token(config.token.clone())
            .build()
            .context("Failed to create GitHub client")?;
        let profile = client.current().user().await.context("Failed to fetch current user")?;
        tracing::info!("Logged in as {}", profile.login);
        Ok(Self { client })
    }
}

impl From<octocrab::models::Repository> for RepoSummary {
    fn from(repo: octocrab::models::Repository) -> Self {
        Self {
            name: repo.name,
            private: repo.private.unwrap_or(false),
            stars: repo.stargazers_count.unwrap_or(0),
            forks: repo.forks_count.unwrap_or(0),
            license: repo.license.map(|license| license.name),
            last_updated: repo.updated_at,
            description: repo.description,
            language: repo.language.and_then(|value| value.as_str().map(str::to_owned)),
            open_issues: repo.open_issues_count.unwrap_or(0),
            default_branch: repo.default_branch,
        }
    }
}

#[derive(serde::Serialize)]
struct PageParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    per_page: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    page: Option<u32>,
}

#[derive(Deserialize)]
struct TopicsResponse {
    names: Vec<String>,
}

#[async_trait]
impl StatsSource for GitHub {
    async fn list_org_repos(&self, org: &str) -> Result<Vec<RepoSummary>> {
        let mut repos = Vec::new();
        let mut stream = pin!(
            self.client
                .orgs(org)
                .list_repos()
                .repo_type(params::repos::Type::All)
                .per_page(100)
                .send()
                .await?
                .into_stream(&self.client)
        );
        while let Some(repo) = stream.try_next().await? {
            repos.push(RepoSummary::from(repo));
        }
        Ok(repos)
    }

    async fn list_contributors(&self, org: &str, repo: &str) -> Result<Vec<ContributorRecord>> {
        let contributors: Vec<ContributorRecord> = self
            .client
            .get(
                format!("/repos/{org}/{repo}/contributors"),
                Some(&PageParams { per_page: Some(100), page: None }),
            )
            .await
            .with_context(|| format!("Failed to list contributors for {org}/{repo}"))?;
        Ok(contributors)
    }

    async fn list_commits(&self, org: &str, repo: &str) -> Result<Vec<CommitRecord>> {
        let page = self
            .client
            .repos(org, repo)
            .list_commits()
            .per_page(100)
            .send()
            .await
            .with_context(|| format!("Failed to list commits for {org}/{repo}"))?;
        Ok(page.items.into_iter().map(|commit| CommitRecord { sha: commit.sha }).collect())
    }

    async fn list_topics(&self, org: &str, repo: &str) -> Result<Vec<String>> {
        let topics: TopicsResponse = self
            .client
            .get(format!("/repos/{org}/{repo}/topics"), None::<&()>)
            .await
            .with_context(|| format!("Failed to list topics for {org}/{repo}"))?;
        Ok(topics.names)
    }
}
