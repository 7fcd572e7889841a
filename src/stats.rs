use std::{
    collections::{hash_map::Entry, HashMap},
    sync::Arc,
};

use anyhow::{Context, Result};
use chrono::DateTime;
use tokio::{sync::Semaphore, task::JoinSet};

use crate::{
    colors::language_color,
    github::{ContributorRecord, RepoSummary, StatsSource},
    models::{ContributorStats, RepoStats},
};

/// Fan-out bound for per-repository upstream queries.
const MAX_CONCURRENT_REPOS: usize = 10;

/// Build the full repository snapshot for the organization. A failure to list
/// repositories is fatal; a failure of any per-repository sub-query only
/// zeroes that field on that repository.
pub async fn fetch_repo_stats(source: &Arc<dyn StatsSource>, org: &str) -> Result<Vec<RepoStats>> {
    let repos = source
        .list_org_repos(org)
        .await
        .context("Failed to list organization repositories")?;
    let public = repos.into_iter().filter(|repo| !repo.private).collect::<Vec<_>>();

    // Snapshot order is listing order; sub-query results are written back by
    // index once their tasks complete.
    let mut out = public.iter().map(base_repo_stats).collect::<Vec<_>>();

    let sem = Arc::new(Semaphore::new(MAX_CONCURRENT_REPOS));
    let mut set = JoinSet::new();
    for (index, repo) in public.iter().enumerate() {
        let sem = sem.clone();
        let source = source.clone();
        let org = org.to_string();
        let name = repo.name.clone();
        set.spawn(async move {
            let _permit = sem.acquire().await.unwrap();
            let (contributors, commits, topics) = tokio::join!(
                source.list_contributors(&org, &name),
                source.list_commits(&org, &name),
                source.list_topics(&org, &name),
            );
            (index, name, contributors, commits, topics)
        });
    }
    while let Some(result) = set.join_next().await {
        let (index, name, contributors, commits, topics) = match result {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Repository stats task failed: {:?}", e);
                continue;
            }
        };
        let stats = &mut out[index];
        match contributors {
            Ok(contributors) => stats.contributors = contributors.len() as u32,
            Err(e) => tracing::error!("Failed to fetch contributors for {}: {:?}", name, e),
        }
        match commits {
            Ok(commits) => stats.commits = commits.len() as u32,
            Err(e) => tracing::error!("Failed to fetch commits for {}: {:?}", name, e),
        }
        match topics {
            Ok(topics) => stats.topics = topics,
            Err(e) => tracing::error!("Failed to fetch topics for {}: {:?}", name, e),
        }
    }
    Ok(out)
}

/// Build the merged contributor snapshot. A repository whose contributor list
/// cannot be fetched contributes nothing; the sweep continues.
pub async fn fetch_contributor_stats(
    source: &Arc<dyn StatsSource>,
    org: &str,
    limit: usize,
) -> Result<Vec<ContributorStats>> {
    let repos = source
        .list_org_repos(org)
        .await
        .context("Failed to list organization repositories")?;
    let public = repos
        .into_iter()
        .filter(|repo| !repo.private)
        .map(|repo| repo.name)
        .collect::<Vec<_>>();

    let sem = Arc::new(Semaphore::new(MAX_CONCURRENT_REPOS));
    let mut set = JoinSet::new();
    for (index, name) in public.iter().cloned().enumerate() {
        let sem = sem.clone();
        let source = source.clone();
        let org = org.to_string();
        set.spawn(async move {
            let _permit = sem.acquire().await.unwrap();
            let result = source.list_contributors(&org, &name).await;
            (index, name, result)
        });
    }
    let mut fetched: Vec<Option<Vec<ContributorRecord>>> = vec![None; public.len()];
    while let Some(result) = set.join_next().await {
        let (index, name, result) = match result {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Contributor stats task failed: {:?}", e);
                continue;
            }
        };
        match result {
            Ok(records) => fetched[index] = Some(records),
            Err(e) => tracing::error!("Failed to fetch contributors for {}: {:?}", name, e),
        }
    }

    // Merge in listing order regardless of fetch completion order, so totals
    // and tie-breaks come out the same on every sweep.
    let mut merged: Vec<ContributorStats> = Vec::new();
    let mut by_login: HashMap<String, usize> = HashMap::new();
    for (records, repo_name) in fetched.into_iter().zip(&public) {
        let Some(records) = records else { continue };
        for record in records {
            if record.login.is_empty() || record.login.to_ascii_lowercase().contains("[bot]") {
                continue;
            }
            match by_login.entry(record.login.clone()) {
                Entry::Occupied(entry) => {
                    let stats = &mut merged[*entry.get()];
                    stats.contributions += record.contributions;
                    stats.repositories.push(repo_name.clone());
                }
                Entry::Vacant(entry) => {
                    entry.insert(merged.len());
                    merged.push(ContributorStats {
                        login: record.login,
                        avatar_url: record.avatar_url,
                        contributions: record.contributions,
                        repositories: vec![repo_name.clone()],
                    });
                }
            }
        }
    }

    // Stable sort keeps encounter order for equal contribution counts.
    merged.sort_by(|a, b| b.contributions.cmp(&a.contributions));
    if limit > 0 && limit < merged.len() {
        merged.truncate(limit);
    }
    Ok(merged)
}

fn base_repo_stats(repo: &RepoSummary) -> RepoStats {
    let language = repo.language.clone().unwrap_or_default();
    RepoStats {
        name: repo.name.clone(),
        stars: repo.stars,
        forks: repo.forks,
        contributors: 0,
        commits: 0,
        license: repo.license.clone().unwrap_or_default(),
        last_updated: repo.last_updated.unwrap_or(DateTime::UNIX_EPOCH),
        description: repo.description.clone().unwrap_or_default(),
        language_color: language_color(&language).to_string(),
        language,
        open_issues: repo.open_issues,
        default_branch: repo.default_branch.clone().unwrap_or_else(|| "main".to_string()),
        topics: Vec::new(),
    }
}
