//! Typed records for the remote API responses
//!
//! Fields the crawler cannot do without are required; everything else is
//! optional so a sparse or partially-populated payload still deserializes.

use serde::{Deserialize, Serialize};

/// One page of `GET /search/repositories`
#[derive(Debug, Clone, Deserialize)]
pub struct SearchPage {
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub items: Vec<RepoRecord>,
}

/// Repository as returned by search and `GET /repos/{owner}/{repo}`
#[derive(Debug, Clone, Deserialize)]
pub struct RepoRecord {
    pub id: i64,
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub owner: Option<OwnerRecord>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub stargazers_count: i64,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OwnerRecord {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseRecord {
    #[serde(default)]
    pub tag_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagRecord {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub commit: Option<TagCommitRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagCommitRef {
    #[serde(default)]
    pub sha: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Commit as listed by `/commits` and inside a compare result
#[derive(Debug, Clone, Deserialize)]
pub struct CommitRecord {
    #[serde(default)]
    pub sha: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub commit: Option<CommitDetail>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitDetail {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub author: Option<GitActor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitActor {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

/// `GET /repos/{owner}/{repo}/compare/{base}...{head}`
#[derive(Debug, Clone, Deserialize)]
pub struct CompareRecord {
    #[serde(default)]
    pub commits: Vec<CommitRecord>,
}

/// `GET /rate_limit`
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitRecord {
    pub rate: RateRecord,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateRecord {
    pub limit: u32,
    pub remaining: u32,
    /// Unix timestamp (seconds) when the window resets
    pub reset: i64,
}

/// Repository descriptor handed from discovery to the workers
///
/// This is the queue payload; it is serialized as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryDescriptor {
    pub external_id: i64,
    pub owner: String,
    pub name: String,
    pub full_name: String,
    pub stars: i64,
    pub language: Option<String>,
    pub created_at: Option<String>,
    pub url: String,
}

impl RepositoryDescriptor {
    /// Builds a descriptor from a search/repository record
    ///
    /// The owner comes from `owner.login`, falling back to the prefix of
    /// `full_name`. Returns None when no owner can be determined.
    pub fn from_record(record: &RepoRecord) -> Option<Self> {
        let owner = record
            .owner
            .as_ref()
            .map(|o| o.login.clone())
            .or_else(|| {
                record
                    .full_name
                    .split_once('/')
                    .map(|(owner, _)| owner.to_string())
            })
            .filter(|o| !o.is_empty())?;

        let url = record
            .html_url
            .clone()
            .unwrap_or_else(|| format!("https://github.com/{}", record.full_name));

        Some(Self {
            external_id: record.id,
            owner,
            name: record.name.clone(),
            full_name: record.full_name.clone(),
            stars: record.stargazers_count,
            language: record.language.clone(),
            created_at: record.created_at.clone(),
            url,
        })
    }
}
