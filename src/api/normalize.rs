//! Row models built from API records
//!
//! Every conversion here is total: missing messages, authors or timestamps
//! become `None` rather than failing the whole repository.

use crate::api::types::{CommitRecord, ReleaseRecord, TagRecord};
use crate::api::RepositoryDescriptor;
use chrono::{DateTime, Utc};

/// A repository row
#[derive(Debug, Clone, PartialEq)]
pub struct Repository {
    pub external_id: i64,
    pub name: String,
    pub full_name: String,
    pub url: String,
    pub star_count: i64,
    pub language: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// A release row, either published or synthesized from a tag
#[derive(Debug, Clone, PartialEq)]
pub struct Release {
    pub name: Option<String>,
    pub tag: String,
    pub published_at: Option<DateTime<Utc>>,
    pub url: Option<String>,
    pub body: Option<String>,
}

/// A commit row
///
/// `release_tag` names the release this commit was collected under; it is
/// resolved to a release id at persist time.
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    pub sha: String,
    pub message: Option<String>,
    pub author_name: Option<String>,
    pub authored_at: Option<DateTime<Utc>>,
    pub url: Option<String>,
    pub release_tag: Option<String>,
}

impl Repository {
    pub fn from_descriptor(descriptor: &RepositoryDescriptor) -> Self {
        Self {
            external_id: descriptor.external_id,
            name: descriptor.name.clone(),
            full_name: descriptor.full_name.clone(),
            url: descriptor.url.clone(),
            star_count: descriptor.stars,
            language: descriptor.language.clone(),
            created_at: parse_timestamp(descriptor.created_at.as_deref()),
        }
    }
}

impl Release {
    /// Returns None for records without a tag name
    pub fn from_record(record: &ReleaseRecord) -> Option<Self> {
        let tag = non_empty(record.tag_name.as_deref())?;
        Some(Self {
            name: record.name.clone(),
            tag,
            published_at: parse_timestamp(record.published_at.as_deref()),
            url: record.html_url.clone(),
            body: record.body.clone(),
        })
    }

    /// Synthesizes a release for a bare tag
    pub fn from_tag(record: &TagRecord) -> Option<Self> {
        let tag = non_empty(record.name.as_deref())?;
        Some(Self {
            name: Some(tag.clone()),
            url: record.commit.as_ref().and_then(|c| c.url.clone()),
            tag,
            published_at: None,
            body: None,
        })
    }
}

impl Commit {
    /// Returns None for records without a SHA
    pub fn from_record(record: &CommitRecord, release_tag: Option<&str>) -> Option<Self> {
        let sha = non_empty(record.sha.as_deref())?;
        let detail = record.commit.as_ref();
        let author = detail.and_then(|d| d.author.as_ref());

        Some(Self {
            sha,
            message: detail.and_then(|d| d.message.clone()),
            author_name: author.and_then(|a| a.name.clone()),
            authored_at: parse_timestamp(author.and_then(|a| a.date.as_deref())),
            url: record.html_url.clone(),
            release_tag: release_tag.map(str::to_string),
        })
    }
}

/// Parses an RFC 3339 timestamp, treating malformed input as absent
pub fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn non_empty(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
