//! Remote API surface
//!
//! This module knows the shape of the source-hosting REST API:
//! - Building endpoint URLs (search, releases, tags, commits, compare, quota)
//! - Typed records for every response the crawler consumes
//! - Normalizing those records into the rows the store persists

mod normalize;
mod types;

pub use normalize::{Commit, Release, Repository};
pub use types::{
    CommitDetail, CommitRecord, CompareRecord, GitActor, OwnerRecord, RateLimitRecord,
    RateRecord, ReleaseRecord, RepoRecord, RepositoryDescriptor, SearchPage, TagCommitRef,
    TagRecord,
};

use url::Url;

/// Builds endpoint URLs relative to the configured API root
///
/// Path segments are percent-encoded individually, so tags containing `/`
/// or other reserved characters stay inside a single segment.
#[derive(Debug, Clone)]
pub struct ApiEndpoints {
    base: Url,
}

impl ApiEndpoints {
    /// Creates a builder for the given API root (e.g. `https://api.github.com`)
    pub fn new(base_url: &str) -> Result<Self, url::ParseError> {
        let base = Url::parse(base_url)?;
        if base.cannot_be_a_base() {
            return Err(url::ParseError::RelativeUrlWithCannotBeABaseBase);
        }
        Ok(Self { base })
    }

    /// Paginated repository search, sorted by stars descending
    pub fn search(&self, qualifier: &str, per_page: u32, page: u32) -> Url {
        let mut url = self.join(&["search", "repositories"]);
        url.query_pairs_mut()
            .append_pair("q", qualifier)
            .append_pair("sort", "stars")
            .append_pair("order", "desc")
            .append_pair("per_page", &per_page.to_string())
            .append_pair("page", &page.to_string());
        url
    }

    /// Single repository lookup
    pub fn repository(&self, owner: &str, name: &str) -> Url {
        self.join(&["repos", owner, name])
    }

    pub fn releases(&self, owner: &str, name: &str, per_page: u32) -> Url {
        self.paged(&["repos", owner, name, "releases"], per_page)
    }

    pub fn tags(&self, owner: &str, name: &str, per_page: u32) -> Url {
        self.paged(&["repos", owner, name, "tags"], per_page)
    }

    pub fn commits(&self, owner: &str, name: &str, per_page: u32) -> Url {
        self.paged(&["repos", owner, name, "commits"], per_page)
    }

    /// Most recent commits reachable from `sha` (a tag, branch or commit)
    pub fn commits_at(&self, owner: &str, name: &str, sha: &str, per_page: u32) -> Url {
        let mut url = self.commits(owner, name, per_page);
        url.query_pairs_mut().append_pair("sha", sha);
        url
    }

    /// Commits reachable from `head` but not from `base`
    pub fn compare(&self, owner: &str, name: &str, base: &str, head: &str) -> Url {
        let range = format!("{}...{}", base, head);
        self.join(&["repos", owner, name, "compare", &range])
    }

    /// Quota status for the credential making the request
    pub fn rate_limit(&self) -> Url {
        self.join(&["rate_limit"])
    }

    fn paged(&self, segments: &[&str], per_page: u32) -> Url {
        let mut url = self.join(segments);
        url.query_pairs_mut()
            .append_pair("per_page", &per_page.to_string());
        url
    }

    fn join(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}
