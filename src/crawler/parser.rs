//! HTML parser for ranking pages
//!
//! Ranking sites list repositories as site-relative `/owner/name` links.
//! This module pulls those paths out of a page in document order.

use scraper::{Html, Selector};
use std::collections::HashSet;

/// An `owner/name` pair scraped from a ranking page
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryPath {
    pub owner: String,
    pub name: String,
}

impl RepositoryPath {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Extracts repository paths from a ranking page
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="/owner/name">`: site-relative, exactly two `/`
///
/// **Exclude:**
/// - Absolute URLs and anything containing `:`
/// - Paths with a query string or fragment
/// - Paths with an empty segment
/// - Repeats of a path already seen on the page
///
/// # Arguments
///
/// * `html` - The HTML content to parse
///
/// # Returns
///
/// Paths in document order
///
/// # Example
///
/// ```
/// use star_harvest::crawler::extract_repository_paths;
///
/// let html = r#"<a href="/acme/widget">widget</a><a href="/about">About</a>"#;
/// let paths = extract_repository_paths(html);
/// assert_eq!(paths.len(), 1);
/// assert_eq!(paths[0].full_name(), "acme/widget");
/// ```
pub fn extract_repository_paths(html: &str) -> Vec<RepositoryPath> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    document
        .select(&selector)
        .filter_map(|element| element.value().attr("href"))
        .filter_map(parse_repository_href)
        .filter(|path| seen.insert(path.clone()))
        .collect()
}

/// Parses one href into a repository path, if it looks like one
fn parse_repository_href(href: &str) -> Option<RepositoryPath> {
    let href = href.trim();

    if !href.starts_with('/') || href.matches('/').count() != 2 {
        return None;
    }

    if href.contains(':') || href.contains('?') || href.contains('#') {
        return None;
    }

    let (owner, name) = href.trim_start_matches('/').split_once('/')?;
    if owner.is_empty() || name.is_empty() {
        return None;
    }

    Some(RepositoryPath {
        owner: owner.to_string(),
        name: name.to_string(),
    })
}
