//! Article data structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw content of a fetched page.
///
/// `url` is the final URL after redirects, which is what all downstream
/// stages treat as the article link.
#[derive(Debug, Clone)]
pub struct RawPage {
    pub url: String,
    pub body: String,
}

/// An article extracted from a page, before identity resolution.
///
/// Carries no identity; the store assigns one if the resolver decides the
/// candidate is new.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleCandidate {
    /// Full URL of the article page
    pub link: String,

    /// Article headline
    pub title: String,

    /// Publication date as displayed on the page, `None` if absent
    pub date: Option<String>,

    /// Tag strings in page order (may be empty)
    pub tags: Vec<String>,

    /// Byline, if the page carries one
    pub author: Option<String>,

    /// Cleaned body text
    pub body: String,
}

/// A durably stored article.
///
/// Owned exclusively by the store. `id` is application-assigned, strictly
/// increasing, and never reused after deletion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArticleRecord {
    /// Surrogate identity assigned at creation
    pub id: u64,

    /// Canonical article URL (unique across records)
    pub link: String,

    /// Article headline
    pub title: String,

    /// Publication date as displayed on the page
    #[serde(default)]
    pub date: Option<String>,

    /// Tag set (order irrelevant, duplicates removed on merge)
    #[serde(default)]
    pub tags: Vec<String>,

    /// Byline, if known
    #[serde(default)]
    pub author: Option<String>,

    /// Body text
    pub body: String,

    /// SHA-256 hex digest of the normalized body text
    pub fingerprint: String,

    /// Non-canonical links whose content matched this record's fingerprint
    #[serde(default)]
    pub alternate_links: Vec<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

/// Summary counters for a finished crawl run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlStats {
    pub links_total: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub fetch_failures: usize,
    pub extraction_failures: usize,
}

impl CrawlStats {
    /// Number of links that made it through the full pipeline.
    pub fn processed(&self) -> usize {
        self.inserted + self.updated + self.skipped
    }
}
