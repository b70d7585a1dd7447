//! Storage abstractions for article persistence.
//!
//! The store is the pipeline's single synchronization point: all mutations
//! go through `upsert`, which re-validates the resolver's decision under the
//! store's own write lock so concurrent ingestion of the same link or
//! content can never produce two records. The store also owns identity
//! allocation; ids move strictly forward and are never reused, even after
//! deletion.

pub mod local;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{ArticleCandidate, ArticleRecord};
use crate::pipeline::resolve::Decision;

// Re-export for convenience
pub use local::LocalStore;

/// What an upsert actually did, with the resulting record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new record was created
    Inserted(ArticleRecord),
    /// An existing record was merged with the candidate
    Updated(ArticleRecord),
    /// An existing record already covered this content
    Skipped(ArticleRecord),
}

impl UpsertOutcome {
    /// The record the candidate resolved to, regardless of outcome.
    pub fn record(&self) -> &ArticleRecord {
        match self {
            UpsertOutcome::Inserted(r) | UpsertOutcome::Updated(r) | UpsertOutcome::Skipped(r) => r,
        }
    }
}

/// Filters for browsing stored articles.
#[derive(Debug, Clone, Default)]
pub struct ArticleFilter {
    /// Only records carrying this tag
    pub tag: Option<String>,
    /// Only records with this publication date string
    pub date: Option<String>,
}

impl ArticleFilter {
    /// Whether a record passes this filter.
    pub fn matches(&self, record: &ArticleRecord) -> bool {
        if let Some(tag) = &self.tag {
            if !record.tags.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
                return false;
            }
        }
        if let Some(date) = &self.date {
            if record.date.as_deref() != Some(date.as_str()) {
                return false;
            }
        }
        true
    }
}

/// One page of browse results.
///
/// `next_page_token` is an opaque cursor; pass it back to get the next page.
/// `None` means the listing is exhausted.
#[derive(Debug, Clone)]
pub struct ArticlePage {
    pub records: Vec<ArticleRecord>,
    pub next_page_token: Option<u64>,
}

/// Persistent crawl position for resume after an unclean stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlCheckpoint {
    /// Index of the last processed link in the seed list
    pub cursor: usize,
    /// The last processed link itself (sanity check on resume)
    pub last_link: String,
    /// Monotone count of links processed across the whole run
    pub processed: u64,
}

/// Trait for article storage backends.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Apply an ingestion decision atomically.
    ///
    /// The decision is advisory: it is re-evaluated against current state
    /// under the store's write lock, so a stale decision from a concurrent
    /// race degrades to the correct insert/update/skip instead of violating
    /// uniqueness.
    async fn upsert(
        &self,
        candidate: &ArticleCandidate,
        fingerprint: &str,
        decision: Decision,
    ) -> Result<UpsertOutcome>;

    /// Look up a record by its canonical link.
    async fn get_by_link(&self, link: &str) -> Result<Option<ArticleRecord>>;

    /// Look up a record by its content fingerprint.
    async fn get_by_fingerprint(&self, fingerprint: &str) -> Result<Option<ArticleRecord>>;

    /// Look up a record by identity.
    async fn get_by_id(&self, id: u64) -> Result<Option<ArticleRecord>>;

    /// All records passing the filter, ascending by id.
    ///
    /// Finite snapshot: restartable from the start, unaffected by writes
    /// that happen after the call.
    async fn query(&self, filter: &ArticleFilter) -> Result<Vec<ArticleRecord>>;

    /// One page of records passing the filter, ascending by id.
    async fn list_page(
        &self,
        filter: &ArticleFilter,
        page_token: Option<u64>,
        page_size: usize,
    ) -> Result<ArticlePage>;

    /// Delete a record. Its identity is never reassigned.
    async fn delete(&self, id: u64) -> Result<bool>;

    /// Number of stored records.
    async fn count(&self) -> Result<usize>;

    /// Load the saved crawl position, if any.
    async fn load_checkpoint(&self) -> Result<Option<CrawlCheckpoint>>;

    /// Persist the crawl position.
    async fn save_checkpoint(&self, checkpoint: &CrawlCheckpoint) -> Result<()>;

    /// Remove the crawl position after a completed run.
    async fn clear_checkpoint(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record_with_tags(tags: &[&str], date: Option<&str>) -> ArticleRecord {
        let now = Utc::now();
        ArticleRecord {
            id: 1,
            link: "https://example.com/a".to_string(),
            title: "Title".to_string(),
            date: date.map(String::from),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            author: None,
            body: "body".to_string(),
            fingerprint: "fp".to_string(),
            alternate_links: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_filter_matches_tag_case_insensitive() {
        let record = record_with_tags(&["Economy"], None);
        let filter = ArticleFilter {
            tag: Some("economy".to_string()),
            date: None,
        };
        assert!(filter.matches(&record));
    }

    #[test]
    fn test_filter_rejects_missing_date() {
        let record = record_with_tags(&[], None);
        let filter = ArticleFilter {
            tag: None,
            date: Some("05.08.2026".to_string()),
        };
        assert!(!filter.matches(&record));
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let record = record_with_tags(&[], Some("05.08.2026"));
        assert!(ArticleFilter::default().matches(&record));
    }
}
