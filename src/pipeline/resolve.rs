// src/pipeline/resolve.rs

//! Identity resolution for incoming article candidates.
//!
//! Computes a content fingerprint over normalized body text and decides
//! whether a candidate is new, a duplicate, or an update of an existing
//! record. Link-based matches always take precedence over fingerprint-based
//! matches: a page's content can legitimately be edited in place, while the
//! same text reachable under a second URL is one logical article.

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::models::{ArticleCandidate, ArticleRecord, NormalizeConfig};
use crate::storage::ArticleStore;
use crate::utils::text::{compile_patterns, normalize};

/// Fields that differ between a candidate and the stored record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangedFields {
    pub title: bool,
    pub date: bool,
    pub body: bool,
    pub tags: bool,
    pub author: bool,
}

impl ChangedFields {
    pub fn any(&self) -> bool {
        self.title || self.date || self.body || self.tags || self.author
    }
}

/// Outcome of identity resolution for one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// No record matches: create a new one
    Insert,
    /// A record already covers this content: persist nothing new
    Skip { existing: u64 },
    /// The record for this link changed in place: merge fields
    Update {
        existing: u64,
        changed: ChangedFields,
    },
}

/// Service computing fingerprints and ingestion decisions.
pub struct IdentityResolver {
    boilerplate: Vec<Regex>,
}

impl IdentityResolver {
    /// Create a resolver from normalization settings.
    pub fn new(config: &NormalizeConfig) -> Result<Self> {
        Ok(Self {
            boilerplate: compile_patterns(&config.boilerplate_patterns)?,
        })
    }

    /// SHA-256 hex digest of the normalized body text.
    ///
    /// Deterministic and independent of the article's URL, so the same text
    /// under two links produces the same fingerprint.
    pub fn fingerprint(&self, body: &str) -> String {
        let normalized = normalize(body, &self.boilerplate);
        let digest = Sha256::digest(normalized.as_bytes());
        hex::encode(digest)
    }

    /// Decide what ingesting this candidate should do.
    pub async fn resolve(
        &self,
        candidate: &ArticleCandidate,
        store: &dyn ArticleStore,
    ) -> Result<Decision> {
        let fingerprint = self.fingerprint(&candidate.body);
        let by_link = store.get_by_link(&candidate.link).await?;
        let by_fingerprint = match by_link {
            // Link match wins; no need for the second lookup
            Some(_) => None,
            None => store.get_by_fingerprint(&fingerprint).await?,
        };
        Ok(decide(
            candidate,
            &fingerprint,
            by_link.as_ref(),
            by_fingerprint.as_ref(),
        ))
    }
}

/// Pure decision function over the current store state.
///
/// Also used by the store itself to re-evaluate a decision under its write
/// lock when concurrent ingestion raced.
pub fn decide(
    candidate: &ArticleCandidate,
    fingerprint: &str,
    by_link: Option<&ArticleRecord>,
    by_fingerprint: Option<&ArticleRecord>,
) -> Decision {
    if let Some(record) = by_link {
        if record.fingerprint == fingerprint {
            return Decision::Skip { existing: record.id };
        }
        return Decision::Update {
            existing: record.id,
            changed: changed_fields(candidate, fingerprint, record),
        };
    }

    if let Some(record) = by_fingerprint {
        // Same content under a different link: one logical article
        return Decision::Skip { existing: record.id };
    }

    Decision::Insert
}

/// Compare a candidate against the stored record for the same link.
fn changed_fields(
    candidate: &ArticleCandidate,
    fingerprint: &str,
    record: &ArticleRecord,
) -> ChangedFields {
    ChangedFields {
        title: !candidate.title.is_empty() && candidate.title != record.title,
        date: candidate.date.is_some() && candidate.date != record.date,
        body: fingerprint != record.fingerprint,
        tags: candidate
            .tags
            .iter()
            .any(|tag| !record.tags.contains(tag)),
        author: candidate.author.is_some() && candidate.author != record.author,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn resolver() -> IdentityResolver {
        IdentityResolver::new(&NormalizeConfig::default()).unwrap()
    }

    fn candidate(link: &str, body: &str) -> ArticleCandidate {
        ArticleCandidate {
            link: link.to_string(),
            title: "Title".to_string(),
            date: Some("05.08.2026".to_string()),
            tags: vec!["economy".to_string()],
            author: None,
            body: body.to_string(),
        }
    }

    fn record(id: u64, link: &str, fingerprint: &str) -> ArticleRecord {
        let now = Utc::now();
        ArticleRecord {
            id,
            link: link.to_string(),
            title: "Title".to_string(),
            date: Some("05.08.2026".to_string()),
            tags: vec!["economy".to_string()],
            author: None,
            body: "stored body".to_string(),
            fingerprint: fingerprint.to_string(),
            alternate_links: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_fingerprint_ignores_case_and_whitespace() {
        let r = resolver();
        assert_eq!(
            r.fingerprint("Market rises  today"),
            r.fingerprint("market RISES\ntoday")
        );
    }

    #[test]
    fn test_fingerprint_differs_for_different_text() {
        let r = resolver();
        assert_ne!(
            r.fingerprint("market rises today"),
            r.fingerprint("market falls today")
        );
    }

    #[test]
    fn test_decide_insert_when_nothing_matches() {
        let c = candidate("https://example.com/a", "body");
        assert_eq!(decide(&c, "fp", None, None), Decision::Insert);
    }

    #[test]
    fn test_decide_skip_on_identical_fingerprint_same_link() {
        let c = candidate("https://example.com/a", "body");
        let rec = record(7, "https://example.com/a", "fp");
        assert_eq!(
            decide(&c, "fp", Some(&rec), None),
            Decision::Skip { existing: 7 }
        );
    }

    #[test]
    fn test_decide_update_on_changed_fingerprint_same_link() {
        let c = candidate("https://example.com/a", "new body");
        let rec = record(7, "https://example.com/a", "old-fp");
        match decide(&c, "new-fp", Some(&rec), None) {
            Decision::Update { existing, changed } => {
                assert_eq!(existing, 7);
                assert!(changed.body);
                assert!(!changed.title);
            }
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[test]
    fn test_decide_skip_on_fingerprint_match_different_link() {
        let c = candidate("https://example.com/b", "body");
        let rec = record(3, "https://example.com/a", "fp");
        assert_eq!(
            decide(&c, "fp", None, Some(&rec)),
            Decision::Skip { existing: 3 }
        );
    }

    #[test]
    fn test_link_match_takes_precedence_over_fingerprint_match() {
        let c = candidate("https://example.com/a", "edited body");
        let by_link = record(1, "https://example.com/a", "old-fp");
        let by_fp = record(2, "https://example.com/other", "new-fp");
        // Content was edited in place AND the new text matches another record:
        // the link match must win, producing an update of record 1.
        match decide(&c, "new-fp", Some(&by_link), Some(&by_fp)) {
            Decision::Update { existing, .. } => assert_eq!(existing, 1),
            other => panic!("expected update of record 1, got {:?}", other),
        }
    }

    #[test]
    fn test_changed_fields_tag_growth() {
        let mut c = candidate("https://example.com/a", "body");
        c.tags.push("markets".to_string());
        let rec = record(1, "https://example.com/a", "old-fp");
        let changed = changed_fields(&c, "new-fp", &rec);
        assert!(changed.tags);
        assert!(changed.body);
        assert!(!changed.date);
    }
}
