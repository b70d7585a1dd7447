//! TF-IDF similarity index over stored article bodies.
//!
//! Maintains per-term document frequencies and a sparse, L2-normalized
//! tf-idf vector per article; queries are scored by cosine similarity.
//!
//! Readers always work against a complete immutable snapshot behind an
//! `Arc`; writers build the next snapshot off to the side and swap it in
//! atomically, so a query never observes a half-updated vector. Incremental
//! inserts reuse the existing vectors (stale document frequencies, cheap);
//! a full rebuild recomputes every vector so scores are comparable again.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{ArticleRecord, IndexConfig, NormalizeConfig};
use crate::utils::text::{compile_patterns, normalize, tokenize};

/// One similarity query result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: u64,
    pub score: f64,
}

/// Term counts per document: the writer-side source of truth.
type DocTerms = HashMap<u64, HashMap<String, u32>>;

/// Immutable read-side state.
#[derive(Debug, Default)]
struct IndexSnapshot {
    doc_count: usize,
    doc_freq: HashMap<String, u32>,
    /// L2-normalized tf-idf vector per document
    vectors: HashMap<u64, HashMap<String, f64>>,
}

/// Persisted index format: term counts only, vectors are derived on load.
#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    docs: DocTerms,
}

/// Similarity index with snapshot-swapped reads.
pub struct SimilarityIndex {
    min_token_length: usize,
    boilerplate: Vec<Regex>,
    docs: Mutex<DocTerms>,
    snapshot: RwLock<Arc<IndexSnapshot>>,
}

impl SimilarityIndex {
    /// Create an empty index.
    pub fn new(index: &IndexConfig, normalize: &NormalizeConfig) -> Result<Self> {
        Ok(Self {
            min_token_length: index.min_token_length,
            boilerplate: compile_patterns(&normalize.boilerplate_patterns)?,
            docs: Mutex::new(HashMap::new()),
            snapshot: RwLock::new(Arc::new(IndexSnapshot::default())),
        })
    }

    /// Number of indexed documents.
    pub fn len(&self) -> usize {
        lock(&self.docs).len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of distinct terms across the corpus.
    pub fn term_count(&self) -> usize {
        read(&self.snapshot).doc_freq.len()
    }

    /// Insert or refresh a record's vector incrementally.
    ///
    /// Existing vectors keep their old weights until the next rebuild;
    /// acceptable for streaming ingestion.
    pub fn insert(&self, record: &ArticleRecord) {
        let counts = self.term_counts(&record.body);
        let mut docs = lock(&self.docs);
        let previous = docs.insert(record.id, counts.clone());

        let old = read(&self.snapshot);
        let mut doc_freq = old.doc_freq.clone();
        if let Some(previous) = previous {
            decrement_df(&mut doc_freq, &previous);
        }
        for term in counts.keys() {
            *doc_freq.entry(term.clone()).or_insert(0) += 1;
        }

        let doc_count = docs.len();
        let mut vectors = old.vectors.clone();
        vectors.remove(&record.id);
        if let Some(vector) = build_vector(&counts, &doc_freq, doc_count) {
            vectors.insert(record.id, vector);
        }

        self.swap(IndexSnapshot {
            doc_count,
            doc_freq,
            vectors,
        });
        log::debug!("Indexed article {} ({} docs total)", record.id, doc_count);
    }

    /// Remove a document from the index.
    pub fn remove(&self, id: u64) {
        let mut docs = lock(&self.docs);
        let Some(counts) = docs.remove(&id) else {
            return;
        };

        let old = read(&self.snapshot);
        let mut doc_freq = old.doc_freq.clone();
        decrement_df(&mut doc_freq, &counts);

        let mut vectors = old.vectors.clone();
        vectors.remove(&id);

        self.swap(IndexSnapshot {
            doc_count: docs.len(),
            doc_freq,
            vectors,
        });
        log::debug!("Removed article {} from index", id);
    }

    /// Recompute every vector from the given records.
    ///
    /// Runs off to the side and swaps in atomically once complete; required
    /// periodically and after bulk deletions to keep scores comparable.
    pub fn rebuild_from<'a>(&self, records: impl IntoIterator<Item = &'a ArticleRecord>) {
        let mut docs: DocTerms = HashMap::new();
        for record in records {
            docs.insert(record.id, self.term_counts(&record.body));
        }
        let mut guard = lock(&self.docs);
        let snapshot = build_snapshot(&docs);
        *guard = docs;
        log::info!(
            "Rebuilt similarity index: {} doc(s), {} term(s)",
            snapshot.doc_count,
            snapshot.doc_freq.len()
        );
        self.swap(snapshot);
    }

    /// Find the k most similar indexed articles for a piece of text.
    ///
    /// The query is vectorized against current statistics without mutating
    /// them. Results are ordered by descending cosine score; equal scores
    /// are broken by ascending id so results are deterministic.
    pub fn query(&self, text: &str, k: usize) -> Vec<SearchHit> {
        if k == 0 {
            return Vec::new();
        }
        let snapshot = read(&self.snapshot);
        let counts = self.term_counts(text);
        let Some(query_vector) = build_vector(&counts, &snapshot.doc_freq, snapshot.doc_count)
        else {
            return Vec::new();
        };

        let mut hits: Vec<SearchHit> = snapshot
            .vectors
            .iter()
            .map(|(&id, vector)| SearchHit {
                id,
                score: dot(&query_vector, vector),
            })
            .filter(|hit| hit.score > 0.0)
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
        hits.truncate(k);
        hits
    }

    /// Persist term counts to the given file.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let file = IndexFile {
            version: 1,
            docs: lock(&self.docs).clone(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Load persisted term counts and derive fresh vectors.
    ///
    /// Returns `Ok(false)` if no index file exists. An unreadable file is an
    /// `Index` error; the caller should fall back to a full rebuild from the
    /// store.
    pub async fn load(&self, path: &Path) -> Result<bool> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(AppError::Io(e)),
        };
        let file: IndexFile = serde_json::from_slice(&bytes)
            .map_err(|e| AppError::index(format!("unreadable index file: {e}")))?;
        if file.version != 1 {
            return Err(AppError::index(format!(
                "unsupported index version {}",
                file.version
            )));
        }

        let mut guard = lock(&self.docs);
        let snapshot = build_snapshot(&file.docs);
        *guard = file.docs;
        self.swap(snapshot);
        Ok(true)
    }

    fn term_counts(&self, text: &str) -> HashMap<String, u32> {
        let normalized = normalize(text, &self.boilerplate);
        let mut counts = HashMap::new();
        for token in tokenize(&normalized, self.min_token_length) {
            *counts.entry(token).or_insert(0) += 1;
        }
        counts
    }

    fn swap(&self, snapshot: IndexSnapshot) {
        *self
            .snapshot
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Arc::new(snapshot);
    }
}

/// Build a complete snapshot from term counts.
fn build_snapshot(docs: &DocTerms) -> IndexSnapshot {
    let doc_count = docs.len();
    let mut doc_freq: HashMap<String, u32> = HashMap::new();
    for counts in docs.values() {
        for term in counts.keys() {
            *doc_freq.entry(term.clone()).or_insert(0) += 1;
        }
    }

    let vectors = docs
        .iter()
        .filter_map(|(&id, counts)| build_vector(counts, &doc_freq, doc_count).map(|v| (id, v)))
        .collect();

    IndexSnapshot {
        doc_count,
        doc_freq,
        vectors,
    }
}

/// L2-normalized tf-idf vector, or None if nothing is weightable.
///
/// idf = ln(1 + N/df), strictly positive, so terms present in every
/// document still contribute and self-similarity stays exactly 1.
fn build_vector(
    counts: &HashMap<String, u32>,
    doc_freq: &HashMap<String, u32>,
    doc_count: usize,
) -> Option<HashMap<String, f64>> {
    let mut vector: HashMap<String, f64> = HashMap::new();
    for (term, &tf) in counts {
        let df = doc_freq.get(term).copied().unwrap_or(0);
        if df == 0 {
            // Unknown to the corpus: cannot match anything
            continue;
        }
        let idf = (1.0 + doc_count as f64 / df as f64).ln();
        vector.insert(term.clone(), tf as f64 * idf);
    }

    let norm = vector.values().map(|w| w * w).sum::<f64>().sqrt();
    if norm == 0.0 {
        return None;
    }
    for weight in vector.values_mut() {
        *weight /= norm;
    }
    Some(vector)
}

/// Cosine of two L2-normalized sparse vectors.
fn dot(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small
        .iter()
        .filter_map(|(term, wa)| large.get(term).map(|wb| wa * wb))
        .sum()
}

fn decrement_df(doc_freq: &mut HashMap<String, u32>, counts: &HashMap<String, u32>) {
    for term in counts.keys() {
        if let Some(df) = doc_freq.get_mut(term) {
            *df -= 1;
            if *df == 0 {
                doc_freq.remove(term);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn read(snapshot: &RwLock<Arc<IndexSnapshot>>) -> Arc<IndexSnapshot> {
    snapshot.read().unwrap_or_else(|e| e.into_inner()).clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_index() -> SimilarityIndex {
        SimilarityIndex::new(&IndexConfig::default(), &NormalizeConfig::default()).unwrap()
    }

    fn record(id: u64, body: &str) -> ArticleRecord {
        let now = Utc::now();
        ArticleRecord {
            id,
            link: format!("https://example.com/{id}"),
            title: format!("Article {id}"),
            date: None,
            tags: Vec::new(),
            author: None,
            body: body.to_string(),
            fingerprint: format!("fp-{id}"),
            alternate_links: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn corpus() -> Vec<ArticleRecord> {
        vec![
            record(1, "stocks fall sharply amid recession fears"),
            record(2, "stocks rally after positive earnings reports"),
            record(3, "central bank holds interest rates steady"),
            record(4, "oil prices fall as demand weakens sharply"),
            record(5, "local festival draws record crowds downtown"),
        ]
    }

    #[test]
    fn test_query_returns_k_results_ordered_by_score() {
        let index = make_index();
        index.rebuild_from(&corpus());

        let hits = index.query("stocks fall sharply", 2);
        assert_eq!(hits.len(), 2);
        assert!(hits[0].score >= hits[1].score);
        assert_eq!(hits[0].id, 1);
    }

    #[test]
    fn test_query_is_deterministic() {
        let index = make_index();
        index.rebuild_from(&corpus());

        let first = index.query("interest rates", 5);
        let second = index.query("interest rates", 5);
        assert_eq!(first, second);
    }

    #[test]
    fn test_self_similarity_is_maximal() {
        let index = make_index();
        index.rebuild_from(&corpus());

        let hits = index.query("stocks rally after positive earnings reports", 5);
        assert_eq!(hits[0].id, 2);
        assert!((hits[0].score - 1.0).abs() < 1e-9);
        assert!(hits.iter().skip(1).all(|h| h.score < hits[0].score));
    }

    #[test]
    fn test_tie_break_by_ascending_id() {
        let index = make_index();
        // Two identical documents tie exactly; lower id must come first.
        index.rebuild_from(&[
            record(8, "unemployment figures released today"),
            record(3, "unemployment figures released today"),
        ]);

        let hits = index.query("unemployment figures released today", 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, 3);
        assert_eq!(hits[1].id, 8);
        assert!((hits[0].score - hits[1].score).abs() < 1e-12);
    }

    #[test]
    fn test_query_unknown_terms_returns_empty() {
        let index = make_index();
        index.rebuild_from(&corpus());
        assert!(index.query("zzzxqwerty unseen nonsense", 3).is_empty());
    }

    #[test]
    fn test_query_does_not_mutate_statistics() {
        let index = make_index();
        index.rebuild_from(&corpus());

        let terms_before = index.term_count();
        index.query("completely novel vocabulary here", 3);
        assert_eq!(index.term_count(), terms_before);
        assert_eq!(index.len(), 5);
    }

    #[test]
    fn test_incremental_insert_and_remove() {
        let index = make_index();
        index.rebuild_from(&corpus());
        assert_eq!(index.len(), 5);

        index.insert(&record(6, "stocks fall again as fears deepen"));
        assert_eq!(index.len(), 6);
        let hits = index.query("stocks fall", 6);
        assert!(hits.iter().any(|h| h.id == 6));

        index.remove(6);
        assert_eq!(index.len(), 5);
        let hits = index.query("stocks fall", 6);
        assert!(!hits.iter().any(|h| h.id == 6));
    }

    #[test]
    fn test_reinsert_refreshes_vector() {
        let index = make_index();
        index.rebuild_from(&corpus());

        // Article 5 changes topic entirely; its old terms must stop matching.
        index.insert(&record(5, "stocks plunge in heavy trading"));
        let hits = index.query("festival crowds downtown", 5);
        assert!(!hits.iter().any(|h| h.id == 5));
        let hits = index.query("stocks plunge", 5);
        assert!(hits.iter().any(|h| h.id == 5));
    }

    #[test]
    fn test_remove_unknown_id_is_noop() {
        let index = make_index();
        index.rebuild_from(&corpus());
        index.remove(99);
        assert_eq!(index.len(), 5);
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("index.json");

        let index = make_index();
        index.rebuild_from(&corpus());
        index.save(&path).await.unwrap();

        let loaded = make_index();
        assert!(loaded.load(&path).await.unwrap());
        assert_eq!(loaded.len(), 5);

        let a = index.query("stocks fall sharply", 3);
        let b = loaded.query("stocks fall sharply", 3);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_load_corrupt_file_is_index_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("index.json");
        tokio::fs::write(&path, b"not json at all").await.unwrap();

        let index = make_index();
        let err = index.load(&path).await.unwrap_err();
        assert!(matches!(err, AppError::Index(_)));
    }

    #[tokio::test]
    async fn test_load_missing_file_is_fresh_start() {
        let tmp = tempfile::TempDir::new().unwrap();
        let index = make_index();
        assert!(!index.load(&tmp.path().join("index.json")).await.unwrap());
        assert!(index.is_empty());
    }
}
