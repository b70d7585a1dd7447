//! Local filesystem store implementation.
//!
//! Persists the full article set as a single JSON snapshot with atomic
//! replace (write to temp, then rename), plus in-memory lookup maps by id,
//! link, and fingerprint. One async mutex guards all mutations; the
//! decision passed to `upsert` is re-evaluated while that lock is held, so
//! interleaved crawls of the same link or content collapse to one record.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── articles.json     # Snapshot: next_id + all records
//! ├── index.json        # Similarity index (written by the index)
//! └── checkpoint.json   # Crawl resume position
//! ```

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{ArticleCandidate, ArticleRecord};
use crate::pipeline::resolve::{Decision, decide};
use crate::storage::{ArticleFilter, ArticlePage, ArticleStore, CrawlCheckpoint, UpsertOutcome};

const ARTICLES_FILE: &str = "articles.json";
const CHECKPOINT_FILE: &str = "checkpoint.json";

/// On-disk snapshot format.
#[derive(Debug, Serialize, Deserialize)]
struct StoreSnapshot {
    version: u32,
    next_id: u64,
    articles: Vec<ArticleRecord>,
}

/// In-memory store state, guarded by the store mutex.
#[derive(Debug, Default)]
struct StoreState {
    next_id: u64,
    records: BTreeMap<u64, ArticleRecord>,
    by_link: HashMap<String, u64>,
    by_fingerprint: HashMap<String, u64>,
}

impl StoreState {
    fn from_snapshot(snapshot: StoreSnapshot) -> Result<Self> {
        let mut state = StoreState {
            next_id: snapshot.next_id.max(1),
            ..StoreState::default()
        };

        for record in snapshot.articles {
            if state.by_link.contains_key(&record.link) {
                return Err(AppError::store(format!(
                    "corrupt snapshot: duplicate link {}",
                    record.link
                )));
            }
            state.by_link.insert(record.link.clone(), record.id);
            state
                .by_fingerprint
                .entry(record.fingerprint.clone())
                .or_insert(record.id);
            // The allocator never steps backwards, whatever the file says
            state.next_id = state.next_id.max(record.id + 1);
            state.records.insert(record.id, record);
        }
        Ok(state)
    }

    fn to_snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            version: 1,
            next_id: self.next_id,
            articles: self.records.values().cloned().collect(),
        }
    }
}

/// Local filesystem storage backend.
pub struct LocalStore {
    root_dir: PathBuf,
    state: Mutex<StoreState>,
}

impl LocalStore {
    /// Open (or initialize) a store rooted at the given directory.
    pub async fn open(root_dir: impl Into<PathBuf>) -> Result<Self> {
        let root_dir = root_dir.into();
        tokio::fs::create_dir_all(&root_dir).await?;

        let state = match read_json::<StoreSnapshot>(&root_dir.join(ARTICLES_FILE)).await? {
            Some(snapshot) => {
                let state = StoreState::from_snapshot(snapshot)?;
                log::info!(
                    "Opened store at {} with {} record(s)",
                    root_dir.display(),
                    state.records.len()
                );
                state
            }
            None => StoreState {
                next_id: 1,
                ..StoreState::default()
            },
        };

        Ok(Self {
            root_dir,
            state: Mutex::new(state),
        })
    }

    /// Directory this store (and its sibling files) lives in.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    async fn persist(&self, state: &StoreState) -> Result<()> {
        write_json(&self.root_dir.join(ARTICLES_FILE), &state.to_snapshot()).await
    }

    fn apply_insert(
        state: &mut StoreState,
        candidate: &ArticleCandidate,
        fingerprint: &str,
    ) -> ArticleRecord {
        let now = Utc::now();
        let id = state.next_id;
        state.next_id += 1;

        let record = ArticleRecord {
            id,
            link: candidate.link.clone(),
            title: candidate.title.clone(),
            date: candidate.date.clone(),
            tags: candidate.tags.clone(),
            author: candidate.author.clone(),
            body: candidate.body.clone(),
            fingerprint: fingerprint.to_string(),
            alternate_links: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        state.by_link.insert(record.link.clone(), id);
        state
            .by_fingerprint
            .entry(record.fingerprint.clone())
            .or_insert(id);
        state.records.insert(id, record.clone());
        record
    }

    fn apply_update(
        state: &mut StoreState,
        id: u64,
        candidate: &ArticleCandidate,
        fingerprint: &str,
    ) -> Result<ArticleRecord> {
        let record = state
            .records
            .get_mut(&id)
            .ok_or_else(|| AppError::store(format!("update target {} vanished", id)))?;

        let old_fingerprint = record.fingerprint.clone();

        if !candidate.title.is_empty() {
            record.title = candidate.title.clone();
        }
        if candidate.date.is_some() {
            record.date = candidate.date.clone();
        }
        if candidate.author.is_some() {
            record.author = candidate.author.clone();
        }
        for tag in &candidate.tags {
            if !record.tags.contains(tag) {
                record.tags.push(tag.clone());
            }
        }
        record.body = candidate.body.clone();
        record.fingerprint = fingerprint.to_string();
        record.updated_at = Utc::now();
        let updated = record.clone();

        if state.by_fingerprint.get(&old_fingerprint) == Some(&id) {
            state.by_fingerprint.remove(&old_fingerprint);
        }
        if let Some(&other) = state.by_fingerprint.get(fingerprint) {
            log::warn!(
                "Record {} now carries the same content as record {}; fingerprint lookups resolve to {}",
                id,
                other,
                other
            );
        }
        state
            .by_fingerprint
            .entry(fingerprint.to_string())
            .or_insert(id);

        Ok(updated)
    }

    /// Record the alternate link on a content-duplicate skip.
    ///
    /// Returns the record and whether anything changed (a plain re-crawl of
    /// the canonical link changes nothing and triggers no write).
    fn apply_skip(
        state: &mut StoreState,
        id: u64,
        candidate_link: &str,
    ) -> Result<(ArticleRecord, bool)> {
        let record = state
            .records
            .get_mut(&id)
            .ok_or_else(|| AppError::store(format!("skip target {} vanished", id)))?;

        if record.link != candidate_link
            && !record.alternate_links.iter().any(|l| l == candidate_link)
        {
            record.alternate_links.push(candidate_link.to_string());
            record.updated_at = Utc::now();
            return Ok((record.clone(), true));
        }
        Ok((record.clone(), false))
    }
}

#[async_trait]
impl ArticleStore for LocalStore {
    async fn upsert(
        &self,
        candidate: &ArticleCandidate,
        fingerprint: &str,
        decision: Decision,
    ) -> Result<UpsertOutcome> {
        let mut state = self.state.lock().await;

        // Re-evaluate under the lock: the caller's decision may be stale if
        // a concurrent ingestion of the same link or content won the race.
        let by_link = state
            .by_link
            .get(&candidate.link)
            .and_then(|id| state.records.get(id))
            .cloned();
        let by_fingerprint = state
            .by_fingerprint
            .get(fingerprint)
            .and_then(|id| state.records.get(id))
            .cloned();
        let authoritative = decide(
            candidate,
            fingerprint,
            by_link.as_ref(),
            by_fingerprint.as_ref(),
        );

        if authoritative != decision {
            log::info!(
                "Resolution conflict for {}: re-evaluated {:?} -> {:?}",
                candidate.link,
                decision,
                authoritative
            );
        }

        match authoritative {
            Decision::Insert => {
                let record = Self::apply_insert(&mut state, candidate, fingerprint);
                self.persist(&state).await?;
                log::debug!("Inserted article {} ({})", record.id, record.link);
                Ok(UpsertOutcome::Inserted(record))
            }
            Decision::Update { existing, .. } => {
                let record = Self::apply_update(&mut state, existing, candidate, fingerprint)?;
                self.persist(&state).await?;
                log::debug!("Updated article {} ({})", record.id, record.link);
                Ok(UpsertOutcome::Updated(record))
            }
            Decision::Skip { existing } => {
                let (record, dirty) = Self::apply_skip(&mut state, existing, &candidate.link)?;
                if dirty {
                    self.persist(&state).await?;
                    log::debug!(
                        "Recorded alternate link {} for article {}",
                        candidate.link,
                        record.id
                    );
                }
                Ok(UpsertOutcome::Skipped(record))
            }
        }
    }

    async fn get_by_link(&self, link: &str) -> Result<Option<ArticleRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .by_link
            .get(link)
            .and_then(|id| state.records.get(id))
            .cloned())
    }

    async fn get_by_fingerprint(&self, fingerprint: &str) -> Result<Option<ArticleRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .by_fingerprint
            .get(fingerprint)
            .and_then(|id| state.records.get(id))
            .cloned())
    }

    async fn get_by_id(&self, id: u64) -> Result<Option<ArticleRecord>> {
        let state = self.state.lock().await;
        Ok(state.records.get(&id).cloned())
    }

    async fn query(&self, filter: &ArticleFilter) -> Result<Vec<ArticleRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn list_page(
        &self,
        filter: &ArticleFilter,
        page_token: Option<u64>,
        page_size: usize,
    ) -> Result<ArticlePage> {
        let state = self.state.lock().await;
        let lower = match page_token {
            Some(token) => Bound::Excluded(token),
            None => Bound::Unbounded,
        };

        let mut records = Vec::new();
        let mut more = false;
        for record in state
            .records
            .range((lower, Bound::Unbounded))
            .map(|(_, r)| r)
            .filter(|r| filter.matches(r))
        {
            if records.len() == page_size {
                more = true;
                break;
            }
            records.push(record.clone());
        }

        let next_page_token = if more {
            records.last().map(|r: &ArticleRecord| r.id)
        } else {
            None
        };
        Ok(ArticlePage {
            records,
            next_page_token,
        })
    }

    async fn delete(&self, id: u64) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(record) = state.records.remove(&id) else {
            return Ok(false);
        };

        state.by_link.remove(&record.link);
        if state.by_fingerprint.get(&record.fingerprint) == Some(&id) {
            state.by_fingerprint.remove(&record.fingerprint);
        }
        // next_id is untouched: deleted identities are never reassigned
        self.persist(&state).await?;
        log::info!("Deleted article {} ({})", id, record.link);
        Ok(true)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.state.lock().await.records.len())
    }

    async fn load_checkpoint(&self) -> Result<Option<CrawlCheckpoint>> {
        read_json(&self.root_dir.join(CHECKPOINT_FILE)).await
    }

    async fn save_checkpoint(&self, checkpoint: &CrawlCheckpoint) -> Result<()> {
        write_json(&self.root_dir.join(CHECKPOINT_FILE), checkpoint).await
    }

    async fn clear_checkpoint(&self) -> Result<()> {
        match tokio::fs::remove_file(self.root_dir.join(CHECKPOINT_FILE)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Io(e)),
        }
    }
}

/// Write bytes atomically (write to temp, then rename).
async fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = path.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_bytes(path, &bytes).await
}

/// Read JSON, returning None if the file doesn't exist.
async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(AppError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

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

    #[tokio::test]
    async fn test_insert_and_lookups() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::open(tmp.path()).await.unwrap();

        let c = candidate("https://example.com/a", "body text");
        let outcome = store.upsert(&c, "fp-a", Decision::Insert).await.unwrap();
        let record = match outcome {
            UpsertOutcome::Inserted(r) => r,
            other => panic!("expected insert, got {:?}", other),
        };

        assert_eq!(record.id, 1);
        assert_eq!(
            store
                .get_by_link("https://example.com/a")
                .await
                .unwrap()
                .unwrap()
                .id,
            record.id
        );
        assert_eq!(
            store.get_by_fingerprint("fp-a").await.unwrap().unwrap().id,
            record.id
        );
        assert_eq!(store.get_by_id(1).await.unwrap().unwrap().link, c.link);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stale_insert_decision_degrades_to_skip() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::open(tmp.path()).await.unwrap();

        let c = candidate("https://example.com/a", "body text");
        store.upsert(&c, "fp-a", Decision::Insert).await.unwrap();

        // Second ingestion still claims Insert; the store must re-evaluate.
        let outcome = store.upsert(&c, "fp-a", Decision::Insert).await.unwrap();
        assert!(matches!(outcome, UpsertOutcome::Skipped(_)));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_ingestion_of_same_link_yields_one_record() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(LocalStore::open(tmp.path()).await.unwrap());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let c = candidate("https://example.com/a", "same body");
                store.upsert(&c, "fp-same", Decision::Insert).await.unwrap()
            }));
        }

        let mut inserted = 0;
        for handle in handles {
            if let UpsertOutcome::Inserted(_) = handle.await.unwrap() {
                inserted += 1;
            }
        }

        assert_eq!(inserted, 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_content_duplicate_under_second_link_skips_and_records_provenance() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::open(tmp.path()).await.unwrap();

        let a = candidate("https://example.com/a", "market rises today");
        store.upsert(&a, "fp-x", Decision::Insert).await.unwrap();

        let b = candidate("https://example.com/b", "market rises today");
        let outcome = store
            .upsert(&b, "fp-x", Decision::Skip { existing: 1 })
            .await
            .unwrap();

        let record = match outcome {
            UpsertOutcome::Skipped(r) => r,
            other => panic!("expected skip, got {:?}", other),
        };
        assert_eq!(record.link, "https://example.com/a");
        assert_eq!(record.alternate_links, vec!["https://example.com/b"]);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_merges_tags_and_replaces_body() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::open(tmp.path()).await.unwrap();

        let original = candidate("https://example.com/a", "old body");
        store
            .upsert(&original, "fp-old", Decision::Insert)
            .await
            .unwrap();

        let mut edited = candidate("https://example.com/a", "new body");
        edited.title = "New Title".to_string();
        edited.tags = vec!["markets".to_string(), "economy".to_string()];

        let outcome = store
            .upsert(
                &edited,
                "fp-new",
                Decision::Update {
                    existing: 1,
                    changed: Default::default(),
                },
            )
            .await
            .unwrap();

        let record = match outcome {
            UpsertOutcome::Updated(r) => r,
            other => panic!("expected update, got {:?}", other),
        };
        assert_eq!(record.id, 1);
        assert_eq!(record.title, "New Title");
        assert_eq!(record.body, "new body");
        assert_eq!(record.tags, vec!["economy", "markets"]);
        assert_eq!(record.fingerprint, "fp-new");

        // Old fingerprint no longer resolves; the new one does.
        assert!(store.get_by_fingerprint("fp-old").await.unwrap().is_none());
        assert_eq!(
            store.get_by_fingerprint("fp-new").await.unwrap().unwrap().id,
            1
        );
    }

    #[tokio::test]
    async fn test_identity_monotone_across_delete() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::open(tmp.path()).await.unwrap();

        let a = candidate("https://example.com/a", "a");
        let b = candidate("https://example.com/b", "b");
        store.upsert(&a, "fp-a", Decision::Insert).await.unwrap();
        store.upsert(&b, "fp-b", Decision::Insert).await.unwrap();

        assert!(store.delete(2).await.unwrap());

        let c = candidate("https://example.com/c", "c");
        let outcome = store.upsert(&c, "fp-c", Decision::Insert).await.unwrap();
        assert_eq!(outcome.record().id, 3);
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let store = LocalStore::open(tmp.path()).await.unwrap();
            let a = candidate("https://example.com/a", "a");
            store.upsert(&a, "fp-a", Decision::Insert).await.unwrap();
            assert!(store.delete(1).await.unwrap());
            let b = candidate("https://example.com/b", "b");
            store.upsert(&b, "fp-b", Decision::Insert).await.unwrap();
        }

        let reopened = LocalStore::open(tmp.path()).await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 1);
        assert_eq!(
            reopened
                .get_by_link("https://example.com/b")
                .await
                .unwrap()
                .unwrap()
                .id,
            2
        );

        // The allocator continues past the deleted id after a restart.
        let c = candidate("https://example.com/c", "c");
        let outcome = reopened.upsert(&c, "fp-c", Decision::Insert).await.unwrap();
        assert_eq!(outcome.record().id, 3);
    }

    #[tokio::test]
    async fn test_list_page_walks_cursor() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::open(tmp.path()).await.unwrap();

        for i in 0..5 {
            let c = candidate(&format!("https://example.com/{i}"), &format!("body {i}"));
            store
                .upsert(&c, &format!("fp-{i}"), Decision::Insert)
                .await
                .unwrap();
        }

        let filter = ArticleFilter::default();
        let first = store.list_page(&filter, None, 2).await.unwrap();
        assert_eq!(first.records.len(), 2);
        assert_eq!(first.records[0].id, 1);
        let token = first.next_page_token.unwrap();

        let second = store.list_page(&filter, Some(token), 2).await.unwrap();
        assert_eq!(second.records[0].id, 3);

        let third = store
            .list_page(&filter, second.next_page_token, 2)
            .await
            .unwrap();
        assert_eq!(third.records.len(), 1);
        assert!(third.next_page_token.is_none());
    }

    #[tokio::test]
    async fn test_checkpoint_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::open(tmp.path()).await.unwrap();

        assert!(store.load_checkpoint().await.unwrap().is_none());

        let checkpoint = CrawlCheckpoint {
            cursor: 17,
            last_link: "https://example.com/17".to_string(),
            processed: 18,
        };
        store.save_checkpoint(&checkpoint).await.unwrap();
        assert_eq!(
            store.load_checkpoint().await.unwrap(),
            Some(checkpoint.clone())
        );

        store.clear_checkpoint().await.unwrap();
        assert!(store.load_checkpoint().await.unwrap().is_none());
    }
}
