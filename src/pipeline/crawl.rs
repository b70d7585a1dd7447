// src/pipeline/crawl.rs

//! Crawl orchestration.
//!
//! Drives candidate links through Fetcher -> Extractor -> Resolver -> Store
//! -> Similarity Index. Fetches run concurrently up to a bounded width, but
//! completions are consumed in submission order so the resume checkpoint
//! always describes a contiguous prefix of the link list. All store
//! mutations happen in the serial consume stage; shutdown is honored at
//! fetch boundaries and never interrupts an upsert.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{AppError, Result};
use crate::models::{ArticleCandidate, Config, CrawlStats};
use crate::pipeline::index::SimilarityIndex;
use crate::pipeline::resolve::IdentityResolver;
use crate::services::{Extractor, Fetcher};
use crate::storage::{ArticleStore, CrawlCheckpoint, UpsertOutcome};

/// Crawl lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrawlState {
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
}

/// Shared view of crawl progress for external callers.
#[derive(Debug, Clone)]
pub struct CrawlStatus {
    pub state: CrawlState,
    pub processed: u64,
    pub last_link: Option<String>,
    pub last_error: Option<String>,
}

impl Default for CrawlStatus {
    fn default() -> Self {
        Self {
            state: CrawlState::Idle,
            processed: 0,
            last_link: None,
            last_error: None,
        }
    }
}

/// Orchestrates crawl runs over a seed link list.
pub struct CrawlRunner {
    config: Arc<Config>,
    store: Arc<dyn ArticleStore>,
    index: Arc<SimilarityIndex>,
    index_path: PathBuf,
    status: Mutex<CrawlStatus>,
    shutdown_tx: watch::Sender<bool>,
}

impl CrawlRunner {
    /// Create a runner over the given store and index.
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn ArticleStore>,
        index: Arc<SimilarityIndex>,
        index_path: PathBuf,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            store,
            index,
            index_path,
            status: Mutex::new(CrawlStatus::default()),
            shutdown_tx,
        }
    }

    /// Current crawl status snapshot.
    pub fn status(&self) -> CrawlStatus {
        self.lock_status().clone()
    }

    /// Request a pause. The run stops at the next fetch boundary.
    pub fn pause(&self) {
        log::info!("Pause requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// Run the crawl over the given links, resuming from a checkpoint if one
    /// matches the link list.
    pub async fn run(&self, links: Vec<String>) -> Result<CrawlStats> {
        {
            let mut status = self.lock_status();
            if status.state == CrawlState::Running {
                return Err(AppError::validation("a crawl is already running"));
            }
            status.state = CrawlState::Running;
            status.processed = 0;
            status.last_error = None;
        }
        let _ = self.shutdown_tx.send(false);

        let result = self.run_inner(&links).await;

        match &result {
            Ok(stats) => log::info!(
                "Crawl finished: {} inserted, {} updated, {} skipped, {} fetch failure(s), {} extraction failure(s)",
                stats.inserted,
                stats.updated,
                stats.skipped,
                stats.fetch_failures,
                stats.extraction_failures
            ),
            Err(e) => {
                log::error!("Crawl halted: {}", e);
                let mut status = self.lock_status();
                status.state = CrawlState::Failed;
                status.last_error = Some(e.to_string());
            }
        }
        result
    }

    async fn run_inner(&self, links: &[String]) -> Result<CrawlStats> {
        let start = self.resume_cursor(links).await?;
        let mut stats = CrawlStats {
            links_total: links.len(),
            ..CrawlStats::default()
        };

        let delay = Duration::from_millis(self.config.crawler.request_delay_ms);
        let concurrency = self.config.crawler.max_concurrent.max(1);

        let crawler_config = Arc::new(self.config.crawler.clone());
        let shutdown_rx = self.shutdown_tx.subscribe();
        let fetcher =
            Fetcher::new(Arc::clone(&crawler_config))?.with_shutdown(shutdown_rx.clone());
        let extractor = Extractor::new(&self.config.extraction)?;
        let resolver = IdentityResolver::new(&self.config.normalize)?;

        // Fetch + extract concurrently; `buffered` keeps submission order so
        // the checkpoint cursor stays contiguous.
        let fetcher = &fetcher;
        let extractor = &extractor;
        let items: Vec<(usize, String)> = links
            .iter()
            .enumerate()
            .skip(start)
            .map(|(cursor, link)| (cursor, link.clone()))
            .collect();
        let mut pipeline = stream::iter(items)
            .map(move |(cursor, link)| {
                let shutdown = shutdown_rx.clone();
                async move {
                    if *shutdown.borrow() {
                        return (cursor, link, None);
                    }
                    let outcome = fetch_and_extract(fetcher, extractor, &link).await;
                    (cursor, link, Some(outcome))
                }
            })
            .buffered(concurrency);

        let mut paused = false;
        while let Some((cursor, link, outcome)) = pipeline.next().await {
            let Some(outcome) = outcome else {
                paused = true;
                break;
            };

            match outcome {
                Ok(candidate) => {
                    self.ingest(&resolver, &candidate, &mut stats).await?;
                }
                Err(e) => {
                    match &e {
                        AppError::Fetch(_) => stats.fetch_failures += 1,
                        _ => stats.extraction_failures += 1,
                    }
                    log::warn!("Skipping {}: {}", link, e);
                    self.lock_status().last_error = Some(e.to_string());
                }
            }

            let processed = {
                let mut status = self.lock_status();
                status.processed += 1;
                status.last_link = Some(link.clone());
                status.processed
            };
            self.store
                .save_checkpoint(&CrawlCheckpoint {
                    cursor,
                    last_link: link.clone(),
                    processed,
                })
                .await?;

            if *self.shutdown_tx.borrow() {
                paused = true;
                break;
            }
            if delay.as_millis() > 0 {
                tokio::time::sleep(delay).await;
            }
        }
        drop(pipeline);

        if let Err(e) = self.index.save(&self.index_path).await {
            log::warn!("Failed to persist similarity index: {}", e);
        }

        {
            let mut status = self.lock_status();
            if paused {
                status.state = CrawlState::Paused;
                log::info!("Crawl paused at {:?}", status.last_link);
            } else {
                status.state = CrawlState::Completed;
            }
        }
        if !paused {
            self.store.clear_checkpoint().await?;
        }

        Ok(stats)
    }

    /// Resolve, upsert with bounded retries, and refresh the index.
    ///
    /// Store failures here are integrity-threatening: after the retry budget
    /// is spent the error propagates and halts the whole run.
    async fn ingest(
        &self,
        resolver: &IdentityResolver,
        candidate: &ArticleCandidate,
        stats: &mut CrawlStats,
    ) -> Result<()> {
        let fingerprint = resolver.fingerprint(&candidate.body);
        let mut attempt = 0;
        let outcome = loop {
            attempt += 1;
            let decision = resolver.resolve(candidate, self.store.as_ref()).await?;
            match self.store.upsert(candidate, &fingerprint, decision).await {
                Ok(outcome) => break outcome,
                Err(e) if attempt < self.config.crawler.store_retry_limit => {
                    log::warn!(
                        "Store upsert failed for {} (attempt {}/{}): {}",
                        candidate.link,
                        attempt,
                        self.config.crawler.store_retry_limit,
                        e
                    );
                    tokio::time::sleep(Duration::from_millis(
                        self.config.crawler.retry_base_delay_ms,
                    ))
                    .await;
                }
                Err(e) => {
                    return Err(AppError::store(format!(
                        "upsert failed for {} after {} attempt(s): {}",
                        candidate.link, attempt, e
                    )));
                }
            }
        };

        match &outcome {
            UpsertOutcome::Inserted(record) => {
                stats.inserted += 1;
                self.index.insert(record);
                log::info!("Ingested new article {} ({})", record.id, record.link);
            }
            UpsertOutcome::Updated(record) => {
                stats.updated += 1;
                self.index.insert(record);
                log::info!("Updated article {} ({})", record.id, record.link);
            }
            UpsertOutcome::Skipped(record) => {
                stats.skipped += 1;
                log::debug!("Duplicate content for {} (record {})", candidate.link, record.id);
            }
        }
        Ok(())
    }

    /// Where to start in the link list, honoring a saved checkpoint.
    async fn resume_cursor(&self, links: &[String]) -> Result<usize> {
        match self.store.load_checkpoint().await? {
            Some(checkpoint) => {
                let matches_list = links
                    .get(checkpoint.cursor)
                    .is_some_and(|link| *link == checkpoint.last_link);
                if matches_list {
                    log::info!(
                        "Resuming crawl after {} ({} link(s) already processed)",
                        checkpoint.last_link,
                        checkpoint.processed
                    );
                    self.lock_status().processed = checkpoint.processed;
                    Ok(checkpoint.cursor + 1)
                } else {
                    log::info!("Checkpoint does not match this link list; starting over");
                    Ok(0)
                }
            }
            None => Ok(0),
        }
    }

    fn lock_status(&self) -> std::sync::MutexGuard<'_, CrawlStatus> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// The concurrent, side-effect-free half of the pipeline.
async fn fetch_and_extract(
    fetcher: &Fetcher,
    extractor: &Extractor,
    link: &str,
) -> Result<ArticleCandidate> {
    let page = fetcher.fetch(link).await?;
    extractor.extract(&page)
}
