// src/api.rs

//! External query and control surface.
//!
//! `NewsService` is what collaborators (e.g. a presentation website) build
//! against: similarity search, browsing, single-record lookup, and crawl
//! control. It owns the store and index behind shared handles, so concurrent
//! callers never observe a half-initialized index; queries against an empty
//! corpus return empty results rather than errors, and internal failures are
//! surfaced as typed errors, never panics.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::error::Result;
use crate::models::{ArticleRecord, Config, CrawlStats};
use crate::pipeline::{CrawlRunner, CrawlStatus, SimilarityIndex};
use crate::services::{Fetcher, LinkDiscoverer, date_range};
use crate::storage::{ArticleFilter, ArticlePage, ArticleStore, LocalStore};

const INDEX_FILE: &str = "index.json";

/// One similarity search result, ready for display.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub id: u64,
    pub title: String,
    pub link: String,
    pub date: Option<String>,
    pub score: f64,
}

/// Facade over the ingestion pipeline's durable state.
pub struct NewsService {
    config: Arc<Config>,
    store: Arc<LocalStore>,
    index: Arc<SimilarityIndex>,
    runner: Arc<CrawlRunner>,
}

impl NewsService {
    /// Open the service over a data directory, loading or rebuilding the
    /// similarity index as needed.
    pub async fn open(config: Config, data_dir: impl Into<PathBuf>) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let data_dir = data_dir.into();

        let store = Arc::new(LocalStore::open(&data_dir).await?);
        let index = Arc::new(SimilarityIndex::new(&config.index, &config.normalize)?);
        let index_path = data_dir.join(INDEX_FILE);

        match index.load(&index_path).await {
            Ok(true) => {}
            Ok(false) => {
                if store.count().await? > 0 {
                    log::info!("No similarity index on disk; rebuilding from store");
                    rebuild(&store, &index, &index_path).await?;
                }
            }
            Err(e) => {
                // Corrupt index state: rebuild rather than repair
                log::warn!("Similarity index unusable ({}); rebuilding from store", e);
                rebuild(&store, &index, &index_path).await?;
            }
        }

        let runner = Arc::new(CrawlRunner::new(
            Arc::clone(&config),
            Arc::clone(&store) as Arc<dyn ArticleStore>,
            Arc::clone(&index),
            index_path,
        ));

        Ok(Self {
            config,
            store,
            index,
            runner,
        })
    }

    /// Similarity search: the k most similar stored articles.
    pub async fn search(&self, query_text: &str, k: usize) -> Result<Vec<SearchResult>> {
        let mut results = Vec::new();
        for hit in self.index.query(query_text, k) {
            // A record can be deleted while still indexed; drop such hits
            if let Some(record) = self.store.get_by_id(hit.id).await? {
                results.push(SearchResult {
                    id: record.id,
                    title: record.title,
                    link: record.link,
                    date: record.date,
                    score: hit.score,
                });
            }
        }
        Ok(results)
    }

    /// Browse stored articles, one page at a time.
    pub async fn list_articles(
        &self,
        filter: &ArticleFilter,
        page_token: Option<u64>,
        page_size: usize,
    ) -> Result<ArticlePage> {
        self.store.list_page(filter, page_token, page_size).await
    }

    /// Fetch a single article by identity.
    pub async fn get_article(&self, id: u64) -> Result<Option<ArticleRecord>> {
        self.store.get_by_id(id).await
    }

    /// Administratively delete an article and its index entry.
    pub async fn delete_article(&self, id: u64) -> Result<bool> {
        let deleted = self.store.delete(id).await?;
        if deleted {
            self.index.remove(id);
            self.index
                .save(&self.store.root_dir().join(INDEX_FILE))
                .await?;
        }
        Ok(deleted)
    }

    /// Run a crawl over the given links to completion.
    pub async fn crawl(&self, seed_links: Vec<String>) -> Result<CrawlStats> {
        self.runner.run(seed_links).await
    }

    /// Start a crawl in the background.
    pub fn start(&self, seed_links: Vec<String>) -> tokio::task::JoinHandle<Result<CrawlStats>> {
        let runner = Arc::clone(&self.runner);
        tokio::spawn(async move { runner.run(seed_links).await })
    }

    /// Request the running crawl to pause at the next fetch boundary.
    pub fn pause(&self) {
        self.runner.pause();
    }

    /// Shared handle to the crawl runner, for pausing or polling status
    /// from another task.
    pub fn crawl_handle(&self) -> Arc<CrawlRunner> {
        Arc::clone(&self.runner)
    }

    /// Current crawl status.
    pub fn status(&self) -> CrawlStatus {
        self.runner.status()
    }

    /// Number of stored articles.
    pub async fn article_count(&self) -> Result<usize> {
        self.store.count().await
    }

    /// Discover article links from archive listings over a date range.
    pub async fn discover_links(
        &self,
        start: NaiveDate,
        end: Option<NaiveDate>,
    ) -> Result<Vec<String>> {
        let fetcher = Fetcher::new(Arc::new(self.config.crawler.clone()))?;
        let discoverer = LinkDiscoverer::new(&self.config.discovery, &fetcher)?;

        let mut links = Vec::new();
        for date in date_range(start, end)? {
            match discoverer.discover(date).await {
                Ok(found) => links.extend(found),
                Err(e) => log::warn!("Skipping listing for {}: {}", date, e),
            }
        }
        Ok(links)
    }

    /// Recompute the whole similarity index from the store.
    pub async fn rebuild_index(&self) -> Result<()> {
        rebuild(
            &self.store,
            &self.index,
            &self.store.root_dir().join(INDEX_FILE),
        )
        .await
    }
}

async fn rebuild(
    store: &Arc<LocalStore>,
    index: &Arc<SimilarityIndex>,
    index_path: &std::path::Path,
) -> Result<()> {
    let records = store.query(&ArticleFilter::default()).await?;
    index.rebuild_from(&records);
    index.save(index_path).await
}
