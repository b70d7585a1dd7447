//! Application configuration structures.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP and crawling behavior settings
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Archive listing discovery settings
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Article page extraction selectors
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Body text normalization settings
    #[serde(default)]
    pub normalize: NormalizeConfig,

    /// Similarity index settings
    #[serde(default)]
    pub index: IndexConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.crawler.user_agents.is_empty() {
            return Err(AppError::validation("crawler.user_agents is empty"));
        }
        if self.crawler.user_agents.iter().any(|ua| ua.trim().is_empty()) {
            return Err(AppError::validation("crawler.user_agents contains a blank entry"));
        }
        if self.crawler.timeout_secs == 0 {
            return Err(AppError::validation("crawler.timeout_secs must be > 0"));
        }
        if self.crawler.max_concurrent == 0 {
            return Err(AppError::validation("crawler.max_concurrent must be > 0"));
        }
        if self.crawler.max_attempts == 0 {
            return Err(AppError::validation("crawler.max_attempts must be > 0"));
        }
        if self.crawler.store_retry_limit == 0 {
            return Err(AppError::validation("crawler.store_retry_limit must be > 0"));
        }
        if !self.discovery.archive_url_template.contains("{date}") {
            return Err(AppError::validation(
                "discovery.archive_url_template must contain a {date} placeholder",
            ));
        }
        if self.extraction.body_selector.trim().is_empty() {
            return Err(AppError::validation("extraction.body_selector is empty"));
        }
        if self.index.min_token_length == 0 {
            return Err(AppError::validation("index.min_token_length must be > 0"));
        }
        Ok(())
    }
}

/// HTTP client and crawling behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// User-Agent strings rotated across requests
    #[serde(default = "defaults::user_agents")]
    pub user_agents: Vec<String>,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Minimum delay between requests in milliseconds (rate limit)
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,

    /// Maximum concurrent in-flight fetches
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    /// Maximum fetch attempts per link (initial try + retries)
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds
    #[serde(default = "defaults::retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// How many times a failed store transaction is retried before the
    /// crawl is halted
    #[serde(default = "defaults::store_retry_limit")]
    pub store_retry_limit: u32,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agents: defaults::user_agents(),
            timeout_secs: defaults::timeout(),
            request_delay_ms: defaults::request_delay(),
            max_concurrent: defaults::max_concurrent(),
            max_attempts: defaults::max_attempts(),
            retry_base_delay_ms: defaults::retry_base_delay(),
            store_retry_limit: defaults::store_retry_limit(),
        }
    }
}

/// Archive listing discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Listing page URL with a `{date}` placeholder (date format below)
    #[serde(default = "defaults::archive_url_template")]
    pub archive_url_template: String,

    /// chrono format string for the `{date}` placeholder
    #[serde(default = "defaults::date_format")]
    pub date_format: String,

    /// CSS selector for article links on a listing page
    #[serde(default = "defaults::listing_link_selector")]
    pub link_selector: String,

    /// CSS selector for the pagination anchor elements
    #[serde(default = "defaults::pagination_selector")]
    pub pagination_selector: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            archive_url_template: defaults::archive_url_template(),
            date_format: defaults::date_format(),
            link_selector: defaults::listing_link_selector(),
            pagination_selector: defaults::pagination_selector(),
        }
    }
}

/// Article page extraction selectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// CSS selector for the headline element
    #[serde(default = "defaults::title_selector")]
    pub title_selector: String,

    /// CSS selector for the publication date element
    #[serde(default = "defaults::date_selector")]
    pub date_selector: String,

    /// CSS selector for the body element
    #[serde(default = "defaults::body_selector")]
    pub body_selector: String,

    /// CSS selector for the tag/keyword element, if the site has one
    #[serde(default = "defaults::tags_selector")]
    pub tags_selector: Option<String>,

    /// CSS selector for the author element, if the site has one
    #[serde(default = "defaults::author_selector")]
    pub author_selector: Option<String>,

    /// Selectors for elements removed before body text extraction
    /// (related-article blocks, embedded social media quotes)
    #[serde(default = "defaults::strip_selectors")]
    pub strip_selectors: Vec<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            title_selector: defaults::title_selector(),
            date_selector: defaults::date_selector(),
            body_selector: defaults::body_selector(),
            tags_selector: defaults::tags_selector(),
            author_selector: defaults::author_selector(),
            strip_selectors: defaults::strip_selectors(),
        }
    }
}

/// Body text normalization settings used for fingerprinting and indexing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeConfig {
    /// Regex patterns removed from the body before fingerprinting
    /// (share bars, subscription footers)
    #[serde(default = "defaults::boilerplate_patterns")]
    pub boilerplate_patterns: Vec<String>,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            boilerplate_patterns: defaults::boilerplate_patterns(),
        }
    }
}

/// Similarity index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Minimum token length to index
    #[serde(default = "defaults::min_token_length")]
    pub min_token_length: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            min_token_length: defaults::min_token_length(),
        }
    }
}

mod defaults {
    // Crawler defaults
    pub fn user_agents() -> Vec<String> {
        vec![
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36".into(),
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15".into(),
            "Mozilla/5.0 (X11; Linux x86_64; rv:120.0) Gecko/20100101 Firefox/120.0".into(),
        ]
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn request_delay() -> u64 {
        250
    }
    pub fn max_concurrent() -> usize {
        4
    }
    pub fn max_attempts() -> u32 {
        4
    }
    pub fn retry_base_delay() -> u64 {
        500
    }
    pub fn store_retry_limit() -> u32 {
        3
    }

    // Discovery defaults
    pub fn archive_url_template() -> String {
        "https://www.inform.kz/ru/archive?date={date}".into()
    }
    pub fn date_format() -> String {
        "%d.%m.%Y".into()
    }
    pub fn listing_link_selector() -> String {
        "div.lenta_news_block li a".into()
    }
    pub fn pagination_selector() -> String {
        "p.pagination a".into()
    }

    // Extraction defaults
    pub fn title_selector() -> String {
        "div.article_title".into()
    }
    pub fn date_selector() -> String {
        "div.date_public_art".into()
    }
    pub fn body_selector() -> String {
        "div.article_news_body".into()
    }
    pub fn tags_selector() -> Option<String> {
        Some("div.keyword_art".into())
    }
    pub fn author_selector() -> Option<String> {
        Some("p.name_p".into())
    }
    pub fn strip_selectors() -> Vec<String> {
        vec![
            "div.frame_news_article".into(),
            "blockquote.instagram-media".into(),
        ]
    }

    // Normalization defaults
    pub fn boilerplate_patterns() -> Vec<String> {
        vec![
            r"(?i)share this article.*$".into(),
            r"(?i)subscribe to our (newsletter|channel).*$".into(),
            r"(?i)read (also|more):.*".into(),
        ]
    }

    // Index defaults
    pub fn min_token_length() -> usize {
        2
    }
}
