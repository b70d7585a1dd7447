// src/models/mod.rs

//! Domain models for the ingestion pipeline.

mod article;
mod config;

// Re-export all public types
pub use article::{ArticleCandidate, ArticleRecord, CrawlStats, RawPage};
pub use config::{
    Config, CrawlerConfig, DiscoveryConfig, ExtractionConfig, IndexConfig, NormalizeConfig,
};
