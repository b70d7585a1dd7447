//! Pipeline stages for article ingestion.
//!
//! - `resolve`: content fingerprinting and insert/skip/update decisions
//! - `index`: TF-IDF similarity index over stored bodies
//! - `crawl`: the orchestrator driving links through the full pipeline

pub mod crawl;
pub mod index;
pub mod resolve;

pub use crawl::{CrawlRunner, CrawlState, CrawlStatus};
pub use index::{SearchHit, SimilarityIndex};
pub use resolve::{ChangedFields, Decision, IdentityResolver};
