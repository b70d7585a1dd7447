// src/services/discovery.rs

//! Article link discovery from date-keyed archive listing pages.
//!
//! For a given date, fetches the first listing page, collects article links,
//! walks the pagination block to the remaining pages, and collects their
//! links too. Relative links are resolved against the listing URL.

use std::collections::HashSet;

use chrono::{Duration, NaiveDate};
use scraper::{Html, Selector};

use crate::error::{AppError, Result};
use crate::models::{DiscoveryConfig, RawPage};
use crate::services::Fetcher;
use crate::utils::resolve;

/// Service for discovering article links from archive listings.
pub struct LinkDiscoverer<'a> {
    config: &'a DiscoveryConfig,
    fetcher: &'a Fetcher,
    link_sel: Selector,
    page_sel: Selector,
}

impl<'a> LinkDiscoverer<'a> {
    /// Create a discoverer, parsing the listing selectors once.
    pub fn new(config: &'a DiscoveryConfig, fetcher: &'a Fetcher) -> Result<Self> {
        Ok(Self {
            config,
            fetcher,
            link_sel: parse_selector(&config.link_selector)?,
            page_sel: parse_selector(&config.pagination_selector)?,
        })
    }

    /// Discover all article links published on the given date.
    pub async fn discover(&self, date: NaiveDate) -> Result<Vec<String>> {
        let listing_url = self.listing_url(date);
        log::info!("Discovering article links from {}", listing_url);

        let first_page = self.fetcher.fetch(&listing_url).await?;

        let mut seen = HashSet::new();
        let mut links = Vec::new();
        collect_links(&first_page, &self.link_sel, &mut seen, &mut links);

        for page_url in self.extract_pages(&first_page) {
            match self.fetcher.fetch(&page_url).await {
                Ok(page) => collect_links(&page, &self.link_sel, &mut seen, &mut links),
                Err(e) => log::warn!("Skipping listing page {}: {}", page_url, e),
            }
        }

        log::info!("Discovered {} article link(s) for {}", links.len(), date);
        Ok(links)
    }

    /// URL of the listing page for a date.
    fn listing_url(&self, date: NaiveDate) -> String {
        let formatted = date.format(&self.config.date_format).to_string();
        self.config.archive_url_template.replace("{date}", &formatted)
    }

    /// Extract the remaining pagination page URLs from the first page.
    fn extract_pages(&self, page: &RawPage) -> Vec<String> {
        let document = Html::parse_document(&page.body);
        let mut seen = HashSet::new();
        let mut pages = Vec::new();
        for anchor in document.select(&self.page_sel) {
            if let Some(href) = anchor.value().attr("href") {
                if let Some(resolved) = resolve(&page.url, href) {
                    if resolved != page.url && seen.insert(resolved.clone()) {
                        pages.push(resolved);
                    }
                }
            }
        }
        pages
    }
}

/// Collect article links from a listing page, deduplicating across pages.
fn collect_links(
    page: &RawPage,
    link_sel: &Selector,
    seen: &mut HashSet<String>,
    out: &mut Vec<String>,
) {
    let document = Html::parse_document(&page.body);
    for anchor in document.select(link_sel) {
        if let Some(href) = anchor.value().attr("href") {
            if let Some(resolved) = resolve(&page.url, href.trim()) {
                if seen.insert(resolved.clone()) {
                    out.push(resolved);
                }
            }
        }
    }
}

/// Generate the dates covered by a crawl range.
///
/// With no end date, yields just the start day. Otherwise yields every day
/// from `start` up to but not including `end`.
pub fn date_range(start: NaiveDate, end: Option<NaiveDate>) -> Result<Vec<NaiveDate>> {
    let end = end.unwrap_or(start + Duration::days(1));
    if start >= end {
        return Err(AppError::validation(
            "end date must be after the start date",
        ));
    }

    let mut dates = Vec::new();
    let mut current = start;
    while current < end {
        dates.push(current);
        current = current + Duration::days(1);
    }
    Ok(dates)
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}
