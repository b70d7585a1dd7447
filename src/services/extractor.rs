// src/services/extractor.rs

//! Article extraction from raw page content.
//!
//! Pure: the same page always yields the same candidate, and no network or
//! storage access happens here. Pages missing a date, tags, or author still
//! extract; only an unrecoverable body (or a page with no recognizable
//! article markup at all) fails.

use scraper::{Html, Selector};

use crate::error::{AppError, Result};
use crate::models::{ArticleCandidate, ExtractionConfig, RawPage};
use crate::utils::text::clean_body;

/// Service for turning fetched pages into article candidates.
pub struct Extractor {
    title_sel: Selector,
    date_sel: Selector,
    body_sel: Selector,
    tags_sel: Option<Selector>,
    author_sel: Option<Selector>,
    strip_sels: Vec<Selector>,
}

impl Extractor {
    /// Create an extractor, parsing all configured selectors once.
    pub fn new(config: &ExtractionConfig) -> Result<Self> {
        Ok(Self {
            title_sel: parse_selector(&config.title_selector)?,
            date_sel: parse_selector(&config.date_selector)?,
            body_sel: parse_selector(&config.body_selector)?,
            tags_sel: config
                .tags_selector
                .as_deref()
                .map(parse_selector)
                .transpose()?,
            author_sel: config
                .author_selector
                .as_deref()
                .map(parse_selector)
                .transpose()?,
            strip_sels: config
                .strip_selectors
                .iter()
                .map(|s| parse_selector(s))
                .collect::<Result<Vec<_>>>()?,
        })
    }

    /// Extract an article candidate from a fetched page.
    pub fn extract(&self, page: &RawPage) -> Result<ArticleCandidate> {
        let mut document = Html::parse_document(&page.body);
        self.strip_boilerplate(&mut document);

        let title = self
            .select_text(&document, &self.title_sel)
            .unwrap_or_default();

        let date = self.select_text(&document, &self.date_sel);
        let author = self
            .author_sel
            .as_ref()
            .and_then(|sel| self.select_text(&document, sel));

        let tags = self
            .tags_sel
            .as_ref()
            .and_then(|sel| self.select_text(&document, sel))
            .map(|raw| parse_tags(&raw))
            .unwrap_or_default();

        let body = document
            .select(&self.body_sel)
            .next()
            .map(|el| clean_body(&el.text().collect::<Vec<_>>().join("\n")))
            .filter(|text| !text.is_empty())
            .ok_or_else(|| AppError::extraction(&page.url, "article body missing or empty"))?;

        Ok(ArticleCandidate {
            link: page.url.clone(),
            title,
            date,
            tags,
            author,
            body,
        })
    }

    /// Detach related-article blocks and embedded quotes before extraction,
    /// so they pollute neither the body nor the fingerprint.
    fn strip_boilerplate(&self, document: &mut Html) {
        let ids: Vec<_> = self
            .strip_sels
            .iter()
            .flat_map(|sel| document.select(sel).map(|el| el.id()).collect::<Vec<_>>())
            .collect();
        for id in ids {
            if let Some(mut node) = document.tree.get_mut(id) {
                node.detach();
            }
        }
    }

    fn select_text(&self, document: &Html, selector: &Selector) -> Option<String> {
        document.select(selector).next().and_then(|el| {
            let text: String = el.text().collect::<Vec<_>>().join(" ");
            let trimmed = text.split_whitespace().collect::<Vec<_>>().join(" ");
            if trimmed.is_empty() { None } else { Some(trimmed) }
        })
    }
}

/// Split a raw tag string into individual tags.
fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(['#', ','])
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExtractionConfig;

    fn extractor() -> Extractor {
        Extractor::new(&ExtractionConfig::default()).unwrap()
    }

    fn page(html: &str) -> RawPage {
        RawPage {
            url: "https://example.com/article/1".to_string(),
            body: html.to_string(),
        }
    }

    const FULL_PAGE: &str = r#"
        <html><body>
            <div class="article_title">Markets rise on good news</div>
            <div class="date_public_art">05.08.2026 10:00</div>
            <div class="article_news_body">
                <p>Stock markets rose today.</p>
                <div class="frame_news_article"><a href="/other">Related story</a></div>
                <p>Analysts expect further gains.</p>
            </div>
            <div class="keyword_art">#economy #markets</div>
            <p class="name_p">A. Reporter</p>
        </body></html>
    "#;

    #[test]
    fn test_extract_full_page() {
        let candidate = extractor().extract(&page(FULL_PAGE)).unwrap();
        assert_eq!(candidate.title, "Markets rise on good news");
        assert_eq!(candidate.date.as_deref(), Some("05.08.2026 10:00"));
        assert_eq!(candidate.tags, vec!["economy", "markets"]);
        assert_eq!(candidate.author.as_deref(), Some("A. Reporter"));
        assert!(candidate.body.contains("Stock markets rose today."));
        assert!(candidate.body.contains("Analysts expect further gains."));
    }

    #[test]
    fn test_strip_selectors_remove_related_links() {
        let candidate = extractor().extract(&page(FULL_PAGE)).unwrap();
        assert!(!candidate.body.contains("Related story"));
    }

    #[test]
    fn test_partial_page_degrades_gracefully() {
        let html = r#"
            <html><body>
                <div class="article_title">Headline</div>
                <div class="article_news_body">Some body text.</div>
            </body></html>
        "#;
        let candidate = extractor().extract(&page(html)).unwrap();
        assert_eq!(candidate.date, None);
        assert_eq!(candidate.author, None);
        assert!(candidate.tags.is_empty());
        assert_eq!(candidate.body, "Some body text.");
    }

    #[test]
    fn test_missing_body_is_an_error() {
        let html = r#"<html><body><div class="article_title">Only a title</div></body></html>"#;
        let err = extractor().extract(&page(html)).unwrap_err();
        assert!(matches!(err, AppError::Extraction { .. }));
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let a = extractor().extract(&page(FULL_PAGE)).unwrap();
        let b = extractor().extract(&page(FULL_PAGE)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_selector_is_rejected() {
        let config = ExtractionConfig {
            body_selector: "[[invalid".to_string(),
            ..ExtractionConfig::default()
        };
        assert!(Extractor::new(&config).is_err());
    }
}
