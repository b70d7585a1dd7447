// src/services/fetcher.rs

//! Resilient page fetching.
//!
//! One `reqwest::Client` is shared across all requests so connections are
//! reused instead of opened per request. The user agent rotates across a
//! configured list, and transient failures are retried with exponential
//! backoff up to a bounded attempt count. Every failure is classified and
//! logged with link, attempt count, and elapsed time.

use std::error::Error as StdError;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use reqwest::Client;
use tokio::sync::watch;

use crate::error::{AppError, FetchError, FetchErrorKind, Result};
use crate::models::{CrawlerConfig, RawPage};

/// Service for fetching article pages.
pub struct Fetcher {
    config: Arc<CrawlerConfig>,
    client: Client,
    ua_cursor: AtomicUsize,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Fetcher {
    /// Create a new fetcher with the given configuration.
    pub fn new(config: Arc<CrawlerConfig>) -> Result<Self> {
        if config.user_agents.is_empty() {
            return Err(AppError::config("crawler.user_agents must not be empty"));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            config,
            client,
            ua_cursor: AtomicUsize::new(0),
            shutdown: None,
        })
    }

    /// Attach a shutdown signal checked between attempts.
    ///
    /// Cancellation happens at fetch boundaries only; an in-flight request
    /// is allowed to finish its attempt.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Fetch a page, retrying transient failures with exponential backoff.
    pub async fn fetch(&self, link: &str) -> std::result::Result<RawPage, FetchError> {
        let started = Instant::now();
        let mut last_kind = FetchErrorKind::Other;

        for attempt in 1..=self.config.max_attempts {
            match self.try_fetch(link).await {
                Ok(page) => {
                    log::debug!(
                        "Fetched {} in {:?} (attempt {})",
                        link,
                        started.elapsed(),
                        attempt
                    );
                    return Ok(page);
                }
                Err(kind) => {
                    last_kind = kind;
                    let terminal = FetchError {
                        kind,
                        link: link.to_string(),
                        attempts: attempt,
                    };

                    if !terminal.is_retryable() || attempt == self.config.max_attempts {
                        log::warn!(
                            "Giving up on {} after {} attempt(s) ({:?} elapsed): {}",
                            link,
                            attempt,
                            started.elapsed(),
                            kind
                        );
                        return Err(terminal);
                    }

                    let delay = self.backoff_delay(attempt);
                    log::warn!(
                        "Fetch attempt {}/{} failed for {} ({}), retrying in {:?}",
                        attempt,
                        self.config.max_attempts,
                        link,
                        kind,
                        delay
                    );

                    if self.wait_or_shutdown(delay).await {
                        log::info!("Shutdown signalled, abandoning retries for {}", link);
                        break;
                    }
                }
            }
        }

        Err(FetchError {
            kind: last_kind,
            link: link.to_string(),
            attempts: self.config.max_attempts,
        })
    }

    /// Issue a single request with the next user agent in rotation.
    async fn try_fetch(&self, link: &str) -> std::result::Result<RawPage, FetchErrorKind> {
        let response = self
            .client
            .get(link)
            .header(reqwest::header::USER_AGENT, self.next_user_agent())
            .send()
            .await
            .map_err(|e| classify(&e))?;

        let response = response.error_for_status().map_err(|e| classify(&e))?;
        let url = response.url().to_string();
        let body = response.text().await.map_err(|e| classify(&e))?;

        Ok(RawPage { url, body })
    }

    /// Exponential backoff: base * 2^(attempt - 1).
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let multiplier = 1u64 << (attempt - 1).min(16);
        Duration::from_millis(self.config.retry_base_delay_ms.saturating_mul(multiplier))
    }

    fn next_user_agent(&self) -> &str {
        let agents = &self.config.user_agents;
        let idx = self.ua_cursor.fetch_add(1, Ordering::Relaxed) % agents.len();
        &agents[idx]
    }

    /// Sleep for `delay`, returning true if shutdown was signalled first.
    async fn wait_or_shutdown(&self, delay: Duration) -> bool {
        match self.shutdown.clone() {
            Some(mut rx) => {
                if *rx.borrow() {
                    return true;
                }
                tokio::select! {
                    _ = tokio::time::sleep(delay) => false,
                    changed = rx.changed() => changed.is_ok() && *rx.borrow(),
                }
            }
            None => {
                tokio::time::sleep(delay).await;
                false
            }
        }
    }
}

/// Classify a reqwest error into the retry taxonomy.
fn classify(error: &reqwest::Error) -> FetchErrorKind {
    if error.is_timeout() {
        return FetchErrorKind::Timeout;
    }
    if let Some(status) = error.status() {
        if status == reqwest::StatusCode::NOT_FOUND {
            return FetchErrorKind::NotFound;
        }
        return FetchErrorKind::ProtocolError;
    }
    if error.is_connect() || io_connection_dropped(error) {
        return FetchErrorKind::ConnectionReset;
    }
    if error.is_body() || error.is_decode() || error.is_request() {
        return FetchErrorKind::ProtocolError;
    }
    FetchErrorKind::Other
}

/// Walk the source chain looking for a dropped-connection I/O error.
fn io_connection_dropped(error: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = error.source();
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ) {
                return true;
            }
        }
        source = err.source();
    }
    false
}
