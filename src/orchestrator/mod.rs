//! Dispatches the three tool operations (`search`, `scrape`,
//! `search_and_scrape`), wiring together the cache, the scraping
//! pipeline, deduplication, annotation presets, and per-tool metrics.

pub mod annotations;
pub mod dedup;
pub mod metrics;
pub mod search_client;

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde_json::json;

use crate::{
    cache::{Cache, CacheOptions},
    config::{CircuitBreakerConfig, OrchestratorConfig},
    scraping::{CircuitBreaker, Scraper},
    Error, Result,
};

pub use annotations::{Annotation, Audience};
pub use dedup::{CombinedContent, DedupStats, SourceContent};
pub use metrics::{CallOutcome, MetricsSnapshot, ToolMetrics};
pub use search_client::{SearchClient, SearchFilters, SearchResultItem, TimeRange};

/// A single unit of annotated output text.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ContentBlock {
    /// The block's text.
    pub text: String,
    /// Audience/priority/timestamp metadata.
    pub annotation: Annotation,
}

/// The result of a `search` call.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchOutput {
    /// Ordered search results (1-10).
    pub results: Vec<SearchResultItem>,
    /// One annotated block per result, decaying by position.
    pub blocks: Vec<ContentBlock>,
}

/// The result of a `scrape` call.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ScrapeOutput {
    /// The extracted content and metadata.
    pub result: crate::scraping::ScrapeResult,
    /// The primary annotated text block.
    pub block: ContentBlock,
}

/// One source's outcome within a `search_and_scrape` fan-out.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SourceOutcome {
    /// The source URL.
    pub url: String,
    /// Whether the scrape succeeded.
    pub succeeded: bool,
    /// The error's stable type tag, if it failed.
    pub error: Option<String>,
}

/// The result of a `search_and_scrape` call.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchAndScrapeOutput {
    /// The combined (optionally deduplicated) text.
    pub text: String,
    /// Per-source success/failure, if `include_sources` was set.
    pub sources: Option<Vec<SourceOutcome>>,
    /// Deduplication statistics, if `deduplicate` was set.
    pub dedup_stats: Option<DedupStats>,
    /// Annotated blocks: a primary combined block plus one summary block.
    pub blocks: Vec<ContentBlock>,
}

/// Ties the cache, scraping pipeline, search client, deduplication, and
/// per-tool metrics together into the three exposed tool operations.
pub struct Orchestrator {
    cache: Cache,
    scraper: Arc<Scraper>,
    search_client: Option<SearchClient>,
    search_breaker: Arc<CircuitBreaker>,
    config: OrchestratorConfig,
    search_metrics: ToolMetrics,
    scrape_metrics: ToolMetrics,
    search_and_scrape_metrics: ToolMetrics,
}

impl Orchestrator {
    /// Build an orchestrator. `search_client` is `None` when no API key
    /// is configured; `search` and `search_and_scrape` then fail fast
    /// with [`Error::MissingRequiredEnv`].
    #[must_use]
    pub fn new(
        cache: Cache,
        scraper: Arc<Scraper>,
        search_client: Option<SearchClient>,
        config: OrchestratorConfig,
        breaker_config: &CircuitBreakerConfig,
    ) -> Self {
        let reservoir = config.metrics_reservoir_size;
        Self {
            cache,
            scraper,
            search_client,
            search_breaker: Arc::new(CircuitBreaker::new("google_search", breaker_config)),
            config,
            search_metrics: ToolMetrics::new(reservoir),
            scrape_metrics: ToolMetrics::new(reservoir),
            search_and_scrape_metrics: ToolMetrics::new(reservoir),
        }
    }

    /// This tool's recorded latency/outcome statistics.
    #[must_use]
    pub fn search_metrics(&self) -> MetricsSnapshot {
        self.search_metrics.snapshot()
    }

    /// This tool's recorded latency/outcome statistics.
    #[must_use]
    pub fn scrape_metrics(&self) -> MetricsSnapshot {
        self.scrape_metrics.snapshot()
    }

    /// This tool's recorded latency/outcome statistics.
    #[must_use]
    pub fn search_and_scrape_metrics(&self) -> MetricsSnapshot {
        self.search_and_scrape_metrics.snapshot()
    }

    /// Run a search, returning an ordered list of URLs with annotated
    /// per-result blocks. Cached under the `googleSearch` namespace.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingRequiredEnv`] if no search API key is
    /// configured, or whatever the underlying search call returns.
    pub async fn search(&self, query: &str, num_results: u8, filters: &SearchFilters) -> Result<SearchOutput> {
        let started = Instant::now();
        let client = self.search_client.as_ref().ok_or_else(|| Error::MissingRequiredEnv("google_search_api_key".to_string()))?.clone();

        let arguments = json!({ "query": query, "num_results": num_results, "filters": filters });
        let options = CacheOptions { ttl: Some(self.config.search_cache_ttl), stale_time: Some(self.config.search_cache_stale_time), ..CacheOptions::default() };

        let query_owned = query.to_string();
        let filters_owned = filters.clone();

        let breaker = Arc::clone(&self.search_breaker);
        let hits_before = self.cache.stats().hits;
        let value = self
            .cache
            .get_or_compute("googleSearch", &arguments, options, move || async move {
                let results = breaker.execute(|| client.search(&query_owned, num_results, &filters_owned)).await?;
                serde_json::to_value(&results).map_err(Error::from)
            })
            .await;
        let cache_hit = self.cache.stats().hits > hits_before;

        let results: Vec<SearchResultItem> = match value {
            Ok(v) => serde_json::from_value(v).map_err(Error::from)?,
            Err(e) => {
                self.search_metrics.record(CallOutcome { duration: started.elapsed(), success: false, cache_hit });
                return Err(e);
            }
        };

        let blocks = results
            .iter()
            .enumerate()
            .map(|(i, r)| ContentBlock { text: format_search_result(r), annotation: Annotation::search_result(u32::try_from(i + 1).unwrap_or(u32::MAX)) })
            .collect();

        self.search_metrics.record(CallOutcome { duration: started.elapsed(), success: true, cache_hit });

        Ok(SearchOutput { results, blocks })
    }

    /// Scrape a single URL. Cached under the `scrapePage` namespace.
    ///
    /// # Errors
    ///
    /// Returns whatever the underlying scrape (SSRF validation, circuit
    /// breaker, fetch/extract) returns.
    pub async fn scrape(&self, url: &str) -> Result<ScrapeOutput> {
        let started = Instant::now();
        let arguments = json!({ "url": url });
        let options = CacheOptions { ttl: Some(self.config.scrape_cache_ttl), stale_time: Some(self.config.scrape_cache_stale_time), ..CacheOptions::default() };

        let scraper = Arc::clone(&self.scraper);
        let url_owned = url.to_string();

        let hits_before = self.cache.stats().hits;
        let value = self
            .cache
            .get_or_compute("scrapePage", &arguments, options, move || async move {
                let result = scraper.scrape(&url_owned).await?;
                serde_json::to_value(&result).map_err(Error::from)
            })
            .await;
        let cache_hit = self.cache.stats().hits > hits_before;

        match value {
            Ok(v) => {
                let result: crate::scraping::ScrapeResult = serde_json::from_value(v).map_err(Error::from)?;
                self.scrape_metrics.record(CallOutcome { duration: started.elapsed(), success: true, cache_hit });
                let block = ContentBlock { text: result.text.clone(), annotation: Annotation::primary() };
                Ok(ScrapeOutput { result, block })
            }
            Err(e) => {
                self.scrape_metrics.record(CallOutcome { duration: started.elapsed(), success: false, cache_hit });
                Err(e)
            }
        }
    }

    /// Run a search, then concurrently scrape up to `num_results` of its
    /// URLs, combining (and optionally deduplicating) their text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllSourcesFailed`] if every scraped source
    /// failed, or whatever the search step itself returns.
    pub async fn search_and_scrape(&self, query: &str, num_results: u8, include_sources: bool, deduplicate: bool) -> Result<SearchAndScrapeOutput> {
        let started = Instant::now();
        let search_result = self.search(query, num_results, &SearchFilters::default()).await?;

        let concurrency = self.config.max_concurrent_scrapes.max(1);
        let urls: Vec<String> = search_result.results.iter().map(|r| r.url.clone()).collect();

        let outcomes: Vec<(String, Result<crate::scraping::ScrapeResult>)> = stream::iter(urls.into_iter())
            .map(|url| async move {
                let arguments = json!({ "url": url });
                let options = CacheOptions { ttl: Some(self.config.scrape_cache_ttl), stale_time: Some(self.config.scrape_cache_stale_time), ..CacheOptions::default() };
                let scraper = Arc::clone(&self.scraper);
                let url_for_compute = url.clone();
                let value = self
                    .cache
                    .get_or_compute("scrapePage", &arguments, options, move || async move {
                        let result = scraper.scrape(&url_for_compute).await?;
                        serde_json::to_value(&result).map_err(Error::from)
                    })
                    .await;
                let result = value.and_then(|v| serde_json::from_value(v).map_err(Error::from));
                (url, result)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut sources: Vec<SourceContent> = Vec::new();
        let mut source_outcomes: Vec<SourceOutcome> = Vec::new();
        let mut failures: Vec<(String, String)> = Vec::new();

        for (url, result) in outcomes {
            match result {
                Ok(scraped) => {
                    source_outcomes.push(SourceOutcome { url: url.clone(), succeeded: true, error: None });
                    sources.push(SourceContent { url, text: scraped.text });
                }
                Err(e) => {
                    source_outcomes.push(SourceOutcome { url: url.clone(), succeeded: false, error: Some(e.type_tag().to_string()) });
                    failures.push((url, e.type_tag().to_string()));
                }
            }
        }

        if sources.is_empty() && !source_outcomes.is_empty() {
            self.search_and_scrape_metrics.record(CallOutcome { duration: started.elapsed(), success: false, cache_hit: false });
            return Err(Error::AllSourcesFailed { query: query.to_string(), failures });
        }

        let combined = dedup::combine(&sources, deduplicate, include_sources, self.config.dedup_min_paragraph_length, self.config.dedup_similarity_threshold);

        let mut blocks = vec![ContentBlock { text: combined.text.clone(), annotation: Annotation::primary() }];
        if let Some(stats) = &combined.stats {
            blocks.push(ContentBlock {
                text: format!("{} of {} sources deduplicated; {:.1}% reduction.", stats.sources_processed, sources.len(), stats.reduction_percent),
                annotation: Annotation::metadata(),
            });
        }

        self.search_and_scrape_metrics.record(CallOutcome { duration: started.elapsed(), success: true, cache_hit: false });

        Ok(SearchAndScrapeOutput {
            text: combined.text,
            sources: include_sources.then_some(source_outcomes),
            dedup_stats: combined.stats,
            blocks,
        })
    }
}

fn format_search_result(item: &SearchResultItem) -> String {
    match (&item.title, &item.snippet) {
        (Some(title), Some(snippet)) => format!("{title}\n{}\n{snippet}", item.url),
        (Some(title), None) => format!("{title}\n{}", item.url),
        (None, Some(snippet)) => format!("{}\n{snippet}", item.url),
        (None, None) => item.url.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, CircuitBreakerConfig, ScrapingConfig};
    use std::time::Duration;
    use tempfile::tempdir;

    async fn test_cache() -> Cache {
        let dir = tempdir().unwrap();
        let config = CacheConfig { root: dir.keep(), disable_background_tasks: true, ..CacheConfig::default() };
        Cache::new(config).await.unwrap()
    }

    fn test_breaker_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig { enabled: true, failure_threshold: 3, half_open_max_attempts: 1, reset_timeout: Duration::from_secs(30) }
    }

    fn test_scraper() -> Arc<Scraper> {
        Arc::new(Scraper::new(reqwest::Client::new(), ScrapingConfig::default(), &test_breaker_config()))
    }

    #[tokio::test]
    async fn search_without_api_key_fails_fast() {
        let orchestrator = Orchestrator::new(test_cache().await, test_scraper(), None, OrchestratorConfig::default(), &test_breaker_config());
        let err = orchestrator.search("rust", 5, &SearchFilters::default()).await.unwrap_err();
        assert!(matches!(err, Error::MissingRequiredEnv(_)));
    }

    #[tokio::test]
    async fn scrape_rejects_ssrf_blocked_urls() {
        let orchestrator = Orchestrator::new(test_cache().await, test_scraper(), None, OrchestratorConfig::default(), &test_breaker_config());
        let err = orchestrator.scrape("http://169.254.169.254/").await.unwrap_err();
        assert!(matches!(err, Error::SsrfBlocked { .. }));
    }

    #[tokio::test]
    async fn search_and_scrape_without_api_key_fails_fast() {
        let orchestrator = Orchestrator::new(test_cache().await, test_scraper(), None, OrchestratorConfig::default(), &test_breaker_config());
        let err = orchestrator.search_and_scrape("rust", 3, true, true).await.unwrap_err();
        assert!(matches!(err, Error::MissingRequiredEnv(_)));
    }
}
