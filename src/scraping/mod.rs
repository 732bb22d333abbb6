//! SSRF-safe URL validation, tiered HTML extraction, a YouTube transcript
//! extractor, and a circuit breaker guarding every external call this
//! subsystem makes.

pub mod circuit_breaker;
pub mod fetch;
pub mod ssrf;
pub mod youtube;

use std::sync::Arc;

use crate::{
    config::{CircuitBreakerConfig, ScrapingConfig},
    Result,
};

pub use circuit_breaker::{CircuitBreaker, CircuitState, Clock};
pub use fetch::{ContentKind, DocumentMetadata, ScrapeResult};
pub use youtube::{HttpTranscriptSource, RawTranscriptSource};

/// Scrapes a single URL, dispatching to the YouTube transcript extractor
/// or the tiered HTML fetcher by pattern match, with every external call
/// guarded by its own named circuit breaker.
pub struct Scraper {
    client: reqwest::Client,
    config: ScrapingConfig,
    transcript_source: Arc<dyn RawTranscriptSource>,
    html_breaker: CircuitBreaker,
    youtube_breaker: CircuitBreaker,
}

impl Scraper {
    /// Build a scraper using a real HTTP transcript source.
    #[must_use]
    pub fn new(client: reqwest::Client, config: ScrapingConfig, breaker_config: &CircuitBreakerConfig) -> Self {
        let transcript_source = Arc::new(HttpTranscriptSource::new(client.clone()));
        Self::with_transcript_source(client, config, breaker_config, transcript_source)
    }

    /// Build a scraper with an injected transcript source, for testing.
    #[must_use]
    pub fn with_transcript_source(
        client: reqwest::Client,
        config: ScrapingConfig,
        breaker_config: &CircuitBreakerConfig,
        transcript_source: Arc<dyn RawTranscriptSource>,
    ) -> Self {
        Self {
            client,
            config,
            transcript_source,
            html_breaker: CircuitBreaker::new("scrape_html", breaker_config),
            youtube_breaker: CircuitBreaker::new("youtube_transcript", breaker_config),
        }
    }

    /// Scrape `url`. Validates the URL, then dispatches to the YouTube
    /// transcript extractor when it matches a YouTube watch/short URL, or
    /// the tiered HTML fetcher otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is rejected by SSRF validation, the
    /// relevant circuit breaker is open, or the underlying fetch/extract
    /// fails.
    pub async fn scrape(&self, url: &str) -> Result<ScrapeResult> {
        if let Some(video_id) = youtube::extract_video_id(url) {
            let config = &self.config;
            let source = self.transcript_source.as_ref();
            let text = self.youtube_breaker.execute(|| youtube::fetch_transcript(source, &video_id, config)).await?;
            return Ok(ScrapeResult {
                kind: ContentKind::YoutubeTranscript,
                content_length: text.len(),
                truncated: false,
                text,
                metadata: DocumentMetadata::default(),
            });
        }

        ssrf::validate_url(url, self.config.allow_private_ips, &self.config.allowed_domains).await?;

        let client = &self.client;
        let config = &self.config;
        self.html_breaker.execute(|| fetch::fetch(client, url, config)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    struct StubTranscriptSource;

    #[async_trait]
    impl RawTranscriptSource for StubTranscriptSource {
        async fn fetch(&self, _video_id: &str, _timeout: Duration) -> std::result::Result<Vec<youtube::TranscriptSegment>, String> {
            Ok(vec![youtube::TranscriptSegment { text: "hello".to_string() }, youtube::TranscriptSegment { text: "there".to_string() }])
        }
    }

    fn breaker_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig { enabled: true, failure_threshold: 5, half_open_max_attempts: 1, reset_timeout: Duration::from_secs(30) }
    }

    #[tokio::test]
    async fn dispatches_youtube_urls_to_the_transcript_source() {
        let scraper = Scraper::with_transcript_source(
            reqwest::Client::new(),
            ScrapingConfig::default(),
            &breaker_config(),
            Arc::new(StubTranscriptSource),
        );

        let result = scraper.scrape("https://youtube.com/watch?v=dQw4w9WgXcQ").await.unwrap();
        assert_eq!(result.kind, ContentKind::YoutubeTranscript);
        assert_eq!(result.text, "hello there");
    }

    #[tokio::test]
    async fn rejects_ssrf_blocked_html_urls_before_fetching() {
        let scraper =
            Scraper::with_transcript_source(reqwest::Client::new(), ScrapingConfig::default(), &breaker_config(), Arc::new(StubTranscriptSource));

        let err = scraper.scrape("http://169.254.169.254/").await.unwrap_err();
        assert!(matches!(err, crate::Error::SsrfBlocked { .. }));
    }
}
