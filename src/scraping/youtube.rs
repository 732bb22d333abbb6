//! YouTube transcript extraction: video id parsing, a pluggable raw
//! fetcher, error classification, and exponential-backoff-with-jitter
//! retry.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use regex::Regex;
use std::sync::LazyLock;

use crate::{config::ScrapingConfig, error::YoutubeErrorKind, Error, Result};

static VIDEO_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:youtu\.be/|youtube\.com/watch\?v=)([A-Za-z0-9_-]{11})").expect("static regex is valid"));

/// Extract an 11-character video id from a YouTube URL, if present.
#[must_use]
pub fn extract_video_id(url: &str) -> Option<String> {
    VIDEO_ID_RE.captures(url).map(|c| c[1].to_string())
}

/// A single caption segment as returned by the underlying transcript
/// source, before joining.
#[derive(Debug, Clone)]
pub struct TranscriptSegment {
    /// The segment's text.
    pub text: String,
}

/// Fetches the raw, unclassified transcript for a video id. Implementations
/// report failures as plain strings; [`classify`] turns those strings into
/// the closed [`YoutubeErrorKind`] taxonomy by substring matching, exactly
/// as an upstream library's free-form error messages would be classified.
#[async_trait]
pub trait RawTranscriptSource: Send + Sync {
    /// Fetch the transcript, or `Err(message)` describing what went wrong.
    async fn fetch(&self, video_id: &str, timeout: Duration) -> std::result::Result<Vec<TranscriptSegment>, String>;
}

/// Fetches transcripts by scraping the watch page for a caption track URL
/// and downloading its timed-text payload.
pub struct HttpTranscriptSource {
    client: reqwest::Client,
}

impl HttpTranscriptSource {
    /// Build a source using the given HTTP client.
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn find_caption_track_url(watch_page_html: &str) -> Option<String> {
        let marker = "\"captionTracks\":";
        let start = watch_page_html.find(marker)? + marker.len();
        let tail = &watch_page_html[start..];
        let array_end = tail.find(']')?;
        let array = &tail[..=array_end];
        let url_marker = "\"baseUrl\":\"";
        let url_start = array.find(url_marker)? + url_marker.len();
        let rest = &array[url_start..];
        let url_end = rest.find('"')?;
        Some(rest[..url_end].replace("\\u0026", "&"))
    }

    fn parse_transcript_xml(xml: &str) -> Vec<TranscriptSegment> {
        let mut out = Vec::new();
        for chunk in xml.split("<text") {
            let Some(close) = chunk.find('>') else { continue };
            let Some(end) = chunk.find("</text>") else { continue };
            if close >= end {
                continue;
            }
            let text = &chunk[close + 1..end];
            let decoded = text.replace("&amp;", "&").replace("&#39;", "'").replace("&quot;", "\"").replace("&lt;", "<").replace("&gt;", ">");
            if !decoded.trim().is_empty() {
                out.push(TranscriptSegment { text: decoded });
            }
        }
        out
    }
}

#[async_trait]
impl RawTranscriptSource for HttpTranscriptSource {
    async fn fetch(&self, video_id: &str, timeout: Duration) -> std::result::Result<Vec<TranscriptSegment>, String> {
        let watch_url = format!("https://www.youtube.com/watch?v={video_id}");
        let resp = self
            .client
            .get(&watch_url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { "request timed out".to_string() } else { format!("network error: {e}") })?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err("429 rate limit exceeded".to_string());
        }
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err("video not found".to_string());
        }
        if !resp.status().is_success() {
            return Err(format!("unexpected status {}", resp.status()));
        }

        let html = resp.text().await.map_err(|e| format!("network error reading body: {e}"))?;

        if html.contains("\"status\":\"PRIVATE_VIDEO\"") || html.contains("This video is private") {
            return Err("this video is private".to_string());
        }
        if html.contains("\"status\":\"ERROR\"") && html.contains("Video unavailable") {
            return Err("video unavailable".to_string());
        }
        if html.contains("not available in your country") {
            return Err("content is region blocked in your country".to_string());
        }

        let Some(track_url) = Self::find_caption_track_url(&html) else {
            return Err("transcript disabled: no caption tracks found".to_string());
        };

        let xml_resp = self.client.get(&track_url).timeout(timeout).send().await.map_err(|e| format!("network error: {e}"))?;
        let xml = xml_resp.text().await.map_err(|e| format!("network error reading transcript body: {e}"))?;

        let segments = Self::parse_transcript_xml(&xml);
        if segments.is_empty() {
            return Err("empty transcript list".to_string());
        }
        Ok(segments)
    }
}

/// Classify a raw, free-form error message into the closed taxonomy.
/// Case-insensitive substring matching, checked in a fixed priority order.
#[must_use]
pub fn classify(raw_message: &str) -> YoutubeErrorKind {
    let m = raw_message.to_lowercase();

    if m.contains("disabled") {
        YoutubeErrorKind::TranscriptDisabled
    } else if m.contains("private") {
        YoutubeErrorKind::PrivateVideo
    } else if m.contains("not found") || m.contains("404") {
        YoutubeErrorKind::VideoNotFound
    } else if m.contains("unavailable") {
        YoutubeErrorKind::VideoUnavailable
    } else if m.contains("region") || m.contains("country") {
        YoutubeErrorKind::RegionBlocked
    } else if m.contains("429") || m.contains("rate limit") {
        YoutubeErrorKind::RateLimited
    } else if m.contains("timeout") || m.contains("timed out") {
        YoutubeErrorKind::Timeout
    } else if m.contains("is not a function") || m.contains("cannot read propert") {
        YoutubeErrorKind::LibraryError
    } else if m.contains("network") || m.contains("dns") || m.contains("connection") {
        YoutubeErrorKind::NetworkError
    } else if m.contains("parse") || m.contains("parsing") || m.contains("invalid xml") || m.contains("invalid json") {
        YoutubeErrorKind::ParsingError
    } else {
        YoutubeErrorKind::Unknown
    }
}

/// Classify the special case of an empty or missing segment list, which
/// does not come from a raised error and so needs its own rule: `null`
/// (the source never replied with a list at all) means the extractor
/// itself misbehaved; an empty list means there was nothing to caption.
#[must_use]
pub fn classify_empty_result(response_was_null: bool) -> YoutubeErrorKind {
    if response_was_null {
        YoutubeErrorKind::LibraryError
    } else {
        YoutubeErrorKind::TranscriptDisabled
    }
}

/// Fixed, per-kind user-facing message template naming the video id and
/// an actionable next step.
#[must_use]
pub fn user_message(kind: YoutubeErrorKind, video_id: &str) -> String {
    match kind {
        YoutubeErrorKind::TranscriptDisabled => format!("The owner of video {video_id} has disabled transcripts/captions for this video."),
        YoutubeErrorKind::VideoUnavailable => format!("Video {video_id} is not currently available; it may have been removed or deleted."),
        YoutubeErrorKind::VideoNotFound => format!("No video was found with id {video_id}; verify the id is correct."),
        YoutubeErrorKind::PrivateVideo => format!("Video {video_id} is private and its transcript cannot be retrieved."),
        YoutubeErrorKind::RegionBlocked => format!("Video {video_id} is blocked in the requester's region."),
        YoutubeErrorKind::RateLimited => format!("Transcript requests for {video_id} are being rate-limited; wait a few minutes and try again."),
        YoutubeErrorKind::Timeout => format!("Fetching the transcript for {video_id} timed out; try again shortly."),
        YoutubeErrorKind::NetworkError => format!("A network error occurred while fetching the transcript for {video_id}; try again."),
        YoutubeErrorKind::ParsingError => format!("The transcript payload for {video_id} could not be parsed."),
        YoutubeErrorKind::LibraryError => format!("An unexpected internal error occurred while extracting the transcript for {video_id}."),
        YoutubeErrorKind::Unknown => format!("An unknown error occurred while fetching the transcript for {video_id}."),
    }
}

fn backoff_delay(config: &ScrapingConfig, attempt: u32, kind: YoutubeErrorKind) -> Duration {
    let base = config.youtube_base_delay.as_secs_f64();
    #[allow(clippy::cast_precision_loss)]
    let exponent = (attempt - 1) as f64;
    let mut delay_secs = base * config.youtube_exponential_base.powf(exponent);

    if kind == YoutubeErrorKind::RateLimited {
        delay_secs *= 2.0;
    }

    let max_secs = config.youtube_max_delay.as_secs_f64();
    delay_secs = delay_secs.min(max_secs);

    let jitter_ceiling = delay_secs * config.youtube_jitter_factor;
    let jitter = if jitter_ceiling > 0.0 { rand::rng().random_range(0.0..jitter_ceiling) } else { 0.0 };

    Duration::from_secs_f64(delay_secs + jitter)
}

/// Fetch and join a video's transcript, retrying retryable failures with
/// exponential backoff and jitter.
///
/// # Errors
///
/// Returns [`Error::Youtube`] with a classified kind once attempts are
/// exhausted (or immediately for a non-retryable kind).
pub async fn fetch_transcript(source: &dyn RawTranscriptSource, video_id: &str, config: &ScrapingConfig) -> Result<String> {
    let mut last_kind = YoutubeErrorKind::Unknown;
    let mut last_message = String::new();

    for attempt in 1..=config.youtube_max_attempts {
        match source.fetch(video_id, config.youtube_timeout).await {
            Ok(segments) if segments.is_empty() => {
                last_kind = classify_empty_result(false);
                last_message = "empty transcript list".to_string();
            }
            Ok(segments) => {
                let joined = segments.iter().map(|s| s.text.as_str()).collect::<Vec<_>>().join(" ");
                return Ok(joined);
            }
            Err(message) => {
                last_kind = classify(&message);
                last_message = message;
            }
        }

        let is_last_attempt = attempt == config.youtube_max_attempts;
        if is_last_attempt || !last_kind.is_retryable() {
            break;
        }

        tokio::time::sleep(backoff_delay(config, attempt, last_kind)).await;
    }

    Err(Error::Youtube { kind: last_kind, message: last_message, video_id: video_id.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_config() -> ScrapingConfig {
        ScrapingConfig {
            youtube_max_attempts: 3,
            youtube_base_delay: Duration::from_millis(1),
            youtube_max_delay: Duration::from_millis(20),
            youtube_exponential_base: 2.0,
            youtube_jitter_factor: 0.1,
            youtube_timeout: Duration::from_secs(5),
            ..ScrapingConfig::default()
        }
    }

    #[test]
    fn extracts_id_from_watch_url() {
        assert_eq!(extract_video_id("https://youtube.com/watch?v=dQw4w9WgXcQ"), Some("dQw4w9WgXcQ".to_string()));
    }

    #[test]
    fn extracts_id_from_short_url() {
        assert_eq!(extract_video_id("https://youtu.be/dQw4w9WgXcQ"), Some("dQw4w9WgXcQ".to_string()));
    }

    #[test]
    fn returns_none_for_non_youtube_url() {
        assert_eq!(extract_video_id("https://example.com/page"), None);
    }

    #[test]
    fn classification_covers_each_kind() {
        assert_eq!(classify("Transcripts are disabled for this video"), YoutubeErrorKind::TranscriptDisabled);
        assert_eq!(classify("This video is private"), YoutubeErrorKind::PrivateVideo);
        assert_eq!(classify("video not found"), YoutubeErrorKind::VideoNotFound);
        assert_eq!(classify("video unavailable"), YoutubeErrorKind::VideoUnavailable);
        assert_eq!(classify("blocked in your region"), YoutubeErrorKind::RegionBlocked);
        assert_eq!(classify("HTTP 429 too many requests"), YoutubeErrorKind::RateLimited);
        assert_eq!(classify("operation timed out"), YoutubeErrorKind::Timeout);
        assert_eq!(classify("x.y is not a function"), YoutubeErrorKind::LibraryError);
        assert_eq!(classify("dns lookup failed"), YoutubeErrorKind::NetworkError);
        assert_eq!(classify("failed to parse payload"), YoutubeErrorKind::ParsingError);
        assert_eq!(classify("something inexplicable happened"), YoutubeErrorKind::Unknown);
    }

    #[test]
    fn empty_result_classification_distinguishes_null_from_empty_list() {
        assert_eq!(classify_empty_result(true), YoutubeErrorKind::LibraryError);
        assert_eq!(classify_empty_result(false), YoutubeErrorKind::TranscriptDisabled);
    }

    #[test]
    fn user_message_includes_video_id() {
        let msg = user_message(YoutubeErrorKind::RateLimited, "abc123");
        assert!(msg.contains("abc123"));
    }

    struct FlakyThenOk {
        calls: AtomicU32,
        fail_times: u32,
    }

    #[async_trait]
    impl RawTranscriptSource for FlakyThenOk {
        async fn fetch(&self, _video_id: &str, _timeout: Duration) -> std::result::Result<Vec<TranscriptSegment>, String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_times {
                Err("network error: connection reset".to_string())
            } else {
                Ok(vec![TranscriptSegment { text: "hello".to_string() }, TranscriptSegment { text: "world".to_string() }])
            }
        }
    }

    struct AlwaysFails(&'static str);

    #[async_trait]
    impl RawTranscriptSource for AlwaysFails {
        async fn fetch(&self, _video_id: &str, _timeout: Duration) -> std::result::Result<Vec<TranscriptSegment>, String> {
            Err(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn retries_retryable_failures_then_succeeds() {
        let source = FlakyThenOk { calls: AtomicU32::new(0), fail_times: 2 };
        let text = fetch_transcript(&source, "dQw4w9WgXcQ", &test_config()).await.unwrap();
        assert_eq!(text, "hello world");
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_kind_fails_immediately() {
        let source = AlwaysFails("transcripts are disabled");
        let err = fetch_transcript(&source, "dQw4w9WgXcQ", &test_config()).await.unwrap_err();
        match err {
            Error::Youtube { kind, video_id, .. } => {
                assert_eq!(kind, YoutubeErrorKind::TranscriptDisabled);
                assert_eq!(video_id, "dQw4w9WgXcQ");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn exhausts_attempts_and_reports_last_kind() {
        let source = AlwaysFails("429 rate limit hit");
        let err = fetch_transcript(&source, "dQw4w9WgXcQ", &test_config()).await.unwrap_err();
        assert!(matches!(err, Error::Youtube { kind: YoutubeErrorKind::RateLimited, .. }));
    }

    #[test]
    fn backoff_delay_doubles_for_rate_limited_and_respects_cap() {
        let config = test_config();
        let delay = backoff_delay(&config, 5, YoutubeErrorKind::RateLimited);
        let ceiling = config.youtube_max_delay.mul_f64(1.0 + config.youtube_jitter_factor);
        assert!(delay <= ceiling, "{delay:?} should not exceed {ceiling:?}");
    }
}
