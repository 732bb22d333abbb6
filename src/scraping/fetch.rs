//! Tiered HTML fetch: a static-tier HTTP GET, falling back to a
//! headless-browser render when the static tier's extracted content is
//! too thin.

use scraper::{ElementRef, Html, Node, Selector};
use url::Url;

use crate::{config::ScrapingConfig, scraping::ssrf, Error, Result};

/// The kind of content a scrape produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// Extracted from an HTML document.
    Html,
    /// Extracted from a YouTube video's transcript.
    YoutubeTranscript,
}

/// Document-level metadata captured alongside the extracted text.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct DocumentMetadata {
    /// The document's `<title>`, if present and non-empty.
    pub title: Option<String>,
}

/// The immutable result of a single scrape.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ScrapeResult {
    /// What kind of source this was extracted from.
    pub kind: ContentKind,
    /// The extracted (and possibly truncated) text.
    pub text: String,
    /// Byte length of `text` after truncation.
    pub content_length: usize,
    /// Whether `text` was truncated to fit `truncate_bytes`.
    pub truncated: bool,
    /// Document metadata, when available.
    pub metadata: DocumentMetadata,
}

fn truncate_at_char_boundary(text: &str, max_bytes: usize) -> (String, bool) {
    if text.len() <= max_bytes {
        return (text.to_string(), false);
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    (text[..end].to_string(), true)
}

fn collect_text(element: ElementRef, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                out.push_str(text);
                out.push(' ');
            }
            Node::Element(elem) => {
                if matches!(elem.name(), "script" | "style" | "noscript") {
                    continue;
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_text(child_el, out);
                }
            }
            _ => {}
        }
    }
}

fn extract_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    let title = document.select(&selector).next()?.text().collect::<String>();
    let trimmed = title.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn extract_body_text(document: &Html) -> String {
    let Ok(selector) = Selector::parse("body") else { return String::new() };
    let Some(body) = document.select(&selector).next() else { return String::new() };
    let mut out = String::new();
    collect_text(body, &mut out);
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_html_response(content_type: Option<&str>, body: &str) -> bool {
    if let Some(ct) = content_type {
        let lower = ct.to_ascii_lowercase();
        if lower.contains("text/html") || lower.contains("application/xhtml") {
            return true;
        }
        if !lower.is_empty() && !lower.contains("text/plain") {
            return false;
        }
    }
    let probe = body.trim_start().get(..512.min(body.len())).unwrap_or(body).to_ascii_lowercase();
    probe.contains("<!doctype html") || probe.contains("<html")
}

fn build_result(html: &str, truncate_bytes: usize) -> ScrapeResult {
    let document = Html::parse_document(html);
    let title = extract_title(&document);
    let body_text = extract_body_text(&document);
    let (text, truncated) = truncate_at_char_boundary(&body_text, truncate_bytes);
    ScrapeResult { kind: ContentKind::Html, content_length: text.len(), truncated, text, metadata: DocumentMetadata { title } }
}

/// Fetch and extract a non-YouTube page, following redirects (each
/// re-validated against SSRF rules) up to `config.max_redirects`, falling
/// back to a JS-rendered tier when static extraction is too thin.
///
/// # Errors
///
/// Returns an error if the URL is rejected by SSRF validation, every
/// redirect hop is exhausted, the response is not HTML-shaped, or the
/// underlying HTTP request fails.
pub async fn fetch(client: &reqwest::Client, url: &str, config: &ScrapingConfig) -> Result<ScrapeResult> {
    let html = fetch_static(client, url, config).await?;
    let result = build_result(&html, config.truncate_bytes);

    if result.text.chars().count() >= config.insufficient_content_threshold {
        return Ok(result);
    }

    match fetch_rendered(url, config).await {
        Ok(rendered_html) => {
            let rendered = build_result(&rendered_html, config.truncate_bytes);
            if rendered.text.chars().count() > result.text.chars().count() {
                Ok(rendered)
            } else {
                Ok(result)
            }
        }
        Err(e) => {
            tracing::debug!(error = %e, "JS-rendered fallback tier unavailable, returning static-tier result");
            Ok(result)
        }
    }
}

async fn fetch_static(client: &reqwest::Client, url: &str, config: &ScrapingConfig) -> Result<String> {
    let mut current = url.to_string();

    for _ in 0..=config.max_redirects {
        ssrf::validate_url(&current, config.allow_private_ips, &config.allowed_domains).await?;

        let response = client
            .get(&current)
            .timeout(config.static_fetch_timeout)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { Error::Timeout(format!("fetching {current}")) } else { Error::NetworkError(e.to_string()) })?;

        if response.status().is_redirection() {
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| Error::NetworkError(format!("redirect from {current} missing Location header")))?;
            let base = Url::parse(&current).map_err(|e| Error::InvalidUrl(format!("{current}: {e}")))?;
            let next = base.join(location).map_err(|e| Error::InvalidUrl(format!("redirect target {location}: {e}")))?;
            current = next.into();
            continue;
        }

        if !response.status().is_success() {
            return Err(Error::UpstreamError(format!("{current} returned HTTP {}", response.status())));
        }

        let content_type = response.headers().get(reqwest::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).map(str::to_string);
        let body = response.text().await.map_err(|e| Error::NetworkError(e.to_string()))?;

        if !is_html_response(content_type.as_deref(), &body) {
            return Err(Error::UpstreamError(format!("{current} is not an HTML document")));
        }

        return Ok(body);
    }

    Err(Error::NetworkError(format!("redirect limit ({}) exceeded fetching {url}", config.max_redirects)))
}

#[cfg(feature = "js-render")]
async fn fetch_rendered(url: &str, config: &ScrapingConfig) -> Result<String> {
    use chromiumoxide::browser::{Browser, BrowserConfig};

    let browser_config = BrowserConfig::builder()
        .build()
        .map_err(|e| Error::Internal(format!("failed to configure headless browser: {e}")))?;
    let (browser, mut handler) = Browser::launch(browser_config).await.map_err(|e| Error::Internal(format!("failed to launch headless browser: {e}")))?;
    tokio::spawn(async move {
        use futures::StreamExt;
        while (handler.next().await).is_some() {}
    });

    let navigation = async {
        let page = browser.new_page(url).await.map_err(|e| Error::Internal(format!("failed to open page: {e}")))?;
        page.wait_for_navigation().await.map_err(|e| Error::Internal(format!("navigation failed: {e}")))?;
        page.content().await.map_err(|e| Error::Internal(format!("failed to read rendered content: {e}")))
    };

    tokio::time::timeout(config.navigation_timeout, navigation).await.map_err(|_| Error::Timeout(format!("rendering {url}")))?
}

#[cfg(not(feature = "js-render"))]
#[allow(clippy::unused_async)]
async fn fetch_rendered(_url: &str, _config: &ScrapingConfig) -> Result<String> {
    Err(Error::Internal("JS-rendered fallback tier not compiled in (enable the \"js-render\" feature)".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_title_and_body_text_skipping_script_and_style() {
        let html = r#"
            <html>
              <head><title>  Example Page  </title><style>.x{color:red}</style></head>
              <body>
                <script>var x = 1;</script>
                <h1>Hello</h1>
                <p>World of <b>text</b>.</p>
              </body>
            </html>
        "#;
        let result = build_result(html, 10_000);
        assert_eq!(result.metadata.title, Some("Example Page".to_string()));
        assert_eq!(result.kind, ContentKind::Html);
        assert!(result.text.contains("Hello"));
        assert!(result.text.contains("World of text"));
        assert!(!result.text.contains("var x"));
        assert!(!result.text.contains("color:red"));
    }

    #[test]
    fn missing_title_yields_none() {
        let html = "<html><body><p>No title here</p></body></html>";
        let result = build_result(html, 10_000);
        assert_eq!(result.metadata.title, None);
    }

    #[test]
    fn truncates_at_configured_byte_ceiling() {
        let html = format!("<html><body><p>{}</p></body></html>", "word ".repeat(100));
        let result = build_result(&html, 20);
        assert!(result.truncated);
        assert!(result.content_length <= 20);
    }

    #[test]
    fn no_truncation_when_within_ceiling() {
        let html = "<html><body><p>short</p></body></html>";
        let result = build_result(html, 10_000);
        assert!(!result.truncated);
    }

    #[test]
    fn is_html_response_accepts_declared_content_type() {
        assert!(is_html_response(Some("text/html; charset=utf-8"), "whatever"));
    }

    #[test]
    fn is_html_response_sniffs_body_when_content_type_missing() {
        assert!(is_html_response(None, "<!DOCTYPE html><html></html>"));
        assert!(!is_html_response(None, "{\"not\": \"html\"}"));
    }

    #[test]
    fn is_html_response_rejects_declared_non_html_type() {
        assert!(!is_html_response(Some("application/json"), "<html>decoy</html>"));
    }

    #[tokio::test]
    async fn fetch_rejects_ssrf_blocked_hosts_before_any_request() {
        let client = reqwest::Client::new();
        let config = ScrapingConfig::default();
        let err = fetch(&client, "http://169.254.169.254/latest/meta-data/", &config).await.unwrap_err();
        assert!(matches!(err, Error::SsrfBlocked { .. }));
    }
}
