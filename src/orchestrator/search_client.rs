//! A thin client for the Google Custom Search JSON API.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Time-range restriction for a search query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeRange {
    /// Results from the past day.
    Day,
    /// Results from the past week.
    Week,
    /// Results from the past month.
    Month,
    /// Results from the past year.
    Year,
}

impl TimeRange {
    fn date_restrict(self) -> &'static str {
        match self {
            Self::Day => "d1",
            Self::Week => "w1",
            Self::Month => "m1",
            Self::Year => "y1",
        }
    }
}

/// Optional filters narrowing a search query, folded deterministically
/// into the cache key.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchFilters {
    /// Restrict to results published within this window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
    /// Restrict results to this site (Google's `siteSearch` parameter).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_search: Option<String>,
    /// Require this exact phrase in results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exact_terms: Option<String>,
    /// Exclude this term from results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_terms: Option<String>,
    /// Restrict results to this language (`lr` parameter, e.g. `lang_en`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Restrict results to this country (`gl` parameter).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

/// One organic search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultItem {
    /// The result's URL.
    pub url: String,
    /// The result's title, if the API returned one.
    pub title: Option<String>,
    /// A short excerpt, if the API returned one.
    pub snippet: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    items: Vec<ApiItem>,
}

#[derive(Debug, Deserialize)]
struct ApiItem {
    link: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
}

/// Calls the Google Custom Search JSON API.
#[derive(Clone)]
pub struct SearchClient {
    client: reqwest::Client,
    api_key: String,
    cx: String,
    timeout: std::time::Duration,
}

impl SearchClient {
    /// Build a client against the given API key and search engine id.
    #[must_use]
    pub fn new(client: reqwest::Client, api_key: String, cx: String, timeout: std::time::Duration) -> Self {
        Self { client, api_key, cx, timeout }
    }

    /// Run a search, returning up to `num_results` (1-10) ordered results.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UpstreamError`] if the API call fails or responds
    /// with a non-success status, or [`Error::Timeout`] if the request
    /// exceeds its deadline.
    pub async fn search(&self, query: &str, num_results: u8, filters: &SearchFilters) -> Result<Vec<SearchResultItem>> {
        let num_results = num_results.clamp(1, 10);

        let mut request = self
            .client
            .get("https://www.googleapis.com/customsearch/v1")
            .timeout(self.timeout)
            .query(&[("key", self.api_key.as_str()), ("cx", self.cx.as_str()), ("q", query), ("num", &num_results.to_string())]);

        if let Some(range) = filters.time_range {
            request = request.query(&[("dateRestrict", range.date_restrict())]);
        }
        if let Some(site) = &filters.site_search {
            request = request.query(&[("siteSearch", site.as_str())]);
        }
        if let Some(exact) = &filters.exact_terms {
            request = request.query(&[("exactTerms", exact.as_str())]);
        }
        if let Some(exclude) = &filters.exclude_terms {
            request = request.query(&[("excludeTerms", exclude.as_str())]);
        }
        if let Some(lang) = &filters.language {
            request = request.query(&[("lr", lang.as_str())]);
        }
        if let Some(country) = &filters.country {
            request = request.query(&[("gl", country.as_str())]);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout("search API request".to_string())
            } else {
                Error::UpstreamError(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(Error::UpstreamError(format!("search API returned HTTP {}", response.status())));
        }

        let parsed: ApiResponse = response.json().await.map_err(|e| Error::UpstreamError(format!("malformed search API response: {e}")))?;

        Ok(parsed.items.into_iter().map(|item| SearchResultItem { url: item.link, title: item.title, snippet: item.snippet }).collect())
    }
}
