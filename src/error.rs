//! Error types for the research MCP server.

use std::io;

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The closed set of YouTube transcript extraction error kinds.
///
/// Classification is purely string-matching on the underlying failure (see
/// `scraping::youtube::classify`); every other layer consumes this enum as
/// an opaque, typed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YoutubeErrorKind {
    /// The video owner disabled captions/transcripts.
    TranscriptDisabled,
    /// The video exists but is not currently available (removed, deleted).
    VideoUnavailable,
    /// No video exists with the given id.
    VideoNotFound,
    /// The video is private.
    PrivateVideo,
    /// The video is blocked in the requester's region.
    RegionBlocked,
    /// The upstream service is rate-limiting requests.
    RateLimited,
    /// The request exceeded its time budget.
    Timeout,
    /// A network-level failure (DNS, connection reset, etc.).
    NetworkError,
    /// The transcript payload could not be parsed.
    ParsingError,
    /// The underlying transcript library raised an unexpected error.
    LibraryError,
    /// No other kind matched.
    Unknown,
}

impl YoutubeErrorKind {
    /// The stable wire identifier for this kind, used verbatim in output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TranscriptDisabled => "transcript_disabled",
            Self::VideoUnavailable => "video_unavailable",
            Self::VideoNotFound => "video_not_found",
            Self::PrivateVideo => "private_video",
            Self::RegionBlocked => "region_blocked",
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::NetworkError => "network_error",
            Self::ParsingError => "parsing_error",
            Self::LibraryError => "library_error",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the retry loop in `scraping::youtube` should retry this kind.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::NetworkError | Self::Timeout | Self::RateLimited | Self::LibraryError | Self::Unknown
        )
    }
}

impl std::fmt::Display for YoutubeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by this crate's core subsystems.
#[derive(Error, Debug)]
pub enum Error {
    // ── Validation ──────────────────────────────────────────────────
    /// A URL could not be parsed.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// A URL's scheme is neither `http` nor `https`.
    #[error("disallowed scheme in URL: {0}")]
    DisallowedScheme(String),

    /// A URL was rejected by the SSRF validator.
    #[error("SSRF blocked: {url} (host {host}): {reason}")]
    SsrfBlocked {
        /// The rejected URL.
        url: String,
        /// The hostname extracted from the URL.
        host: String,
        /// Machine-readable reason code.
        reason: String,
    },

    /// An input value fell outside its documented valid range.
    #[error("input out of range: {0}")]
    InputOutOfRange(String),

    // ── Resource ────────────────────────────────────────────────────
    /// An outbound operation exceeded its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// A network-level failure occurred.
    #[error("network error: {0}")]
    NetworkError(String),

    /// The upstream service is rate-limiting requests.
    #[error("rate limited: {0}")]
    RateLimited(String),

    // ── State ───────────────────────────────────────────────────────
    /// The circuit breaker is open; the call was rejected without
    /// invoking the protected function.
    #[error("circuit open for '{service}', retry in {remaining_ms}ms")]
    CircuitOpen {
        /// The guarded service name.
        service: String,
        /// Milliseconds remaining until the breaker allows a probe.
        remaining_ms: u64,
    },

    /// A cache entry on disk failed to deserialize and was quarantined.
    #[error("corrupt cache entry: {0}")]
    CacheCorruptEntry(String),

    // ── External ────────────────────────────────────────────────────
    /// The search API returned a failure.
    #[error("upstream search error: {0}")]
    UpstreamError(String),

    /// A classified YouTube transcript extraction failure.
    #[error("youtube transcript error ({kind}) for video {video_id}: {message}")]
    Youtube {
        /// The classified error kind.
        kind: YoutubeErrorKind,
        /// Human-readable detail (never leaked to the client verbatim).
        message: String,
        /// The video id the request targeted.
        video_id: String,
    },

    /// Every source a `search_and_scrape` call fanned out to failed.
    #[error("all {} sources failed for query {query:?}", failures.len())]
    AllSourcesFailed {
        /// The originating query.
        query: String,
        /// Per-source `(url, error type tag)` failures.
        failures: Vec<(String, String)>,
    },

    // ── Crypto ──────────────────────────────────────────────────────
    /// At-rest encryption of an event payload failed.
    #[error("encryption failure: {0}")]
    EncryptionFailure(String),

    /// At-rest decryption of an event payload failed.
    #[error("decryption failure: {0}")]
    DecryptionFailure(String),

    // ── Fatal config ────────────────────────────────────────────────
    /// A required environment variable was not set.
    #[error("missing required environment variable: {0}")]
    MissingRequiredEnv(String),

    /// The configured encryption key is not exactly 32 bytes.
    #[error("invalid encryption key length: expected 32 bytes, got {0}")]
    InvalidEncryptionKeyLength(usize),

    // ── Ambient ─────────────────────────────────────────────────────
    /// Configuration could not be loaded or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// An unclassified internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// The stable `type` string sent back to MCP clients (see §7 of the
    /// design: user-visible errors never leak stack traces or upstream
    /// error strings, only this tag plus a human-readable message).
    #[must_use]
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::InvalidUrl(_) => "invalid_url",
            Self::DisallowedScheme(_) => "disallowed_scheme",
            Self::SsrfBlocked { .. } => "ssrf_blocked",
            Self::InputOutOfRange(_) => "input_out_of_range",
            Self::Timeout(_) => "timeout",
            Self::NetworkError(_) => "network_error",
            Self::RateLimited(_) => "rate_limited",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::CacheCorruptEntry(_) => "cache_corrupt_entry",
            Self::UpstreamError(_) => "upstream_error",
            Self::Youtube { kind, .. } => kind.as_str(),
            Self::AllSourcesFailed { .. } => "all_sources_failed",
            Self::EncryptionFailure(_) => "encryption_failure",
            Self::DecryptionFailure(_) => "decryption_failure",
            Self::MissingRequiredEnv(_) => "missing_required_env",
            Self::InvalidEncryptionKeyLength(_) => "invalid_encryption_key_length",
            Self::Config(_) => "config_error",
            Self::Internal(_) | Self::Io(_) | Self::Json(_) | Self::Http(_) => "internal_error",
        }
    }

    /// Whether this error should count against a circuit breaker's
    /// consecutive-failure tally (timeouts and network failures do;
    /// validation and state errors do not represent the guarded
    /// service itself misbehaving).
    #[must_use]
    pub fn counts_as_breaker_failure(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::NetworkError(_)
                | Self::RateLimited(_)
                | Self::UpstreamError(_)
                | Self::Http(_)
                | Self::Io(_)
        )
    }
}
