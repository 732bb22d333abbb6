//! Research MCP server core
//!
//! Implements the core subsystems behind an MCP server exposing
//! `google_search`, `scrape_page`, and `search_and_scrape` tools:
//!
//! - **Cache**: a TTL + LRU + stale-while-revalidate in-memory/on-disk
//!   cache with promise coalescing and pluggable persistence.
//! - **Event store**: a durable per-session outbound-message log
//!   supporting resumption, at-rest encryption, and audit logging.
//! - **Scraping**: SSRF-safe URL validation, tiered HTML extraction, a
//!   YouTube transcript extractor, and a circuit breaker.
//! - **Orchestrator**: dispatches the three tools, deduplicates
//!   multi-source content, and collects metrics.
//!
//! Transport framing (JSON-RPC parsing, HTTP routing, SSE multiplexing)
//! is out of scope: this crate exposes the facade a transport layer
//! calls into (see [`protocol`]).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod event_store;
pub mod orchestrator;
pub mod protocol;
pub mod scraping;
pub mod security;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Set up the global `tracing` subscriber.
///
/// # Errors
///
/// Currently infallible; returns `Result` so callers can propagate future
/// subscriber-construction failures without a signature change.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
