//! Cross-cutting input hygiene shared by the protocol facade and orchestrator.
//!
//! SSRF defense lives in [`crate::scraping::ssrf`] since it is specific to
//! outbound scrape fetches, not general tool-call sanitization.

pub mod sanitize;
