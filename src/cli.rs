//! Command-line interface.

use std::path::PathBuf;

use clap::Parser;

/// Research MCP server — web search, page/transcript scraping, and
/// combined search-and-scrape tools over an MCP transport.
#[derive(Parser, Debug)]
#[command(name = "research-mcp")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML).
    #[arg(short, long, env = "RESEARCH_MCP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port for the HTTP transport to listen on (forwarded, not consumed
    /// by the core).
    #[arg(short, long, env = "RESEARCH_MCP_PORT")]
    pub port: Option<u16>,

    /// Host for the HTTP transport to bind to (forwarded, not consumed
    /// by the core).
    #[arg(long, env = "RESEARCH_MCP_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "RESEARCH_MCP_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json).
    #[arg(long, env = "RESEARCH_MCP_LOG_FORMAT")]
    pub log_format: Option<String>,

    /// Directory for persisted cache entries.
    #[arg(long, env = "RESEARCH_MCP_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Directory for persisted event-store records.
    #[arg(long, env = "RESEARCH_MCP_EVENTS_DIR")]
    pub events_dir: Option<PathBuf>,

    /// Disable SSRF protection against private/reserved IP ranges.
    ///
    /// Never overrides the static blocked-hostname list (step 2 of the
    /// URL validator always applies).
    #[arg(long)]
    pub allow_private_ips: bool,
}
