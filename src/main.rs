//! Research MCP server core — composition root.
//!
//! Parses CLI flags, loads layered configuration, constructs the cache,
//! event store, scraping pipeline, and orchestrator, then waits for a
//! shutdown signal. The actual transport (stdio JSON-RPC or
//! Streamable-HTTP/SSE) is an external collaborator that calls into
//! [`research_mcp::protocol::Protocol`]; this binary only builds the
//! composition root and keeps it alive.

use std::{process::ExitCode, sync::Arc};

use clap::Parser;
use tracing::{error, info, warn};

use research_mcp::{
    cache::Cache,
    cli::Cli,
    config::Config,
    event_store::EventStore,
    orchestrator::{Orchestrator, SearchClient},
    protocol::Protocol,
    scraping::Scraper,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(dir) = cli.cache_dir.clone() {
        config.cache.root = dir;
    }
    if let Some(dir) = cli.events_dir.clone() {
        config.event_store.root = dir;
    }
    if cli.allow_private_ips {
        config.scraping.allow_private_ips = true;
    }

    info!(version = env!("CARGO_PKG_VERSION"), "starting research-mcp core");

    let cache = match Cache::new(config.cache.clone()).await {
        Ok(cache) => cache,
        Err(e) => {
            error!("failed to initialize cache: {e}");
            return ExitCode::FAILURE;
        }
    };

    let event_store = match EventStore::new(config.event_store.clone()) {
        Ok(store) => store,
        Err(e) => {
            error!("failed to initialize event store: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Redirects must be re-validated by the SSRF validator at every hop
    // (see scraping::fetch::fetch_static's manual redirect loop), so the
    // client must never follow them on its own.
    let http_client = match reqwest::Client::builder().redirect(reqwest::redirect::Policy::none()).build() {
        Ok(client) => client,
        Err(e) => {
            error!("failed to build HTTP client: {e}");
            return ExitCode::FAILURE;
        }
    };
    let scraper = Arc::new(Scraper::new(http_client.clone(), config.scraping.clone(), &config.circuit_breaker));

    let search_client = config
        .orchestrator
        .resolve_google_search_api_key()
        .zip(config.orchestrator.google_search_cx.clone())
        .map(|(key, cx)| SearchClient::new(http_client.clone(), key, cx, config.scraping.search_timeout));

    if search_client.is_none() {
        warn!("no google_search_api_key/google_search_cx configured; google_search and search_and_scrape will fail");
    }

    let orchestrator = Arc::new(Orchestrator::new(cache, scraper, search_client, config.orchestrator.clone(), &config.circuit_breaker));
    let protocol = Protocol::new(Arc::clone(&orchestrator));

    // Held alive for the transport layer's session-lifecycle hooks
    // (resumption, audit logging); its background sweep task would
    // otherwise be dropped as soon as this binding went out of scope.
    let _event_store = event_store;

    info!(tools = protocol.tools().len(), "composition root ready, awaiting transport");

    shutdown_signal().await;
    info!("shutdown signal received, exiting");
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
