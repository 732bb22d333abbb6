//! The facade a transport layer calls into.
//!
//! Defines the three tools' schemas, validates and dispatches tool-call
//! arguments into the [`Orchestrator`], and shapes its output into
//! MCP-style content blocks. JSON-RPC parsing, HTTP routing, and SSE
//! multiplexing live one layer up, outside this crate.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    orchestrator::{Audience, ContentBlock, Orchestrator, SearchFilters},
    security::sanitize::sanitize_json_value,
    Error, Result,
};

/// Who a content block is intended for, as the two-letter MCP tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AudienceTag {
    /// The human user.
    User,
    /// The calling assistant/model.
    Assistant,
}

fn audience_tags(audience: Audience) -> Vec<AudienceTag> {
    match audience {
        Audience::User => vec![AudienceTag::User],
        Audience::Assistant => vec![AudienceTag::Assistant],
        Audience::Both => vec![AudienceTag::User, AudienceTag::Assistant],
    }
}

/// Annotation metadata carried on a content block.
#[derive(Debug, Clone, Serialize)]
pub struct Annotations {
    /// Who this block is intended for.
    pub audience: Vec<AudienceTag>,
    /// Relative importance in `[0, 1]`.
    pub priority: f64,
    /// When this block was produced.
    #[serde(rename = "lastModified")]
    pub last_modified: DateTime<Utc>,
}

/// One block of tool-call output content.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    /// Plain text content.
    Text {
        /// The text itself.
        text: String,
        /// Audience/priority/timestamp metadata.
        annotations: Annotations,
    },
}

fn to_content(block: &ContentBlock) -> Content {
    Content::Text {
        text: block.text.clone(),
        annotations: Annotations {
            audience: audience_tags(block.annotation.audience),
            priority: block.annotation.priority,
            last_modified: block.annotation.last_modified,
        },
    }
}

/// The result of a tool call: annotated content blocks plus optional
/// machine-readable structured data mirroring the same information.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallResult {
    /// Annotated output blocks.
    pub content: Vec<Content>,
    /// Whether the call failed.
    #[serde(rename = "isError")]
    pub is_error: bool,
    /// Structured data backing `content`, for callers that want it
    /// without re-parsing text.
    #[serde(rename = "structuredContent", skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
}

/// A tool's name, description, and JSON Schema for its arguments.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    /// The tool's stable name.
    pub name: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// JSON Schema describing accepted arguments.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// The three tools this server exposes, with their argument schemas.
#[must_use]
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "google_search",
            description: "Search the web via Google Custom Search and return an ordered list of result URLs.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "minLength": 1, "maxLength": 500 },
                    "num_results": { "type": "integer", "minimum": 1, "maximum": 10, "default": 5 },
                    "filters": {
                        "type": "object",
                        "properties": {
                            "time_range": { "type": "string", "enum": ["day", "week", "month", "year"] },
                            "site_search": { "type": "string" },
                            "exact_terms": { "type": "string" },
                            "exclude_terms": { "type": "string" },
                            "language": { "type": "string" },
                            "country": { "type": "string" }
                        }
                    }
                },
                "required": ["query"]
            }),
        },
        ToolDefinition {
            name: "scrape_page",
            description: "Fetch a URL and extract its readable text, or a transcript if it's a YouTube video.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string", "maxLength": 2048 }
                },
                "required": ["url"]
            }),
        },
        ToolDefinition {
            name: "search_and_scrape",
            description: "Search the web, scrape the top results concurrently, and return their combined (optionally deduplicated) text.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "minLength": 1, "maxLength": 500 },
                    "num_results": { "type": "integer", "minimum": 1, "maximum": 10, "default": 3 },
                    "include_sources": { "type": "boolean", "default": true },
                    "deduplicate": { "type": "boolean", "default": true }
                },
                "required": ["query"]
            }),
        },
    ]
}

fn default_search_num_results() -> u8 {
    5
}

fn default_search_and_scrape_num_results() -> u8 {
    3
}

fn default_true() -> bool {
    true
}

fn validate_query(query: &str) -> Result<()> {
    let len = query.chars().count();
    if len == 0 || len > 500 {
        return Err(Error::InputOutOfRange(format!("query must be 1-500 characters, got {len}")));
    }
    Ok(())
}

fn validate_num_results(num_results: u8) -> Result<()> {
    if !(1..=10).contains(&num_results) {
        return Err(Error::InputOutOfRange(format!("num_results must be between 1 and 10, got {num_results}")));
    }
    Ok(())
}

/// Validated arguments for `google_search`.
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleSearchInput {
    /// The search query.
    pub query: String,
    /// How many results to return (1-10).
    #[serde(default = "default_search_num_results")]
    pub num_results: u8,
    /// Optional search filters.
    #[serde(default)]
    pub filters: Option<SearchFilters>,
}

impl GoogleSearchInput {
    fn validate(&self) -> Result<()> {
        validate_query(&self.query)?;
        validate_num_results(self.num_results)
    }
}

/// Validated arguments for `scrape_page`.
#[derive(Debug, Clone, Deserialize)]
pub struct ScrapePageInput {
    /// The URL to scrape.
    pub url: String,
}

impl ScrapePageInput {
    fn validate(&self) -> Result<()> {
        if self.url.is_empty() || self.url.len() > 2048 {
            return Err(Error::InputOutOfRange(format!("url must be 1-2048 bytes, got {}", self.url.len())));
        }
        Ok(())
    }
}

/// Validated arguments for `search_and_scrape`.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchAndScrapeInput {
    /// The search query.
    pub query: String,
    /// How many results to fan out scraping across (1-10).
    #[serde(default = "default_search_and_scrape_num_results")]
    pub num_results: u8,
    /// Whether to include a per-source success/failure breakdown.
    #[serde(default = "default_true")]
    pub include_sources: bool,
    /// Whether to deduplicate paragraphs across sources.
    #[serde(default = "default_true")]
    pub deduplicate: bool,
}

impl SearchAndScrapeInput {
    fn validate(&self) -> Result<()> {
        validate_query(&self.query)?;
        validate_num_results(self.num_results)
    }
}

/// Validates and dispatches tool-call arguments into the orchestrator,
/// shaping its output into MCP-style content blocks.
pub struct Protocol {
    orchestrator: Arc<Orchestrator>,
}

impl Protocol {
    /// Build a protocol facade over an orchestrator.
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// The tool schemas a transport layer should advertise.
    #[must_use]
    pub fn tools(&self) -> Vec<ToolDefinition> {
        tool_definitions()
    }

    /// Validate and dispatch a tool call by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InputOutOfRange`] for an unknown tool name,
    /// malformed arguments, or arguments outside their documented range;
    /// otherwise whatever the underlying tool operation returns.
    pub async fn call(&self, tool_name: &str, arguments: Value) -> Result<ToolCallResult> {
        let arguments = sanitize_json_value(&arguments)?;
        match tool_name {
            "google_search" => self.call_google_search(arguments).await,
            "scrape_page" => self.call_scrape_page(arguments).await,
            "search_and_scrape" => self.call_search_and_scrape(arguments).await,
            other => Err(Error::InputOutOfRange(format!("unknown tool: {other}"))),
        }
    }

    async fn call_google_search(&self, arguments: Value) -> Result<ToolCallResult> {
        let input: GoogleSearchInput = serde_json::from_value(arguments).map_err(|e| Error::InputOutOfRange(e.to_string()))?;
        input.validate()?;

        let output = self.orchestrator.search(&input.query, input.num_results, &input.filters.unwrap_or_default()).await?;
        let content = output.blocks.iter().map(to_content).collect();
        let structured_content = serde_json::to_value(&output.results).ok();

        Ok(ToolCallResult { content, is_error: false, structured_content })
    }

    async fn call_scrape_page(&self, arguments: Value) -> Result<ToolCallResult> {
        let input: ScrapePageInput = serde_json::from_value(arguments).map_err(|e| Error::InputOutOfRange(e.to_string()))?;
        input.validate()?;

        let output = self.orchestrator.scrape(&input.url).await?;
        let content = vec![to_content(&output.block)];
        let structured_content = serde_json::to_value(&output.result).ok();

        Ok(ToolCallResult { content, is_error: false, structured_content })
    }

    async fn call_search_and_scrape(&self, arguments: Value) -> Result<ToolCallResult> {
        let input: SearchAndScrapeInput = serde_json::from_value(arguments).map_err(|e| Error::InputOutOfRange(e.to_string()))?;
        input.validate()?;

        let output = self.orchestrator.search_and_scrape(&input.query, input.num_results, input.include_sources, input.deduplicate).await?;
        let content = output.blocks.iter().map(to_content).collect();
        let structured_content = json!({ "sources": output.sources, "dedup_stats": output.dedup_stats });

        Ok(ToolCallResult { content, is_error: false, structured_content: Some(structured_content) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_definitions_cover_all_three_tools_with_object_schemas() {
        let tools = tool_definitions();
        let names: Vec<&str> = tools.iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["google_search", "scrape_page", "search_and_scrape"]);
        for tool in &tools {
            assert_eq!(tool.input_schema["type"], "object");
        }
    }

    #[test]
    fn google_search_input_applies_defaults() {
        let input: GoogleSearchInput = serde_json::from_value(json!({ "query": "rust" })).unwrap();
        assert_eq!(input.num_results, 5);
        assert!(input.filters.is_none());
        assert!(input.validate().is_ok());
    }

    #[test]
    fn google_search_input_rejects_empty_query() {
        let input: GoogleSearchInput = serde_json::from_value(json!({ "query": "" })).unwrap();
        assert!(input.validate().is_err());
    }

    #[test]
    fn google_search_input_rejects_out_of_range_num_results() {
        let input: GoogleSearchInput = serde_json::from_value(json!({ "query": "rust", "num_results": 11 })).unwrap();
        assert!(input.validate().is_err());
    }

    #[test]
    fn scrape_page_input_rejects_oversized_url() {
        let input = ScrapePageInput { url: "a".repeat(2049) };
        assert!(input.validate().is_err());
    }

    #[test]
    fn search_and_scrape_input_applies_defaults() {
        let input: SearchAndScrapeInput = serde_json::from_value(json!({ "query": "rust" })).unwrap();
        assert_eq!(input.num_results, 3);
        assert!(input.include_sources);
        assert!(input.deduplicate);
    }

    #[test]
    fn audience_both_maps_to_both_tags() {
        assert_eq!(audience_tags(Audience::Both), vec![AudienceTag::User, AudienceTag::Assistant]);
        assert_eq!(audience_tags(Audience::User), vec![AudienceTag::User]);
    }
}
