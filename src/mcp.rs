use std::sync::Arc;

use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    api::{DEFAULT_CONTEXT_LENGTH, DEFAULT_TOP_K, MatchView, SearchRequest},
    document::Tags,
    engine::Engine,
    error,
    rank::Aggregation,
};

#[derive(Clone)]
pub struct ChunkscopeMcpServer {
    engine: Arc<Engine>,
    tool_router: ToolRouter<Self>,
}

impl ChunkscopeMcpServer {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine: Arc::new(engine),
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router(router = tool_router)]
impl ChunkscopeMcpServer {
    /// Sentence-level semantic search with context windows.
    #[tool(
        name = "chunkscope_search",
        description = "Search indexed documents sentence by sentence. Supports tag filters (OR/AND), context windows, and ranking matches up to documents."
    )]
    pub async fn chunkscope_search(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let query = params.query.clone();

        let mut request = SearchRequest::new(params.query);
        request.top_k = params.top_k.unwrap_or(DEFAULT_TOP_K);
        request.context_length =
            params.context_length.unwrap_or(DEFAULT_CONTEXT_LENGTH);
        request.filter_by_tags = params.filter_by_tags.unwrap_or_default();
        if let Some(method) = params.filter_method {
            request.filter_by_tags_method = method;
        }
        request.rank_by = params.rank_by;
        request.include_tags = params.include_tags.unwrap_or(true);

        let response = self
            .engine
            .search(&request)
            .map_err(|e| mcp_error("search failed", e))?;

        let summary = format_search_summary(&response.matches, &query);
        let structured = serde_json::to_value(&response)
            .map_err(|e| mcp_error("failed to serialize search results", e))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        Ok(result)
    }

    /// Count tag values across the store or selected ids.
    #[tool(
        name = "chunkscope_tags",
        description = "Count tag values (e.g. ORG, LOC) across all indexed documents, or only the given document/chunk ids."
    )]
    pub async fn chunkscope_tags(
        &self,
        params: Parameters<TagsParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let ids = params.0.doc_ids.unwrap_or_default();
        let response = self
            .engine
            .tags(&ids)
            .map_err(|e| mcp_error("tag counting failed", e))?;

        let keys = response.tags.len();
        let structured = serde_json::to_value(&response)
            .map_err(|e| mcp_error("failed to serialize tag counts", e))?;

        let mut result = CallToolResult::success(vec![Content::text(format!("Counted values for {keys} tag keys"))]);
        result.structured_content = Some(structured);
        Ok(result)
    }

    /// Report store size and capabilities.
    #[tool(
        name = "chunkscope_status",
        description = "Show how many documents and sentences are indexed and whether tagging is available."
    )]
    pub async fn chunkscope_status(&self) -> Result<CallToolResult, rmcp::ErrorData> {
        let status = self
            .engine
            .status()
            .map_err(|e| mcp_error("status failed", e))?;
        let summary = format!(
            "{} documents, {} sentences",
            status.documents, status.chunks
        );
        let structured = serde_json::to_value(&status)
            .map_err(|e| mcp_error("failed to serialize status", e))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        Ok(result)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for ChunkscopeMcpServer {
    fn get_info(&self) -> ServerInfo {
        let mut server_info = Implementation::new("chunkscope", env!("CARGO_PKG_VERSION"));
        server_info.title = Some("chunkscope MCP".to_string());
        server_info.icons = None;
        server_info.website_url = None;
        let mut info = ServerInfo::default();
        info.capabilities = ServerCapabilities::builder().enable_tools().build();
        info.server_info = server_info;
        info.instructions = Some(
            "Use chunkscope_search to find sentences by meaning; narrow with tag filters from chunkscope_tags."
                .to_string(),
        );
        info
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    /// Search query string.
    pub query: String,
    /// Maximum number of matches (default: 5).
    pub top_k: Option<usize>,
    /// Sentences on each side of a match to include as context (default: 5).
    pub context_length: Option<usize>,
    /// Tag predicates, each a `{key: value}` map.
    pub filter_by_tags: Option<Vec<Tags>>,
    /// How predicates combine: "OR" (default) or "AND".
    pub filter_method: Option<String>,
    /// Roll matches up to documents: min, max, mean_min or mean_max.
    pub rank_by: Option<Aggregation>,
    /// Include tags and context in each match (default: true).
    pub include_tags: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TagsParams {
    /// Document or chunk ids; omit for the whole store.
    pub doc_ids: Option<Vec<String>>,
}

fn format_search_summary(matches: &[MatchView], query: &str) -> String {
    if matches.is_empty() {
        return format!("No results found for \"{query}\"");
    }

    let mut lines = Vec::with_capacity(matches.len() + 1);
    let suffix = if matches.len() == 1 { "" } else { "s" };
    lines.push(format!(
        "Found {} result{} for \"{query}\":",
        matches.len(),
        suffix
    ));

    for m in matches {
        lines.push(format!("{:.2} {}", m.score(), m.text()));
    }

    lines.join("\n")
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

pub fn run_mcp(engine: Engine) -> error::Result<()> {
    let server = ChunkscopeMcpServer::new(engine);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            error::Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(async move {
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            error::Error::Config(format!(
                "MCP server initialization failed: {e}"
            ))
        })?;
        running.waiting().await.map_err(|e| {
            error::Error::Config(format!("MCP server error: {e}"))
        })?;
        Ok(())
    })
}
