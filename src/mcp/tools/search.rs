//! Search tool - hybrid semantic + keyword code search

use anyhow::Result;
use serde_json::Value;

use crate::search::SearchOptions;

use super::super::server::McpServer;
use super::super::types::SearchArgs;
use super::super::validation::validate_query_length;

/// Execute a search request and format the response as MCP tool content.
pub fn tool_search(server: &McpServer, arguments: Value) -> Result<Value> {
    // SAFETY: Allocation bounded by 1MB request body limit (HTTP) or trusted client (stdio)
    let args: SearchArgs = serde_json::from_value(arguments)?;
    validate_query_length(&args.query)?;

    let levels: Vec<crate::parser::ChunkLevel> = args
        .levels
        .unwrap_or_default()
        .iter()
        .filter_map(|l| l.parse().ok())
        .collect();

    let options = SearchOptions {
        limit: args.limit.unwrap_or(10),
        levels,
        path_prefix: args.path_prefix,
        hybrid: !args.semantic_only.unwrap_or(false),
        rerank: !args.no_rerank.unwrap_or(false),
        ..SearchOptions::default()
    };

    let search_start = std::time::Instant::now();
    let response = server.rt.block_on(crate::search::search(
        &server.store,
        server.index.as_deref(),
        server.provider.as_ref(),
        &server.reranker,
        &args.query,
        &options,
    ))?;
    let elapsed_ms = search_start.elapsed().as_millis();
    tracing::info!(results = response.results.len(), elapsed_ms, "MCP search completed");

    let json_results: Vec<_> = response
        .results
        .iter()
        .map(|r| {
            serde_json::json!({
                "file": r.chunk.file.to_string_lossy().replace('\\', "/"),
                "name": r.chunk.name,
                "level": r.chunk.level.as_str(),
                "line_start": r.chunk.line_start,
                "line_end": r.chunk.line_end,
                "score": r.score,
                "content": r.chunk.content,
            })
        })
        .collect();

    let result = serde_json::json!({
        "results": json_results,
        "query": args.query,
        "total": json_results.len(),
    });

    Ok(serde_json::json!({
        "content": [{
            "type": "text",
            "text": serde_json::to_string_pretty(&result)?
        }]
    }))
}
