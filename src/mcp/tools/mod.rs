//! MCP tool handlers
//!
//! Each tool provides a specific capability to MCP clients.

mod search;
mod status;

use anyhow::{bail, Result};
use serde_json::Value;

use super::server::McpServer;
use super::types::{Tool, ToolsListResult};

/// Handle tools/list request - return available tools
pub fn handle_tools_list() -> Result<Value> {
    let tools = vec![
        Tool {
            name: "search".into(),
            description: "Search code semantically. Find functions/methods/files by concept, not just name. Example: 'retry with exponential backoff' finds retry logic regardless of naming.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Natural language description of what you're looking for"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum results (default: 10)",
                        "default": 10
                    },
                    "levels": {
                        "type": "array",
                        "items": { "type": "string", "enum": ["file", "class", "method"] },
                        "description": "Restrict to one or more chunk levels (optional)"
                    },
                    "path_prefix": {
                        "type": "string",
                        "description": "Restrict results to files under this path prefix (optional)"
                    },
                    "semantic_only": {
                        "type": "boolean",
                        "description": "Disable hybrid dense+keyword fusion, use pure vector similarity (default: false)",
                        "default": false
                    },
                    "no_rerank": {
                        "type": "boolean",
                        "description": "Skip the heuristic re-ranking pass (default: false)",
                        "default": false
                    }
                },
                "required": ["query"]
            }),
        },
        Tool {
            name: "status".into(),
            description: "Report index statistics: file/chunk/embedding counts, model, and vector index state.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {}
            }),
        },
    ];

    Ok(serde_json::to_value(ToolsListResult { tools })?)
}

/// Handle tools/call request - dispatch to the named tool
pub fn handle_tools_call(server: &McpServer, params: Option<Value>) -> Result<Value> {
    let params = params.ok_or_else(|| anyhow::anyhow!("missing params"))?;
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("missing tool name"))?;
    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

    match name {
        "search" => search::tool_search(server, arguments),
        "status" => status::tool_status(server),
        other => bail!("unknown tool: {other}"),
    }
}
