//! MCP Server core implementation
//!
//! The McpServer handles JSON-RPC requests and coordinates tool execution.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::config::Config;
use crate::embedder::Provider;
use crate::hnsw::HnswIndex;
use crate::index::VectorIndex;
use crate::reranker::Reranker;
use crate::store::{ModelInfo, Store};

use super::tools;
use super::types::{
    ClientInfo, InitializeParams, InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    ServerCapabilities, ServerInfo, ToolsCapability,
};

/// MCP protocol version
pub const MCP_PROTOCOL_VERSION: &str = "2025-11-25";

/// MCP Server
///
/// Holds a dedicated Tokio runtime so `handle_request` can stay synchronous (both
/// transports drive it from a plain blocking loop) while `search()` underneath is async.
pub struct McpServer {
    pub(crate) store: Store,
    pub(crate) provider: Arc<dyn Provider>,
    pub(crate) reranker: Reranker,
    pub(crate) index: Option<Box<dyn VectorIndex>>,
    pub(crate) project_root: PathBuf,
    pub(crate) rt: tokio::runtime::Runtime,
}

impl McpServer {
    /// Create a new MCP server for the given project.
    pub fn new(project_root: impl AsRef<Path>, config: &Config) -> Result<Self> {
        let project_root = project_root.as_ref().to_path_buf();
        let index_path = config.store.path_or_default(&project_root);
        let index_dir = crate::resolve_index_dir(&project_root);

        if !index_path.exists() {
            anyhow::bail!(
                "index not found at {}; run 'pommel index' first",
                index_path.display()
            );
        }

        let provider = config.build_provider_stack()?;
        let model = ModelInfo {
            model_name: provider.model_name().to_string(),
            dimensions: provider.dimensions() as u32,
        };
        let store = Store::open(&index_path, Some(&model))
            .with_context(|| format!("failed to open index at {}", index_path.display()))?;

        let index = HnswIndex::try_load(&index_dir);
        let rt = tokio::runtime::Runtime::new().context("failed to start MCP runtime")?;

        Ok(Self {
            store,
            provider,
            reranker: Reranker::new(),
            index,
            project_root,
            rt,
        })
    }

    /// Handle a JSON-RPC request
    pub fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params),
            "initialized" => Ok(Value::Null), // Notification, no response needed
            "tools/list" => tools::handle_tools_list(),
            "tools/call" => tools::handle_tools_call(self, request.params),
            _ => Err(anyhow::anyhow!("Unknown method: {}", request.method)),
        };

        match result {
            Ok(value) => JsonRpcResponse {
                jsonrpc: "2.0".into(),
                id: request.id,
                result: Some(value),
                error: None,
            },
            Err(e) => {
                // Sanitize error message to avoid exposing internal paths.
                let full_error = e.to_string();
                tracing::debug!(error = %full_error, "request error");
                let sanitized = self.sanitize_error_message(&full_error);
                JsonRpcResponse {
                    jsonrpc: "2.0".into(),
                    id: request.id,
                    result: None,
                    error: Some(JsonRpcError {
                        code: -32000,
                        message: sanitized,
                        data: None,
                    }),
                }
            }
        }
    }

    /// Sanitize error messages to avoid exposing internal filesystem paths.
    fn sanitize_error_message(&self, error: &str) -> String {
        let project_str = self.project_root.to_string_lossy();
        let sanitized = error.replace(project_str.as_ref(), "<project>");

        let re_unix = regex::Regex::new(r"/(?:home|Users|tmp|var|usr|opt|etc)/[^\s:]+").ok();
        let re_windows =
            regex::Regex::new(r"[A-Za-z]:\\(?:Users|Windows|Program Files)[^\s:]*").ok();

        let mut result = sanitized;
        if let Some(re) = re_unix {
            result = re.replace_all(&result, "<path>").to_string();
        }
        if let Some(re) = re_windows {
            result = re.replace_all(&result, "<path>").to_string();
        }
        result
    }

    fn handle_initialize(&self, params: Option<Value>) -> Result<Value> {
        // SAFETY: Allocation bounded by 1MB request body limit (HTTP) or trusted client (stdio)
        let _params: InitializeParams = params
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or(InitializeParams {
                protocol_version: "2024-11-05".into(),
                capabilities: Value::Object(Default::default()),
                client_info: ClientInfo {
                    name: "unknown".into(),
                    version: "0.0.0".into(),
                },
            });

        let result = InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.into(),
            capabilities: ServerCapabilities {
                tools: ToolsCapability {
                    list_changed: false,
                },
            },
            server_info: ServerInfo {
                name: "pommel".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
        };

        Ok(serde_json::to_value(result)?)
    }
}
