//! Status tool - index statistics

use anyhow::Result;
use serde_json::Value;

use crate::hnsw::HnswIndex;
use crate::store::ModelInfo;

use super::super::server::McpServer;

/// Report index statistics.
pub fn tool_status(server: &McpServer) -> Result<Value> {
    let model = ModelInfo {
        model_name: server.provider.model_name().to_string(),
        dimensions: server.provider.dimensions() as u32,
    };
    let stats = server.store.stats(&model)?;

    let index_dir = crate::resolve_index_dir(&server.project_root);
    let hnsw_status = match HnswIndex::count_vectors(&index_dir, "index") {
        Some(count) => format!("{count} vectors"),
        None => "not built (falling back to brute-force search)".to_string(),
    };

    let result = serde_json::json!({
        "file_count": stats.file_count,
        "chunk_count": stats.chunk_count,
        "embedding_count": stats.embedding_count,
        "model_name": stats.model_name,
        "dimensions": stats.dimensions,
        "vector_index": hnsw_status,
    });

    Ok(serde_json::json!({
        "content": [{
            "type": "text",
            "text": serde_json::to_string_pretty(&result)?
        }]
    }))
}
