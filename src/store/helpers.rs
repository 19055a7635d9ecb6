//! Store helper types and embedding conversion functions

use std::path::PathBuf;
use thiserror::Error;

use crate::parser::{ChunkLevel, ChunkType};

/// Schema version for database migrations. `Store::open()` checks this against the
/// stored version and returns `StoreError::SchemaMismatch` if different.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("index schema is v{0}, pommel expects v{1}; run 'pommel index --force' to rebuild")]
    SchemaMismatch(i32, i32),
    #[error("index was created by a newer pommel version (schema v{0}); please upgrade")]
    SchemaNewerThanSupported(i32),
    #[error("model mismatch: index uses '{0}', current provider is '{1}'; run 'pommel index --force' to re-embed")]
    ModelMismatch(String, String),
    #[error("dimension mismatch: index has {0}-dim embeddings, current provider expects {1}; run 'pommel index --force' to rebuild")]
    DimensionMismatch(u32, u32),
}

/// Raw row from the `chunks` table (crate-internal, used by the search module).
#[derive(Clone)]
pub(crate) struct ChunkRow {
    pub id: String,
    pub file_path: String,
    pub language: String,
    pub level: String,
    pub name: String,
    pub content: String,
    pub line_start: u32,
    pub line_end: u32,
    pub parent_id: Option<String>,
    pub parent_chunk_id: Option<String>,
}

/// Chunk metadata returned from search results, minus the embedding vector.
#[derive(Debug, Clone)]
pub struct ChunkSummary {
    pub id: String,
    pub file: PathBuf,
    pub language: String,
    pub level: ChunkLevel,
    pub chunk_type: ChunkType,
    pub name: String,
    pub content: String,
    pub line_start: u32,
    pub line_end: u32,
    pub parent_id: Option<String>,
    pub parent_chunk_id: Option<String>,
}

/// A code chunk search result with similarity score.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub chunk: ChunkSummary,
    /// Cosine distance in `[0,2]` as returned by the vector index, or `None` when
    /// the match came solely from the lexical (FTS) side.
    pub vector_distance: Option<f32>,
    /// BM25 rank from FTS5, or `None` when the match came solely from the vector side.
    pub lexical_rank: Option<f64>,
}

/// Filter and scoring options applied at the Store retrieval step (§4.6).
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub levels: Vec<ChunkLevel>,
    pub path_prefix: Option<String>,
}

/// Embedding model metadata persisted in `metadata` at index-build time and checked
/// for compatibility on every subsequent open.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub model_name: String,
    pub dimensions: u32,
}

impl Default for ModelInfo {
    fn default() -> Self {
        Self {
            model_name: "v2".to_string(),
            dimensions: 768,
        }
    }
}

/// Statistics about the index (chunk counts, languages, etc.) for `pommel status`.
#[derive(Debug, Clone, Default)]
pub struct IndexStats {
    pub file_count: u64,
    pub chunk_count: u64,
    pub embedding_count: u64,
    pub model_name: String,
    pub dimensions: u32,
}

pub(crate) fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    bytemuck::cast_slice(vector).to_vec()
}

pub(crate) fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    bytemuck::cast_slice(blob).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_blob_round_trip() {
        let v = vec![1.0f32, -2.5, 3.25, 0.0];
        let blob = vector_to_blob(&v);
        let back = blob_to_vector(&blob);
        assert_eq!(v, back);
    }

    #[test]
    fn test_model_info_default() {
        let info = ModelInfo::default();
        assert_eq!(info.model_name, "v2");
        assert_eq!(info.dimensions, 768);
    }
}
