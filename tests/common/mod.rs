//! Common test fixtures and helpers
//!
//! Usage in test files:
//! ```ignore
//! mod common;
//! use common::TestStore;
//! ```

use pommel::parser::{Chunk, ChunkLevel, ChunkType};
use pommel::store::{ModelInfo, Store};
use pommel::Embedding;
use std::path::PathBuf;
use tempfile::TempDir;

/// Test store with automatic cleanup
///
/// Wraps a `Store` with its backing `TempDir`, ensuring the directory
/// lives as long as the store is in use.
pub struct TestStore {
    /// The store instance
    pub store: Store,
    /// Temp directory (kept alive to prevent cleanup)
    _dir: TempDir,
}

impl TestStore {
    /// Create an initialized test store in a temporary directory
    pub fn new() -> Self {
        Self::with_model(&ModelInfo::default())
    }

    /// Create a test store with custom model info
    pub fn with_model(model: &ModelInfo) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let db_path = dir.path().join("index.db");
        let store = Store::open(&db_path, Some(model)).expect("failed to open store");
        Self { store, _dir: dir }
    }
}

impl std::ops::Deref for TestStore {
    type Target = Store;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Create a test chunk with sensible defaults
pub fn test_chunk(name: &str, content: &str) -> Chunk {
    let content_hash = blake3::hash(content.as_bytes()).to_hex().to_string();
    let structural_hash = Chunk::compute_structural_hash("test.rs", 1, 5, ChunkLevel::Method, name);
    Chunk {
        id: Chunk::compute_id("test.rs", 1, 5, ChunkLevel::Method, name, &content_hash),
        file: PathBuf::from("test.rs"),
        language: "rust",
        level: ChunkLevel::Method,
        chunk_type: ChunkType::Function,
        name: name.to_string(),
        signature: format!("fn {name}()"),
        content: content.to_string(),
        doc: None,
        line_start: 1,
        line_end: 5,
        content_hash,
        structural_hash,
        parent_id: None,
        parent_chunk_id: None,
    }
}

/// Create a mock unit-length embedding of the default provider's dimensionality.
///
/// The seed value determines the direction of the embedding vector. Same seed =
/// same direction = high similarity; different seeds = lower similarity.
pub fn mock_embedding(seed: f32) -> Embedding {
    let dims = ModelInfo::default().dimensions as usize;
    let mut v = vec![seed; dims];
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    Embedding::new(v)
}
