//! # pommel - Semantic Code Search
//!
//! Local-first semantic code search for AI coding agents. Hybrid dense+lexical
//! retrieval with Reciprocal Rank Fusion, deterministic heuristic re-ranking, and an
//! always-fresh chunked/embedded index kept in sync by a debounced watcher.
//!
//! ## Quick Start
//!
//! ```no_run
//! use pommel::config::Config;
//! use pommel::store::{ModelInfo, Store};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = Config::load(std::path::Path::new("."));
//! let provider = config.build_provider_stack()?;
//! let model = ModelInfo { model_name: provider.model_name().to_string(), dimensions: provider.dimensions() as u32 };
//! let store = Store::open(std::path::Path::new(".pommel/index.db"), Some(&model))?;
//! # let _ = store;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod embedder;
pub mod health;
pub mod hnsw;
pub mod index;
pub mod indexer;
pub mod language;
pub mod mcp;
pub(crate) mod math;
pub(crate) mod nl;
pub mod parser;
pub mod reranker;
pub(crate) mod retry;
pub mod search;
pub(crate) mod source;
pub mod store;

pub use cache::CachingProvider;
pub use embedder::{build_provider, CancelToken, Embedding, Provider, ProviderError};
pub use hnsw::HnswIndex;
pub use index::{IndexResult, VectorIndex};
pub use indexer::{FileEvent, IndexStats, Indexer, IndexerError, IndexerOptions};
pub use parser::{Chunk, ChunkLevel, Parser};
pub use reranker::Reranker;
pub use retry::{RetryConfig, RetryingProvider};
pub use search::{
    search, MatchSource, ParentInfo, ScoreDetails, SearchError, SearchOptions, SearchResponse,
    SearchResult,
};
pub use store::{ModelInfo, SearchFilter, Store};

use std::path::{Path, PathBuf};

/// Name of the per-project index directory (created by `pommel index`).
pub const INDEX_DIR: &str = ".pommel";

/// Resolve the index directory for a project.
pub fn resolve_index_dir(project_root: &Path) -> PathBuf {
    project_root.join(INDEX_DIR)
}

/// Unified test-chunk detection heuristic, shared by the Chunker (`level` tagging) and
/// the heuristic re-ranker's `test_penalty` signal.
pub fn is_test_chunk(name: &str, file: &str) -> bool {
    let name_match = name.starts_with("test_")
        || name.starts_with("Test")
        || name.ends_with("_test")
        || name.contains("_test_")
        || name.contains(".test");
    if name_match {
        return true;
    }
    file.contains("/tests/")
        || file.contains("\\tests\\")
        || file.starts_with("tests/")
        || file.starts_with("tests\\")
        || file.contains("_test.")
        || file.contains(".test.")
        || file.contains(".spec.")
        || file.ends_with("_test.go")
        || file.ends_with("_test.py")
}

/// Relativize a path against a root and normalize separators for display.
pub fn rel_display(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Maximum file size to index (1MB).
const MAX_FILE_SIZE: u64 = 1_048_576;

/// Enumerate files to index in a project directory.
///
/// Respects .gitignore, skips hidden files and large files (>1MB). Returns relative
/// paths from the project root.
pub fn enumerate_files(
    root: &Path,
    extensions: &[&str],
    no_ignore: bool,
) -> anyhow::Result<Vec<PathBuf>> {
    use anyhow::Context;
    use ignore::WalkBuilder;

    let root = dunce::canonicalize(root).context("Failed to canonicalize root")?;

    let walker = WalkBuilder::new(&root)
        .git_ignore(!no_ignore)
        .git_global(!no_ignore)
        .git_exclude(!no_ignore)
        .ignore(!no_ignore)
        .hidden(!no_ignore)
        .follow_links(false)
        .build();

    let files: Vec<PathBuf> = walker
        .filter_map(|e| {
            e.map_err(|err| {
                tracing::debug!(error = %err, "Failed to read directory entry during walk");
            })
            .ok()
        })
        .filter(|e| e.file_type().map(|ft| ft.is_file()).unwrap_or(false))
        .filter(|e| {
            e.metadata()
                .map(|m| m.len() <= MAX_FILE_SIZE)
                .unwrap_or(false)
        })
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| extensions.contains(&ext))
                .unwrap_or(false)
        })
        .filter_map({
            let failure_count = std::sync::atomic::AtomicUsize::new(0);
            move |e| {
                let path = match dunce::canonicalize(e.path()) {
                    Ok(p) => p,
                    Err(err) => {
                        let count =
                            failure_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        if count < 3 {
                            tracing::warn!(
                                path = %e.path().display(),
                                error = %err,
                                "Failed to canonicalize path, skipping"
                            );
                        } else {
                            tracing::debug!(
                                path = %e.path().display(),
                                error = %err,
                                "Failed to canonicalize path, skipping"
                            );
                        }
                        return None;
                    }
                };
                if path.starts_with(&root) {
                    Some(path.strip_prefix(&root).unwrap_or(&path).to_path_buf())
                } else {
                    tracing::warn!("Skipping path outside project: {}", e.path().display());
                    None
                }
            }
        })
        .collect();

    tracing::info!(file_count = files.len(), "File enumeration complete");

    Ok(files)
}
