//! `pommel status`: index statistics (§4.12, renamed from the teacher's `stats`).

use std::path::Path;

use anyhow::{Context, Result};

use pommel::config::Config;
use pommel::{HnswIndex, ModelInfo, Store};

pub(crate) fn run(root: &Path, config: &Config, json: bool) -> Result<()> {
    let index_path = config.store.path_or_default(root);
    if !index_path.exists() {
        anyhow::bail!("no index found at {}; run 'pommel index' first", index_path.display());
    }

    let provider = config.build_provider_stack()?;
    let model = ModelInfo { model_name: provider.model_name().to_string(), dimensions: provider.dimensions() as u32 };
    let store = Store::open(&index_path, Some(&model)).context("failed to open index")?;
    let stats = store.stats(&model)?;

    let index_dir = pommel::resolve_index_dir(root);
    let hnsw_vectors = HnswIndex::count_vectors(&index_dir, "index");

    if json {
        let out = serde_json::json!({
            "file_count": stats.file_count,
            "chunk_count": stats.chunk_count,
            "embedding_count": stats.embedding_count,
            "model_name": stats.model_name,
            "dimensions": stats.dimensions,
            "hnsw_vectors": hnsw_vectors,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("files:      {}", stats.file_count);
        println!("chunks:     {}", stats.chunk_count);
        println!("embeddings: {}", stats.embedding_count);
        println!("model:      {} ({} dims)", stats.model_name, stats.dimensions);
        match hnsw_vectors {
            Some(count) => println!("vector index: {count} vectors"),
            None => println!("vector index: not built (falling back to brute-force search)"),
        }
    }
    Ok(())
}
