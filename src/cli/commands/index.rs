//! `pommel index`: one-shot (re)build of the project index (§4.12).

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use pommel::config::Config;
use pommel::{Embedding, FileEvent, HnswIndex, Indexer, IndexerOptions, ModelInfo, SearchFilter, Store};

use crate::cli::acquire_index_lock;

/// Builds or incrementally refreshes the index: embeds changed files, drops files
/// removed from disk, and rebuilds the HNSW vector index over the result.
///
/// `force` wipes the existing index first so every file is re-chunked and re-embedded
/// under the current provider/model, even if content hashes are unchanged.
pub(crate) fn run(root: &Path, config: &Config, force: bool) -> Result<()> {
    let index_dir = pommel::resolve_index_dir(root);
    std::fs::create_dir_all(&index_dir)
        .with_context(|| format!("failed to create {}", index_dir.display()))?;
    let _lock = acquire_index_lock(&index_dir)?;

    let index_path = config.store.path_or_default(root);
    if force {
        for ext in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{ext}", index_path.display()));
        }
        let _ = std::fs::remove_file(index_dir.join("index.hnsw"));
        let _ = std::fs::remove_file(index_dir.join("index.ids"));
    }

    let provider = config.build_provider_stack()?;
    let model = ModelInfo { model_name: provider.model_name().to_string(), dimensions: provider.dimensions() as u32 };

    // Everything above is plain sync code; Store::open and the sync methods below run
    // their own internal runtime via block_on and must not be called while a second
    // runtime (entered further down for the Indexer) is already active on this thread.
    let store = Arc::new(Store::open(&index_path, Some(&model)).context("failed to open index")?);

    let extensions: Vec<&str> =
        pommel::language::REGISTRY.all().flat_map(|def| def.extensions.iter().copied()).collect();
    let files = pommel::enumerate_files(root, &extensions, false)?;
    let current: HashSet<String> = files.iter().map(|p| p.to_string_lossy().replace('\\', "/")).collect();

    let mut events: Vec<FileEvent> = files.iter().map(|rel| FileEvent::Created(root.join(rel))).collect();
    for existing in store.existing_file_paths().context("failed to list indexed files")? {
        if !current.contains(&existing) {
            events.push(FileEvent::Deleted(root.join(&existing)));
        }
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}").unwrap());
    spinner.set_message(format!("indexing {} file(s)...", events.len()));
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));

    let options = IndexerOptions::new(provider.context_size());
    let indexer = Indexer::new(store.clone(), provider, options)?;
    let rt = tokio::runtime::Runtime::new().context("failed to start indexing runtime")?;
    let stats = rt.block_on(indexer.index_all(root, events));
    drop(rt);

    spinner.set_message("building vector index...");
    let embeddings = store.all_embeddings(&SearchFilter::default()).context("failed to load embeddings")?;
    if !embeddings.is_empty() {
        let pairs: Vec<(String, Embedding)> =
            embeddings.into_iter().map(|(id, v)| (id, Embedding::new(v))).collect();
        let hnsw = HnswIndex::build(pairs).context("failed to build vector index")?;
        hnsw.save(&index_dir, "index").context("failed to save vector index")?;
    }
    spinner.finish_and_clear();

    println!(
        "indexed {} file(s): {} chunks inserted, {} deleted, {} unchanged ({} skipped, {} failed)",
        stats.files_indexed,
        stats.chunks_inserted,
        stats.chunks_deleted,
        stats.chunks_unchanged,
        stats.files_skipped,
        stats.files_failed,
    );

    if stats.files_failed > 0 {
        anyhow::bail!("{} file(s) failed to index; see logs for details", stats.files_failed);
    }
    Ok(())
}
