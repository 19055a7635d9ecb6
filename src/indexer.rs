//! File-event-driven indexing: dedup, chunk, batch-embed, atomic write (§4.5)
//!
//! Control flow: `Watcher → Indexer → Chunker → (Embedding Cache → Provider via Retry,
//! batched) → Store`. A worker pool of size `W` processes file events concurrently;
//! within one file, chunk diffing and the atomic write are sequential but embedding
//! batches for that file may run up to `C` at once. Like the Searcher, the Indexer
//! talks to `store::chunks` directly rather than through `Store`'s sync wrapper, since
//! it drives genuine concurrency (multiple files in flight) from inside its own
//! runtime and the sync wrapper's `block_on` would panic if called from there.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;

use crate::embedder::{CancelToken, Provider, ProviderError};
use crate::parser::{Chunk, Parser, ParserError};
use crate::store::{chunks, Store, StoreError};

/// Default number of files processed concurrently by the worker pool (`W`).
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

/// Default bounded embedding concurrency within a single file (`C`).
pub const DEFAULT_EMBED_CONCURRENCY: usize = 4;

/// Default batch size (items) before an embedding batch is flushed.
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Soft character budget per embedding batch, checked alongside `batch_size`.
pub const DEFAULT_BATCH_CHAR_BUDGET: usize = 16_384;

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("parser error: {0}")]
    Parser(#[from] ParserError),
    #[error("embedding provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),
}

/// A single file-change event handed to the Indexer by the Watcher (or a one-shot
/// directory walk for `pommel index`).
#[derive(Debug, Clone)]
pub enum FileEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
}

impl FileEvent {
    pub fn path(&self) -> &Path {
        match self {
            FileEvent::Created(p) | FileEvent::Modified(p) | FileEvent::Deleted(p) => p,
        }
    }
}

/// Aggregate outcome of processing one or more file events, returned by
/// [`Indexer::index_all`] and accumulated by callers of [`Indexer::process_event`].
#[derive(Debug, Clone, Default)]
pub struct IndexStats {
    pub files_indexed: u64,
    pub files_skipped: u64,
    pub files_deleted: u64,
    pub files_failed: u64,
    pub chunks_inserted: u64,
    pub chunks_deleted: u64,
    pub chunks_unchanged: u64,
}

impl IndexStats {
    fn merge(&mut self, other: IndexStats) {
        self.files_indexed += other.files_indexed;
        self.files_skipped += other.files_skipped;
        self.files_deleted += other.files_deleted;
        self.files_failed += other.files_failed;
        self.chunks_inserted += other.chunks_inserted;
        self.chunks_deleted += other.chunks_deleted;
        self.chunks_unchanged += other.chunks_unchanged;
    }
}

/// Tunable knobs for the Indexer; defaults match §4.5 ("default 4", "default = CPU
/// count"). Kept as a plain struct rather than reading `config::Config` directly so
/// the Indexer has no dependency on the config layer's own lifecycle.
#[derive(Debug, Clone)]
pub struct IndexerOptions {
    pub context_size: usize,
    pub embed_concurrency: usize,
    pub batch_size: usize,
    pub batch_char_budget: usize,
    pub worker_count: usize,
}

impl IndexerOptions {
    pub fn new(context_size: usize) -> Self {
        Self {
            context_size,
            embed_concurrency: DEFAULT_EMBED_CONCURRENCY,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_char_budget: DEFAULT_BATCH_CHAR_BUDGET,
            worker_count: default_worker_count(),
        }
    }
}

/// The write side of the index: consumes file events, dedups unchanged files by
/// content hash, chunks, batch-embeds, and reconciles the Store (§4.5).
pub struct Indexer {
    store: Arc<Store>,
    parser: Arc<Parser>,
    provider: Arc<dyn Provider>,
    options: IndexerOptions,
}

impl Indexer {
    pub fn new(store: Arc<Store>, provider: Arc<dyn Provider>, options: IndexerOptions) -> Result<Self, IndexerError> {
        let parser = Arc::new(Parser::new()?);
        Ok(Self { store, parser, provider, options })
    }

    /// Processes a batch of file events with a bounded worker pool of size `W`
    /// (`options.worker_count`). Each event's failure is isolated: one file's error
    /// never aborts the rest (§4.5 "Propagation ... do not propagate to other files").
    pub async fn index_all(&self, root: &Path, events: Vec<FileEvent>) -> IndexStats {
        let semaphore = Arc::new(Semaphore::new(self.options.worker_count.max(1)));
        let mut tasks = tokio::task::JoinSet::new();

        for event in events {
            let permit = semaphore.clone();
            let root = root.to_path_buf();
            let store = self.store.clone();
            let parser = self.parser.clone();
            let provider = self.provider.clone();
            let options = self.options.clone();

            tasks.spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore not closed");
                process_one(&store, &parser, provider, &options, &root, &event).await
            });
        }

        let mut stats = IndexStats::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(file_stats)) => stats.merge(file_stats),
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, "file reindex failed, left in previous state");
                    stats.files_failed += 1;
                }
                Err(join_err) => {
                    tracing::warn!(error = %join_err, "indexer task panicked");
                    stats.files_failed += 1;
                }
            }
        }
        stats
    }

    /// Processes a single event, for watcher-driven incremental updates.
    pub async fn process_event(&self, root: &Path, event: FileEvent) -> Result<IndexStats, IndexerError> {
        process_one(&self.store, &self.parser, self.provider.clone(), &self.options, root, &event).await
    }
}

async fn process_one(
    store: &Store,
    parser: &Parser,
    provider: Arc<dyn Provider>,
    options: &IndexerOptions,
    root: &Path,
    event: &FileEvent,
) -> Result<IndexStats, IndexerError> {
    let mut stats = IndexStats::default();
    let rel_path = crate::rel_display(event.path(), root);

    match event {
        FileEvent::Deleted(_) => {
            chunks::delete_file_atomic(&store.pool, &rel_path).await?;
            stats.files_deleted += 1;
            Ok(stats)
        }
        FileEvent::Created(abs_path) | FileEvent::Modified(abs_path) => {
            let bytes = tokio::fs::read(abs_path).await?;
            let content_hash = blake3::hash(&bytes).to_hex().to_string();

            let existing_hash = chunks::file_content_hash(&store.pool, &rel_path).await?;
            if existing_hash.as_deref() == Some(content_hash.as_str()) {
                stats.files_skipped += 1;
                return Ok(stats);
            }

            let ext = abs_path.extension().and_then(|e| e.to_str()).unwrap_or("");
            let language = crate::language::REGISTRY
                .from_extension(ext)
                .map(|def| def.name)
                .ok_or_else(|| IndexerError::UnsupportedFileType(ext.to_string()))?;

            let new_chunks = {
                let parser = parser;
                let path = abs_path.clone();
                let context_size = options.context_size;
                let parsed =
                    tokio::task::block_in_place(|| parser.parse_file_with_budget(&path, context_size))?;
                // The parser reports chunk.file as whatever path it was given; rewrite it
                // to the project-relative path so it matches every other `file_path`
                // column (upsert_file, existing-hash lookups, path-prefix filtering).
                parsed
                    .into_iter()
                    .map(|mut c| {
                        c.file = PathBuf::from(&rel_path);
                        c
                    })
                    .collect::<Vec<_>>()
            };

            let existing = chunks::existing_chunk_hashes_for_file(&store.pool, &rel_path).await?;
            let mut existing_by_structural: std::collections::HashMap<String, (String, String)> =
                std::collections::HashMap::new();
            for (id, structural_hash, content_hash) in existing {
                existing_by_structural.insert(structural_hash, (id, content_hash));
            }

            let mut keep_structural: HashSet<String> = HashSet::new();
            let mut to_embed: Vec<Chunk> = Vec::new();
            let mut deletes: Vec<String> = Vec::new();
            let mut keep_count: u64 = 0;

            for chunk in &new_chunks {
                keep_structural.insert(chunk.structural_hash.clone());
                match existing_by_structural.get(&chunk.structural_hash) {
                    Some((_old_id, old_content_hash)) if *old_content_hash == chunk.content_hash => {
                        keep_count += 1;
                    }
                    Some((old_id, _)) => {
                        deletes.push(old_id.clone());
                        to_embed.push(chunk.clone());
                    }
                    None => {
                        to_embed.push(chunk.clone());
                    }
                }
            }
            for (structural_hash, (old_id, _)) in &existing_by_structural {
                if !keep_structural.contains(structural_hash) {
                    deletes.push(old_id.clone());
                }
            }

            let embedded = embed_in_batches(provider, options, &to_embed).await?;

            let size = bytes.len() as i64;
            let modified_at = tokio::fs::metadata(abs_path)
                .await
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);

            chunks::write_file_reindex(
                &store.pool,
                &rel_path,
                &content_hash,
                language,
                size,
                modified_at,
                &embedded,
                &deletes,
            )
            .await?;

            stats.files_indexed += 1;
            stats.chunks_inserted += embedded.len() as u64;
            stats.chunks_deleted += deletes.len() as u64;
            stats.chunks_unchanged += keep_count;
            Ok(stats)
        }
    }
}

/// Embeds `chunks` in batches bounded by `batch_size`/`batch_char_budget`, with up to
/// `embed_concurrency` batches in flight at once (§4.5 step 4). Aborts on the first
/// batch failure rather than persisting a partial file (the caller's transaction
/// never starts, so no rows are written at all for this file).
async fn embed_in_batches(
    provider: Arc<dyn Provider>,
    options: &IndexerOptions,
    new_chunks: &[Chunk],
) -> Result<Vec<(Chunk, Vec<f32>)>, IndexerError> {
    if new_chunks.is_empty() {
        return Ok(Vec::new());
    }

    let batches = build_batches(new_chunks, options.batch_size, options.batch_char_budget);
    let semaphore = Arc::new(Semaphore::new(options.embed_concurrency.max(1)));
    let cancel = CancelToken::new();

    // Up to `embed_concurrency` batches embed concurrently; each task holds its permit
    // for the full embed_many call so the semaphore genuinely bounds in-flight requests.
    let mut tasks = tokio::task::JoinSet::new();
    for (batch_idx, batch) in batches.into_iter().enumerate() {
        let permit = semaphore.clone();
        let cancel = cancel.clone();
        let provider = provider.clone();
        tasks.spawn(async move {
            let _permit = permit.acquire_owned().await.expect("semaphore not closed");
            let texts: Vec<String> = batch.iter().map(chunk_embedding_text).collect();
            let result = provider.embed_many(&texts, &cancel).await;
            (batch_idx, batch, result)
        });
    }

    // Collect back in original order, since JoinSet completion order is not spawn
    // order and later code zips embeddings 1:1 with their chunks.
    let mut ordered: Vec<(usize, Vec<Chunk>, Result<Vec<crate::embedder::Embedding>, ProviderError>)> =
        Vec::new();
    while let Some(joined) = tasks.join_next().await {
        ordered.push(joined.expect("batch embedding task never panics"));
    }
    ordered.sort_by_key(|(idx, _, _)| *idx);

    let mut out = Vec::with_capacity(new_chunks.len());
    for (_, batch, result) in ordered {
        let vectors = result?;
        for (chunk, vector) in batch.into_iter().zip(vectors.into_iter()) {
            out.push((chunk, vector.as_vec().clone()));
        }
    }
    Ok(out)
}

/// Text handed to the embedding provider for a chunk: signature/doc give the model
/// more to key on than raw content alone for short chunks.
fn chunk_embedding_text(chunk: &Chunk) -> String {
    match &chunk.doc {
        Some(doc) if !doc.is_empty() => format!("{doc}\n{}", chunk.content),
        _ => chunk.content.clone(),
    }
}

/// Splits chunks into batches of at most `batch_size` items, flushing early if the
/// next chunk would push the running character total past `char_budget`.
fn build_batches(new_chunks: &[Chunk], batch_size: usize, char_budget: usize) -> Vec<Vec<Chunk>> {
    let mut batches = Vec::new();
    let mut current: Vec<Chunk> = Vec::new();
    let mut current_chars = 0usize;

    for chunk in new_chunks {
        let len = chunk.content.len();
        let would_overflow = !current.is_empty() && current_chars + len > char_budget;
        if current.len() >= batch_size || would_overflow {
            batches.push(std::mem::take(&mut current));
            current_chars = 0;
        }
        current_chars += len;
        current.push(chunk.clone());
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::ChunkType;
    use crate::parser::ChunkLevel;
    use std::path::PathBuf;

    fn sample_chunk(id: &str, name: &str, content: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            file: PathBuf::from("src/lib.rs"),
            language: "rust",
            level: ChunkLevel::Method,
            chunk_type: ChunkType::Function,
            name: name.to_string(),
            signature: format!("fn {name}()"),
            content: content.to_string(),
            doc: None,
            line_start: 1,
            line_end: 3,
            content_hash: format!("h-{name}"),
            structural_hash: format!("s-{name}"),
            parent_id: None,
            parent_chunk_id: None,
        }
    }

    #[test]
    fn test_build_batches_splits_on_batch_size() {
        let chunks: Vec<Chunk> =
            (0..5).map(|i| sample_chunk(&format!("c{i}"), &format!("fn{i}"), "x")).collect();
        let batches = build_batches(&chunks, 2, 10_000);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[2].len(), 1);
    }

    #[test]
    fn test_build_batches_splits_on_char_budget() {
        let big = "x".repeat(50);
        let chunks = vec![
            sample_chunk("c0", "fn0", &big),
            sample_chunk("c1", "fn1", &big),
            sample_chunk("c2", "fn2", &big),
        ];
        let batches = build_batches(&chunks, 100, 80);
        assert_eq!(batches.len(), 3, "each chunk alone exceeds half the budget, forcing a flush");
    }

    #[test]
    fn test_build_batches_empty_input() {
        let chunks: Vec<Chunk> = Vec::new();
        assert!(build_batches(&chunks, 10, 10_000).is_empty());
    }

    #[test]
    fn test_chunk_embedding_text_prefixes_doc() {
        let mut chunk = sample_chunk("c0", "fn0", "fn fn0() {}");
        chunk.doc = Some("Does a thing.".to_string());
        assert_eq!(chunk_embedding_text(&chunk), "Does a thing.\nfn fn0() {}");
    }

    #[test]
    fn test_chunk_embedding_text_no_doc_is_content_only() {
        let chunk = sample_chunk("c0", "fn0", "fn fn0() {}");
        assert_eq!(chunk_embedding_text(&chunk), "fn fn0() {}");
    }

    #[test]
    fn test_index_stats_merge_sums_fields() {
        let mut a = IndexStats { files_indexed: 1, chunks_inserted: 3, ..Default::default() };
        let b = IndexStats { files_indexed: 2, chunks_deleted: 1, ..Default::default() };
        a.merge(b);
        assert_eq!(a.files_indexed, 3);
        assert_eq!(a.chunks_inserted, 3);
        assert_eq!(a.chunks_deleted, 1);
    }
}
