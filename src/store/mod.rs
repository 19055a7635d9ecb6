//! SQLite storage for chunks and embeddings (sqlx async with sync wrappers)
//!
//! Provides sync methods that internally use a tokio runtime to execute async sqlx
//! operations, so callers (CLI commands, the indexer) can use the Store synchronously.
//!
//! ## Module Structure
//!
//! - `helpers` - Types and embedding conversion functions
//! - `migrations` - Schema bootstrap and version checks
//! - `chunks` - File and chunk CRUD operations

pub(crate) mod chunks;
mod migrations;

/// Helper types and embedding conversion functions.
///
/// This module is `pub(crate)` - external consumers should use the re-exported
/// types from `pommel::store` instead of accessing `pommel::store::helpers` directly.
pub(crate) mod helpers;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tokio::runtime::Runtime;

/// Summary of an indexed code chunk (file, class or method).
pub use helpers::ChunkSummary;

/// Statistics about the index (chunk counts, languages, etc.).
pub use helpers::IndexStats;

/// Embedding model metadata.
pub use helpers::ModelInfo;

/// Filter and scoring options for search.
pub use helpers::SearchFilter;

/// A code chunk search result with similarity score.
pub use helpers::SearchResult;

/// Store operation errors.
pub use helpers::StoreError;

/// Current database schema version.
pub use helpers::CURRENT_SCHEMA_VERSION;

use crate::parser::Chunk;

/// Thread-safe SQLite store for chunks and embeddings.
///
/// Uses sqlx connection pooling for concurrent reads and WAL mode for crash
/// safety. All methods are synchronous but internally use an async runtime to
/// execute sqlx operations.
///
/// # Example
///
/// ```no_run
/// use pommel::Store;
/// use std::path::Path;
///
/// let store = Store::open(Path::new(".pommel/index.db"), None)?;
/// let stats = store.stats()?;
/// println!("Indexed {} chunks", stats.chunk_count);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct Store {
    pub(crate) pool: SqlitePool,
    pub(crate) rt: Runtime,
    /// Whether close() has already been called (skip WAL checkpoint in Drop)
    closed: AtomicBool,
}

impl Store {
    /// Opens an index, bootstrapping the schema if the file is new. When `model`
    /// is given, the stored embedding model metadata is checked for compatibility
    /// and written if this is a fresh index.
    pub fn open(path: &Path, model: Option<&ModelInfo>) -> Result<Self, StoreError> {
        let rt = Runtime::new().map_err(|e| StoreError::Runtime(e.to_string()))?;

        let path_str = path.to_string_lossy().replace('\\', "/");
        let db_url = format!("sqlite://{}?mode=rwc", path_str);

        let pool = rt.block_on(async {
            SqlitePoolOptions::new()
                .max_connections(4)
                .idle_timeout(std::time::Duration::from_secs(300))
                .after_connect(|conn, _meta| {
                    Box::pin(async move {
                        sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                        sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                        sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                        sqlx::query("PRAGMA synchronous = NORMAL").execute(&mut *conn).await?;
                        sqlx::query("PRAGMA cache_size = -16384").execute(&mut *conn).await?;
                        sqlx::query("PRAGMA temp_store = MEMORY").execute(&mut *conn).await?;
                        Ok(())
                    })
                })
                .connect(&db_url)
                .await
        })?;

        let store = Self {
            pool,
            rt,
            closed: AtomicBool::new(false),
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let restrictive = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(path, restrictive.clone());
            let wal_path = path.with_extension("db-wal");
            let shm_path = path.with_extension("db-shm");
            let _ = std::fs::set_permissions(&wal_path, restrictive.clone());
            let _ = std::fs::set_permissions(&shm_path, restrictive);
        }

        store.rt.block_on(migrations::bootstrap(&store.pool))?;

        if let Some(model) = model {
            store.reconcile_model(model)?;
        }

        tracing::info!(path = %path.display(), "index database connected");
        Ok(store)
    }

    fn reconcile_model(&self, model: &ModelInfo) -> Result<(), StoreError> {
        self.rt.block_on(async {
            let stored_name: Option<(String,)> =
                sqlx::query_as("SELECT value FROM metadata WHERE key = 'model_name'")
                    .fetch_optional(&self.pool)
                    .await?;
            let stored_dim: Option<(String,)> =
                sqlx::query_as("SELECT value FROM metadata WHERE key = 'dimensions'")
                    .fetch_optional(&self.pool)
                    .await?;

            match (stored_name, stored_dim) {
                (Some((name,)), Some((dim,))) => {
                    if name != model.model_name {
                        return Err(StoreError::ModelMismatch(name, model.model_name.clone()));
                    }
                    let dim: u32 = dim.parse().unwrap_or(0);
                    if dim != model.dimensions {
                        return Err(StoreError::DimensionMismatch(dim, model.dimensions));
                    }
                }
                _ => {
                    sqlx::query(
                        "INSERT INTO metadata (key, value) VALUES ('model_name', ?)
                         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    )
                    .bind(&model.model_name)
                    .execute(&self.pool)
                    .await?;
                    sqlx::query(
                        "INSERT INTO metadata (key, value) VALUES ('dimensions', ?)
                         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    )
                    .bind(model.dimensions.to_string())
                    .execute(&self.pool)
                    .await?;
                }
            }
            Ok(())
        })
    }

    /// Returns the stored content hash for `path`, or `None` if the file is not indexed.
    pub fn file_content_hash(&self, path: &str) -> Result<Option<String>, StoreError> {
        self.rt.block_on(chunks::file_content_hash(&self.pool, path))
    }

    /// Records or updates a file's metadata row.
    pub fn upsert_file(
        &self,
        path: &str,
        content_hash: &str,
        language: &str,
        size: i64,
        modified_at: i64,
    ) -> Result<(), StoreError> {
        self.rt
            .block_on(chunks::upsert_file(&self.pool, path, content_hash, language, size, modified_at))
    }

    /// Deletes a file and cascades to its chunks, embeddings and FTS rows.
    pub fn delete_file(&self, path: &str) -> Result<(), StoreError> {
        self.rt.block_on(chunks::delete_file(&self.pool, path))
    }

    /// Returns the chunk ids currently stored for `path` (for diffing against a reparse).
    pub fn existing_chunk_ids_for_file(&self, path: &str) -> Result<Vec<String>, StoreError> {
        self.rt.block_on(chunks::existing_chunk_ids_for_file(&self.pool, path))
    }

    /// Inserts or updates a chunk and its FTS row.
    pub fn insert_chunk(&self, chunk: &Chunk) -> Result<(), StoreError> {
        self.rt.block_on(chunks::insert_chunk(&self.pool, chunk))
    }

    /// Deletes a chunk and its FTS row.
    pub fn delete_chunk(&self, id: &str) -> Result<(), StoreError> {
        self.rt.block_on(chunks::delete_chunk(&self.pool, id))
    }

    /// Inserts or replaces the embedding vector for a chunk.
    pub fn insert_embedding(&self, chunk_id: &str, vector: &[f32]) -> Result<(), StoreError> {
        self.rt.block_on(chunks::insert_embedding(&self.pool, chunk_id, vector))
    }

    /// Fetches one chunk's metadata by id.
    pub fn chunk_summary(&self, id: &str) -> Result<Option<ChunkSummary>, StoreError> {
        self.rt.block_on(chunks::chunk_summary(&self.pool, id))
    }

    /// Loads stored embeddings for brute-force vector search, restricted to `filter`
    /// (chunk level / path prefix) at the retrieval step rather than post-hoc.
    pub fn all_embeddings(&self, filter: &SearchFilter) -> Result<Vec<(String, Vec<f32>)>, StoreError> {
        self.rt.block_on(chunks::all_embeddings(&self.pool, filter))
    }

    /// Runs an FTS5 MATCH query restricted to `filter`, returning chunk ids ranked by
    /// `rank` (best first) paired with their raw BM25 rank value. Malformed queries
    /// return no results rather than erroring.
    pub fn search_fts(
        &self,
        query: &str,
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        self.rt.block_on(chunks::search_fts(&self.pool, query, limit, filter))
    }

    /// Aggregate index statistics for `pommel status`.
    pub fn stats(&self, model: &ModelInfo) -> Result<IndexStats, StoreError> {
        let (file_count, chunk_count, embedding_count) = self.rt.block_on(chunks::stats(&self.pool))?;
        Ok(IndexStats {
            file_count,
            chunk_count,
            embedding_count,
            model_name: model.model_name.clone(),
            dimensions: model.dimensions,
        })
    }

    /// All indexed file paths, for `pommel index` to prune files removed from disk
    /// since the last run.
    pub fn existing_file_paths(&self) -> Result<Vec<String>, StoreError> {
        self.rt.block_on(chunks::all_file_paths(&self.pool))
    }

    /// Gracefully close the store, performing a WAL checkpoint.
    pub fn close(self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::Release);
        self.rt.block_on(async {
            sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)").execute(&self.pool).await?;
            self.pool.close().await;
            Ok(())
        })
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            if let Err(e) = self.rt.block_on(async {
                sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)").execute(&self.pool).await
            }) {
                tracing::debug!(error = %e, "WAL checkpoint on drop failed (non-fatal)");
            }
        }));
    }
}
