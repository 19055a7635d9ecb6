//! Chunk and file CRUD operations

use std::path::PathBuf;

use sqlx::{Row, SqlitePool};

use super::helpers::{blob_to_vector, vector_to_blob, ChunkRow, ChunkSummary, SearchFilter, StoreError};
use crate::parser::{Chunk, ChunkLevel, ChunkType};

/// Builds the `WHERE` fragment and binds for a `SearchFilter` against a `chunks`-
/// joined query, aliasing the chunks table as `c`. Returns the fragment (empty
/// string, or starting with ` AND `) plus the level strings to bind in order.
fn filter_fragment(filter: &SearchFilter) -> (String, Vec<&'static str>) {
    let mut clauses = Vec::new();
    let mut level_binds = Vec::new();

    if !filter.levels.is_empty() {
        let placeholders: Vec<&str> = filter.levels.iter().map(|l| l.as_str()).collect();
        level_binds = placeholders.clone();
        let marks = vec!["?"; placeholders.len()].join(", ");
        clauses.push(format!("c.level IN ({marks})"));
    }
    if filter.path_prefix.is_some() {
        clauses.push("c.file_path LIKE ? || '%'".to_string());
    }

    if clauses.is_empty() {
        (String::new(), level_binds)
    } else {
        (format!(" AND {}", clauses.join(" AND ")), level_binds)
    }
}

fn chunk_type_for_level(level: ChunkLevel, name: &str) -> ChunkType {
    match level {
        ChunkLevel::File => ChunkType::Constant,
        ChunkLevel::Class => ChunkType::Class,
        ChunkLevel::Method => {
            if name.is_empty() {
                ChunkType::Function
            } else {
                ChunkType::Method
            }
        }
    }
}

fn row_to_summary(row: ChunkRow) -> ChunkSummary {
    let level: ChunkLevel = row.level.parse().unwrap_or(ChunkLevel::Method);
    ChunkSummary {
        chunk_type: chunk_type_for_level(level, &row.name),
        id: row.id,
        file: PathBuf::from(row.file_path),
        language: row.language,
        level,
        name: row.name,
        content: row.content,
        line_start: row.line_start,
        line_end: row.line_end,
        parent_id: row.parent_id,
        parent_chunk_id: row.parent_chunk_id,
    }
}

pub(crate) async fn upsert_file(
    pool: &SqlitePool,
    path: &str,
    content_hash: &str,
    language: &str,
    size: i64,
    modified_at: i64,
) -> Result<(), StoreError> {
    let now = chrono::Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT INTO files (path, content_hash, language, size, modified_at, indexed_at)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(path) DO UPDATE SET
            content_hash = excluded.content_hash,
            language = excluded.language,
            size = excluded.size,
            modified_at = excluded.modified_at,
            indexed_at = excluded.indexed_at",
    )
    .bind(path)
    .bind(content_hash)
    .bind(language)
    .bind(size)
    .bind(modified_at)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

pub(crate) async fn file_content_hash(
    pool: &SqlitePool,
    path: &str,
) -> Result<Option<String>, StoreError> {
    let row: Option<(String,)> = sqlx::query_as("SELECT content_hash FROM files WHERE path = ?")
        .bind(path)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(h,)| h))
}

pub(crate) async fn file_modified_at(
    pool: &SqlitePool,
    path: &str,
) -> Result<Option<i64>, StoreError> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT modified_at FROM files WHERE path = ?")
        .bind(path)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(m,)| m))
}

/// Deletes a file and, via `ON DELETE CASCADE`, all its chunks/embeddings/FTS rows.
pub(crate) async fn delete_file(pool: &SqlitePool, path: &str) -> Result<(), StoreError> {
    let ids: Vec<(String,)> = sqlx::query_as("SELECT id FROM chunks WHERE file_path = ?")
        .bind(path)
        .fetch_all(pool)
        .await?;
    for (id,) in &ids {
        sqlx::query("DELETE FROM chunks_fts WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
    }
    sqlx::query("DELETE FROM files WHERE path = ?")
        .bind(path)
        .execute(pool)
        .await?;
    Ok(())
}

pub(crate) async fn insert_chunk(pool: &SqlitePool, chunk: &Chunk) -> Result<(), StoreError> {
    let now = chrono::Utc::now().to_rfc3339();
    let file_path = chunk.file.to_string_lossy().to_string();
    sqlx::query(
        "INSERT INTO chunks (
            id, file_path, language, level, name, content, line_start, line_end,
            parent_id, parent_chunk_id, content_hash, structural_hash, created_at, updated_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            content = excluded.content,
            line_start = excluded.line_start,
            line_end = excluded.line_end,
            parent_id = excluded.parent_id,
            parent_chunk_id = excluded.parent_chunk_id,
            content_hash = excluded.content_hash,
            structural_hash = excluded.structural_hash,
            updated_at = excluded.updated_at",
    )
    .bind(&chunk.id)
    .bind(&file_path)
    .bind(chunk.language)
    .bind(chunk.level.as_str())
    .bind(&chunk.name)
    .bind(&chunk.content)
    .bind(chunk.line_start)
    .bind(chunk.line_end)
    .bind(&chunk.parent_id)
    .bind(&chunk.parent_chunk_id)
    .bind(&chunk.content_hash)
    .bind(&chunk.structural_hash)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO chunks_fts (id, name, content) VALUES (?, ?, ?)
         ON CONFLICT DO NOTHING",
    )
    .bind(&chunk.id)
    .bind(&chunk.name)
    .bind(&chunk.content)
    .execute(pool)
    .await?;

    Ok(())
}

pub(crate) async fn delete_chunk(pool: &SqlitePool, id: &str) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM chunks WHERE id = ?").bind(id).execute(pool).await?;
    sqlx::query("DELETE FROM chunks_fts WHERE id = ?").bind(id).execute(pool).await?;
    Ok(())
}

pub(crate) async fn existing_chunk_ids_for_file(
    pool: &SqlitePool,
    path: &str,
) -> Result<Vec<String>, StoreError> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT id FROM chunks WHERE file_path = ?")
        .bind(path)
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub(crate) async fn insert_embedding(
    pool: &SqlitePool,
    chunk_id: &str,
    vector: &[f32],
) -> Result<(), StoreError> {
    let blob = vector_to_blob(vector);
    sqlx::query(
        "INSERT INTO embeddings (chunk_id, vector, dim) VALUES (?, ?, ?)
         ON CONFLICT(chunk_id) DO UPDATE SET vector = excluded.vector, dim = excluded.dim",
    )
    .bind(chunk_id)
    .bind(blob)
    .bind(vector.len() as i64)
    .execute(pool)
    .await?;
    Ok(())
}

pub(crate) async fn chunk_row(pool: &SqlitePool, id: &str) -> Result<Option<ChunkRow>, StoreError> {
    let row = sqlx::query(
        "SELECT id, file_path, language, level, name, content, line_start, line_end,
                parent_id, parent_chunk_id
         FROM chunks WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| ChunkRow {
        id: r.get("id"),
        file_path: r.get("file_path"),
        language: r.get("language"),
        level: r.get("level"),
        name: r.get("name"),
        content: r.get("content"),
        line_start: r.get::<i64, _>("line_start") as u32,
        line_end: r.get::<i64, _>("line_end") as u32,
        parent_id: r.get("parent_id"),
        parent_chunk_id: r.get("parent_chunk_id"),
    }))
}

pub(crate) async fn chunk_summary(
    pool: &SqlitePool,
    id: &str,
) -> Result<Option<ChunkSummary>, StoreError> {
    Ok(chunk_row(pool, id).await?.map(row_to_summary))
}

pub(crate) async fn all_embeddings(
    pool: &SqlitePool,
    filter: &SearchFilter,
) -> Result<Vec<(String, Vec<f32>)>, StoreError> {
    let (fragment, level_binds) = filter_fragment(filter);
    let sql = format!(
        "SELECT e.chunk_id, e.vector FROM embeddings e JOIN chunks c ON c.id = e.chunk_id \
         WHERE 1=1{fragment}"
    );
    let mut q = sqlx::query(&sql);
    for level in &level_binds {
        q = q.bind(*level);
    }
    if let Some(prefix) = &filter.path_prefix {
        q = q.bind(prefix);
    }
    let rows = q.fetch_all(pool).await?;
    Ok(rows
        .into_iter()
        .map(|r| {
            let id: String = r.get("chunk_id");
            let blob: Vec<u8> = r.get("vector");
            (id, blob_to_vector(&blob))
        })
        .collect())
}

pub(crate) async fn search_fts(
    pool: &SqlitePool,
    query: &str,
    limit: usize,
    filter: &SearchFilter,
) -> Result<Vec<(String, f64)>, StoreError> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }
    let (fragment, level_binds) = filter_fragment(filter);
    let sql = format!(
        "SELECT f.id, f.rank FROM chunks_fts f JOIN chunks c ON c.id = f.id \
         WHERE f MATCH ?{fragment} ORDER BY f.rank LIMIT ?"
    );
    let mut q = sqlx::query(&sql).bind(query);
    for level in &level_binds {
        q = q.bind(*level);
    }
    if let Some(prefix) = &filter.path_prefix {
        q = q.bind(prefix);
    }
    q = q.bind(limit as i64);
    let rows = q.fetch_all(pool).await;

    // FTS5 MATCH syntax errors (unbalanced quotes, stray operators) surface as a
    // database error; treat them as "no lexical matches" rather than failing search.
    match rows {
        Ok(rows) => Ok(rows
            .into_iter()
            .map(|r| (r.get::<String, _>("id"), r.get::<f64, _>("rank")))
            .collect()),
        Err(_) => Ok(Vec::new()),
    }
}

/// Returns `(id, structural_hash, content_hash)` for every chunk currently stored for
/// `path`. The Indexer diffs a reparse against these rows by `structural_hash` (the
/// chunk's structural identity, independent of content edits) rather than `id` (which
/// embeds `content_hash` and so necessarily changes whenever content does).
pub(crate) async fn existing_chunk_hashes_for_file(
    pool: &SqlitePool,
    path: &str,
) -> Result<Vec<(String, String, String)>, StoreError> {
    let rows: Vec<(String, String, String)> =
        sqlx::query_as("SELECT id, structural_hash, content_hash FROM chunks WHERE file_path = ?")
            .bind(path)
            .fetch_all(pool)
            .await?;
    Ok(rows)
}

/// Atomically applies one file's reindex: upserts the file row, deletes chunks no
/// longer present, and inserts/replaces the given chunks plus their embeddings, all
/// in a single transaction (§4.5 step 5: "a single atomic write"). `upserts` pairs
/// each chunk with its freshly computed embedding.
pub(crate) async fn write_file_reindex(
    pool: &SqlitePool,
    path: &str,
    content_hash: &str,
    language: &str,
    size: i64,
    modified_at: i64,
    upserts: &[(Chunk, Vec<f32>)],
    deletes: &[String],
) -> Result<(), StoreError> {
    let now = chrono::Utc::now().to_rfc3339();
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO files (path, content_hash, language, size, modified_at, indexed_at)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(path) DO UPDATE SET
            content_hash = excluded.content_hash,
            language = excluded.language,
            size = excluded.size,
            modified_at = excluded.modified_at,
            indexed_at = excluded.indexed_at",
    )
    .bind(path)
    .bind(content_hash)
    .bind(language)
    .bind(size)
    .bind(modified_at)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    for id in deletes {
        sqlx::query("DELETE FROM chunks_fts WHERE id = ?").bind(id).execute(&mut *tx).await?;
        sqlx::query("DELETE FROM chunks WHERE id = ?").bind(id).execute(&mut *tx).await?;
    }

    for (chunk, vector) in upserts {
        let file_path = chunk.file.to_string_lossy().to_string();
        sqlx::query(
            "INSERT INTO chunks (
                id, file_path, language, level, name, content, line_start, line_end,
                parent_id, parent_chunk_id, content_hash, structural_hash, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                content = excluded.content,
                line_start = excluded.line_start,
                line_end = excluded.line_end,
                parent_id = excluded.parent_id,
                parent_chunk_id = excluded.parent_chunk_id,
                content_hash = excluded.content_hash,
                structural_hash = excluded.structural_hash,
                updated_at = excluded.updated_at",
        )
        .bind(&chunk.id)
        .bind(&file_path)
        .bind(chunk.language)
        .bind(chunk.level.as_str())
        .bind(&chunk.name)
        .bind(&chunk.content)
        .bind(chunk.line_start)
        .bind(chunk.line_end)
        .bind(&chunk.parent_id)
        .bind(&chunk.parent_chunk_id)
        .bind(&chunk.content_hash)
        .bind(&chunk.structural_hash)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO chunks_fts (id, name, content) VALUES (?, ?, ?)
             ON CONFLICT DO NOTHING",
        )
        .bind(&chunk.id)
        .bind(&chunk.name)
        .bind(&chunk.content)
        .execute(&mut *tx)
        .await?;

        let blob = vector_to_blob(vector);
        sqlx::query(
            "INSERT INTO embeddings (chunk_id, vector, dim) VALUES (?, ?, ?)
             ON CONFLICT(chunk_id) DO UPDATE SET vector = excluded.vector, dim = excluded.dim",
        )
        .bind(&chunk.id)
        .bind(blob)
        .bind(vector.len() as i64)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Atomically deletes a file and all its chunk/embedding/FTS rows (§4.5 "For deleted").
pub(crate) async fn delete_file_atomic(pool: &SqlitePool, path: &str) -> Result<(), StoreError> {
    let mut tx = pool.begin().await?;
    let ids: Vec<(String,)> = sqlx::query_as("SELECT id FROM chunks WHERE file_path = ?")
        .bind(path)
        .fetch_all(&mut *tx)
        .await?;
    for (id,) in &ids {
        sqlx::query("DELETE FROM chunks_fts WHERE id = ?").bind(id).execute(&mut *tx).await?;
    }
    sqlx::query("DELETE FROM files WHERE path = ?").bind(path).execute(&mut *tx).await?;
    tx.commit().await?;
    Ok(())
}

pub(crate) async fn stats(pool: &SqlitePool) -> Result<(u64, u64, u64), StoreError> {
    let (file_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM files").fetch_one(pool).await?;
    let (chunk_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chunks").fetch_one(pool).await?;
    let (embedding_count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM embeddings").fetch_one(pool).await?;
    Ok((file_count as u64, chunk_count as u64, embedding_count as u64))
}

/// All indexed file paths, for `pommel index` to prune files deleted from disk since
/// the last run (no corresponding filesystem-watch `Deleted` event to catch them).
pub(crate) async fn all_file_paths(pool: &SqlitePool) -> Result<Vec<String>, StoreError> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT path FROM files").fetch_all(pool).await?;
    Ok(rows.into_iter().map(|(p,)| p).collect())
}
