//! Schema bootstrap and forward-only migrations for the index database (§3, §4.8).

use sqlx::SqlitePool;

use super::helpers::{StoreError, CURRENT_SCHEMA_VERSION};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS metadata (key TEXT PRIMARY KEY, value TEXT NOT NULL);

CREATE TABLE IF NOT EXISTS files (
    path TEXT PRIMARY KEY,
    content_hash TEXT NOT NULL,
    language TEXT NOT NULL,
    size INTEGER NOT NULL,
    modified_at INTEGER NOT NULL,
    indexed_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    file_path TEXT NOT NULL REFERENCES files(path) ON DELETE CASCADE,
    language TEXT NOT NULL,
    level TEXT NOT NULL,
    name TEXT NOT NULL DEFAULT '',
    content TEXT NOT NULL,
    line_start INTEGER NOT NULL,
    line_end INTEGER NOT NULL,
    parent_id TEXT,
    parent_chunk_id TEXT,
    content_hash TEXT NOT NULL,
    structural_hash TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chunks_file ON chunks(file_path);
CREATE INDEX IF NOT EXISTS idx_chunks_parent_chunk ON chunks(parent_chunk_id);

CREATE TABLE IF NOT EXISTS embeddings (
    chunk_id TEXT PRIMARY KEY REFERENCES chunks(id) ON DELETE CASCADE,
    vector BLOB NOT NULL,
    dim INTEGER NOT NULL
);

CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    id UNINDEXED, name, content, tokenize='unicode61'
);
"#;

/// Bootstraps a fresh database or brings an existing one up to the current schema
/// version. Migrations are forward-only and idempotent (`CREATE TABLE IF NOT EXISTS`).
pub(crate) async fn bootstrap(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query("PRAGMA journal_mode=WAL").execute(pool).await?;
    sqlx::query("PRAGMA foreign_keys=ON").execute(pool).await?;

    for statement in SCHEMA_SQL.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        sqlx::query(statement).execute(pool).await?;
    }

    let existing: Option<(String,)> =
        sqlx::query_as("SELECT value FROM metadata WHERE key = 'schema_version'")
            .fetch_optional(pool)
            .await?;

    match existing {
        None => {
            sqlx::query("INSERT INTO metadata (key, value) VALUES ('schema_version', ?)")
                .bind(CURRENT_SCHEMA_VERSION.to_string())
                .execute(pool)
                .await?;
        }
        Some((value,)) => {
            let version: i32 = value.parse().unwrap_or(0);
            if version > CURRENT_SCHEMA_VERSION {
                return Err(StoreError::SchemaNewerThanSupported(version));
            }
            if version < CURRENT_SCHEMA_VERSION {
                return Err(StoreError::SchemaMismatch(version, CURRENT_SCHEMA_VERSION));
            }
        }
    }

    Ok(())
}
