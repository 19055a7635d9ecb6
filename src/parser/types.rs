//! Data types for the parser module

use std::path::PathBuf;
use thiserror::Error;

pub use crate::language::{ChunkType, SignatureStyle};

/// Errors that can occur during code parsing
#[derive(Error, Debug)]
pub enum ParserError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),
    #[error("Failed to parse: {0}")]
    ParseFailed(String),
    #[error("Failed to compile query for {0}: {1}")]
    QueryCompileFailed(String, String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where a chunk sits in a file's structural hierarchy (§3 Data Model).
///
/// "Class" covers struct/module/trait-like containers; "method" covers
/// function/method/property-like leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkLevel {
    File,
    Class,
    Method,
}

impl ChunkLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkLevel::File => "file",
            ChunkLevel::Class => "class",
            ChunkLevel::Method => "method",
        }
    }

    /// Maps a syntactic `ChunkType` onto the three-level hierarchy the store persists.
    pub fn from_chunk_type(chunk_type: ChunkType) -> Self {
        match chunk_type {
            ChunkType::Class | ChunkType::Struct | ChunkType::Enum | ChunkType::Trait
            | ChunkType::Interface => ChunkLevel::Class,
            ChunkType::Function | ChunkType::Method | ChunkType::Constant => ChunkLevel::Method,
        }
    }
}

impl std::fmt::Display for ChunkLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChunkLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(ChunkLevel::File),
            "class" => Ok(ChunkLevel::Class),
            "method" => Ok(ChunkLevel::Method),
            other => Err(format!("unknown chunk level: '{other}'")),
        }
    }
}

/// A parsed code chunk (file, class-like container, or method-like leaf).
///
/// Chunks are the basic unit of indexing and search. Each chunk represents a single
/// syntactic element extracted by tree-sitter, or a line-aligned slice of one that
/// exceeded the embedding provider's token budget.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Deterministic function of (file, start_line, end_line, level, name, content_hash).
    pub id: String,
    /// Source file path, relative to the project root.
    pub file: PathBuf,
    /// Programming language name (matches `language::LanguageDef::name`).
    pub language: &'static str,
    /// Structural level: file, class, or method.
    pub level: ChunkLevel,
    /// Original syntactic kind (function, struct, interface, ...), independent of `level`.
    pub chunk_type: ChunkType,
    /// Symbol name; empty for file-level chunks.
    pub name: String,
    /// Declaration line (signature/header), normalized whitespace.
    pub signature: String,
    /// Full chunk text (may be a split piece of a larger chunk).
    pub content: String,
    /// Doc comment immediately preceding the chunk, if any.
    pub doc: Option<String>,
    pub line_start: u32,
    pub line_end: u32,
    /// BLAKE3 hash of `content`.
    pub content_hash: String,
    /// BLAKE3 hash of `file:start_line:end_line:level:name`, used to detect true
    /// structural changes independent of content edits.
    pub structural_hash: String,
    /// Id of the enclosing class-like chunk, if this is a method.
    pub parent_id: Option<String>,
    /// Id of the original, pre-split chunk, set only on token-budget split children.
    pub parent_chunk_id: Option<String>,
}

impl Chunk {
    /// Computes the deterministic chunk id (§3: "re-running the chunker on unchanged
    /// content yields identical ids").
    pub fn compute_id(
        file: &str,
        line_start: u32,
        line_end: u32,
        level: ChunkLevel,
        name: &str,
        content_hash: &str,
    ) -> String {
        let key = format!("{file}:{line_start}:{line_end}:{}:{name}:{content_hash}", level.as_str());
        blake3::hash(key.as_bytes()).to_hex().to_string()
    }

    /// Computes the structural hash used to detect changes that move a chunk's
    /// boundaries or name without necessarily changing its content.
    pub fn compute_structural_hash(
        file: &str,
        line_start: u32,
        line_end: u32,
        level: ChunkLevel,
        name: &str,
    ) -> String {
        let key = format!("{file}:{line_start}:{line_end}:{}:{name}", level.as_str());
        blake3::hash(key.as_bytes()).to_hex().to_string()
    }
}
