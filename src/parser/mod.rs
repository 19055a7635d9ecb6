//! Code parsing with tree-sitter
//!
//! Split into submodules:
//! - `types` — data structures and error types
//! - `chunk` — chunk extraction from parse trees

mod chunk;
pub mod types;

pub use types::{Chunk, ChunkLevel, ParserError};
pub use crate::language::ChunkType;

use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::path::Path;
use tree_sitter::StreamingIterator;

use crate::language::LanguageDef;

/// Characters per token for general-purpose estimation (intentionally conservative
/// vs. ~4 measured).
pub const CHARS_PER_TOKEN_ESTIMATE: f64 = 3.5;
/// Characters per token used for token-budget enforcement (slightly stricter).
pub const CHARS_PER_TOKEN_BUDGET: f64 = 3.2;

/// Code parser using tree-sitter grammars.
///
/// Extracts functions, methods, classes, and other code elements from source files in
/// supported languages, then applies token-budget splitting (§4.4).
pub struct Parser {
    queries: HashMap<&'static str, OnceCell<tree_sitter::Query>>,
}

impl Parser {
    /// Create a new parser (queries are compiled lazily on first use).
    pub fn new() -> Result<Self, ParserError> {
        let mut queries = HashMap::new();
        for def in crate::language::REGISTRY.all() {
            queries.insert(def.name, OnceCell::new());
        }
        Ok(Self { queries })
    }

    fn get_query(&self, def: &'static LanguageDef) -> Result<&tree_sitter::Query, ParserError> {
        let cell = self.queries.get(def.name).ok_or_else(|| {
            ParserError::QueryCompileFailed(def.name.to_string(), "not found".into())
        })?;

        cell.get_or_try_init(|| {
            let grammar = (def.grammar)();
            tree_sitter::Query::new(&grammar, def.chunk_query).map_err(|e| {
                ParserError::QueryCompileFailed(def.name.to_string(), format!("{:?}", e))
            })
        })
    }

    /// Parse a source file and extract code chunks, including a synthetic file-level
    /// chunk and token-budget split children for any oversized chunk.
    ///
    /// Returns an empty Vec for non-UTF8 files (with a warning logged). Returns an
    /// error for unsupported file types. `context_size` bounds chunk size per §4.4;
    /// pass the active embedding provider's `context_size()`.
    pub fn parse_file(&self, path: &Path) -> Result<Vec<Chunk>, ParserError> {
        self.parse_file_with_budget(path, 8192)
    }

    pub fn parse_file_with_budget(
        &self,
        path: &Path,
        context_size: usize,
    ) -> Result<Vec<Chunk>, ParserError> {
        let _span = tracing::info_span!("parse_file", path = %path.display()).entered();

        const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > MAX_FILE_SIZE => {
                tracing::warn!(
                    "Skipping large file ({}MB > 50MB limit): {}",
                    meta.len() / (1024 * 1024),
                    path.display()
                );
                return Ok(vec![]);
            }
            Ok(_) => {}
            Err(e) => return Err(e.into()),
        }

        let source = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                tracing::warn!("Skipping non-UTF8 file: {}", path.display());
                return Ok(vec![]);
            }
            Err(e) => return Err(e.into()),
        };

        let source = source.replace("\r\n", "\n");

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let def = crate::language::REGISTRY
            .from_extension(ext)
            .ok_or_else(|| ParserError::UnsupportedFileType(ext.to_string()))?;

        let grammar = (def.grammar)();
        let mut ts_parser = tree_sitter::Parser::new();
        ts_parser
            .set_language(&grammar)
            .map_err(|e| ParserError::ParseFailed(format!("{:?}", e)))?;

        let tree = ts_parser
            .parse(&source, None)
            .ok_or_else(|| ParserError::ParseFailed(path.display().to_string()))?;

        let query = self.get_query(def)?;

        let mut cursor = tree_sitter::QueryCursor::new();
        let mut matches = cursor.matches(query, tree.root_node(), source.as_bytes());

        let mut chunks = Vec::new();
        while let Some(m) = matches.next() {
            match chunk::extract_chunk(&source, m, query, def, path) {
                Ok(c) => {
                    const MAX_CHUNK_BYTES: usize = 100_000;
                    let lines = c.line_end - c.line_start;
                    if lines > 500 {
                        tracing::debug!("Skipping {} ({} lines > 500 max)", c.id, lines);
                        continue;
                    }
                    if c.content.len() > MAX_CHUNK_BYTES {
                        tracing::debug!(
                            "Skipping {} ({} bytes > {} max)",
                            c.id,
                            c.content.len(),
                            MAX_CHUNK_BYTES
                        );
                        continue;
                    }
                    chunks.push(c);
                }
                Err(e) => {
                    tracing::warn!("Failed to extract chunk from {}: {}", path.display(), e);
                }
            }
        }

        link_methods_to_parents(&mut chunks);

        let file_str = path.to_string_lossy().to_string();
        let file_content_hash = blake3::hash(source.as_bytes()).to_hex().to_string();
        let file_line_end = source.lines().count().max(1) as u32;
        let file_structural_hash =
            Chunk::compute_structural_hash(&file_str, 1, file_line_end, ChunkLevel::File, "");
        let file_id = Chunk::compute_id(
            &file_str,
            1,
            file_line_end,
            ChunkLevel::File,
            "",
            &file_content_hash,
        );
        chunks.insert(
            0,
            Chunk {
                id: file_id,
                file: path.to_path_buf(),
                language: def.name,
                level: ChunkLevel::File,
                chunk_type: crate::language::ChunkType::Constant,
                name: String::new(),
                signature: String::new(),
                content: source.clone(),
                doc: None,
                line_start: 1,
                line_end: file_line_end,
                content_hash: file_content_hash,
                structural_hash: file_structural_hash,
                parent_id: None,
                parent_chunk_id: None,
            },
        );

        let budget_chars = (context_size as f64 * CHARS_PER_TOKEN_BUDGET).floor() as usize;
        let chunks = chunks
            .into_iter()
            .flat_map(|c| split_to_budget(c, budget_chars))
            .collect();

        Ok(chunks)
    }

    pub fn supported_extensions(&self) -> Vec<&'static str> {
        crate::language::REGISTRY.supported_extensions().collect()
    }
}

/// For each method-level chunk, sets `parent_id` to the smallest enclosing class-level
/// chunk by line-range containment, if any.
fn link_methods_to_parents(chunks: &mut [Chunk]) {
    let class_ranges: Vec<(String, u32, u32)> = chunks
        .iter()
        .filter(|c| c.level == ChunkLevel::Class)
        .map(|c| (c.id.clone(), c.line_start, c.line_end))
        .collect();

    for chunk in chunks.iter_mut() {
        if chunk.level != ChunkLevel::Method {
            continue;
        }
        let parent = class_ranges
            .iter()
            .filter(|(_, start, end)| *start <= chunk.line_start && chunk.line_end <= *end)
            .min_by_key(|(_, start, end)| end - start);
        if let Some((id, _, _)) = parent {
            chunk.parent_id = Some(id.clone());
        }
    }
}

/// Splits a chunk exceeding `budget_chars` into contiguous, line-aligned pieces (§4.4).
/// Each piece inherits the parent's attributes and sets `parent_chunk_id` to the
/// original chunk's id. Chunks within budget are passed through unchanged.
fn split_to_budget(chunk: Chunk, budget_chars: usize) -> Vec<Chunk> {
    if budget_chars == 0 || chunk.content.len() <= budget_chars {
        return vec![chunk];
    }

    let lines: Vec<&str> = chunk.content.lines().collect();
    if lines.len() <= 1 {
        return vec![chunk];
    }

    let parent_id = chunk.id.clone();
    let mut pieces = Vec::new();
    let mut current_lines: Vec<&str> = Vec::new();
    let mut current_len = 0usize;
    let mut line_cursor = chunk.line_start;
    let mut piece_start = chunk.line_start;

    let flush = |current_lines: &mut Vec<&str>,
                 piece_start: u32,
                 line_end: u32,
                 pieces: &mut Vec<Chunk>| {
        if current_lines.is_empty() {
            return;
        }
        let content = current_lines.join("\n");
        let file_str = chunk.file.to_string_lossy().to_string();
        let content_hash = blake3::hash(content.as_bytes()).to_hex().to_string();
        let structural_hash = Chunk::compute_structural_hash(
            &file_str,
            piece_start,
            line_end,
            chunk.level,
            &chunk.name,
        );
        let id = Chunk::compute_id(
            &file_str,
            piece_start,
            line_end,
            chunk.level,
            &chunk.name,
            &content_hash,
        );
        pieces.push(Chunk {
            id,
            file: chunk.file.clone(),
            language: chunk.language,
            level: chunk.level,
            chunk_type: chunk.chunk_type,
            name: chunk.name.clone(),
            signature: chunk.signature.clone(),
            content,
            doc: chunk.doc.clone(),
            line_start: piece_start,
            line_end,
            content_hash,
            structural_hash,
            parent_id: chunk.parent_id.clone(),
            parent_chunk_id: Some(parent_id.clone()),
        });
        current_lines.clear();
    };

    for line in &lines {
        if current_len + line.len() + 1 > budget_chars && !current_lines.is_empty() {
            flush(&mut current_lines, piece_start, line_cursor - 1, &mut pieces);
            piece_start = line_cursor;
            current_len = 0;
        }
        current_lines.push(line);
        current_len += line.len() + 1;
        line_cursor += 1;
    }
    flush(&mut current_lines, piece_start, line_cursor - 1, &mut pieces);

    if pieces.is_empty() {
        vec![chunk]
    } else {
        pieces
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::types::ChunkLevel;
    use crate::language::ChunkType;

    fn make_chunk(content: &str) -> Chunk {
        let line_end = content.lines().count().max(1) as u32;
        Chunk {
            id: "orig".to_string(),
            file: std::path::PathBuf::from("src/big.rs"),
            language: "rust",
            level: ChunkLevel::Method,
            chunk_type: ChunkType::Function,
            name: "big_fn".to_string(),
            signature: "fn big_fn()".to_string(),
            content: content.to_string(),
            doc: None,
            line_start: 1,
            line_end,
            content_hash: "h".to_string(),
            structural_hash: "s".to_string(),
            parent_id: None,
            parent_chunk_id: None,
        }
    }

    #[test]
    fn test_split_to_budget_passthrough_when_small() {
        let chunk = make_chunk("fn x() {}\n");
        let result = split_to_budget(chunk, 1000);
        assert_eq!(result.len(), 1);
        assert!(result[0].parent_chunk_id.is_none());
    }

    #[test]
    fn test_split_to_budget_splits_oversized_chunk() {
        let big_line = "x".repeat(50);
        let content: String = (0..200).map(|_| format!("{big_line}\n")).collect();
        let chunk = make_chunk(&content);
        let original_id = chunk.id.clone();

        let result = split_to_budget(chunk, 2000);

        assert!(result.len() >= 3, "expected >= 3 pieces, got {}", result.len());
        for piece in &result {
            assert_eq!(piece.parent_chunk_id.as_deref(), Some(original_id.as_str()));
            assert!(piece.content.len() <= 2000 + 51, "piece exceeds budget");
        }
    }

    #[test]
    fn test_split_to_budget_respects_token_budget_contract() {
        let context_size = 100usize;
        let budget_chars = (context_size as f64 * CHARS_PER_TOKEN_BUDGET).floor() as usize;
        assert_eq!(budget_chars, 320);
    }

    #[test]
    fn test_parse_file_includes_synthetic_file_chunk() {
        let mut file = tempfile::NamedTempFile::with_suffix(".rs").unwrap();
        use std::io::Write;
        file.write_all(b"fn a() {}\nfn b() {}\n").unwrap();
        let parser = Parser::new().unwrap();
        let chunks = parser.parse_file(file.path()).unwrap();
        assert!(chunks.iter().any(|c| c.level == ChunkLevel::File));
    }
}
