//! Chunk extraction from tree-sitter parse trees

use std::path::Path;

use crate::language::{ChunkType, LanguageDef, SignatureStyle};

use super::types::{Chunk, ChunkLevel};
use super::ParserError;

pub(crate) fn extract_chunk(
    source: &str,
    m: &tree_sitter::QueryMatch<'_, '_>,
    query: &tree_sitter::Query,
    def: &'static LanguageDef,
    path: &Path,
) -> Result<Chunk, ParserError> {
    let (node, base_chunk_type) = def
        .type_map
        .iter()
        .find_map(|(capture_name, chunk_type)| {
            query
                .capture_index_for_name(capture_name)
                .and_then(|idx| m.captures.iter().find(|c| c.index == idx))
                .map(|c| (c.node, *chunk_type))
        })
        .ok_or_else(|| ParserError::ParseFailed("No definition capture found in match".into()))?;

    let name_idx = query.capture_index_for_name("name");
    let name = name_idx
        .and_then(|idx| m.captures.iter().find(|c| c.index == idx))
        .map(|c| source[c.node.byte_range()].to_string())
        .unwrap_or_else(|| "<anonymous>".to_string());

    let content = source[node.byte_range()].to_string();
    let line_start = node.start_position().row as u32 + 1;
    let line_end = node.end_position().row as u32 + 1;

    let signature = extract_signature(&content, def);
    let doc = extract_doc_comment(node, source, def);

    let chunk_type = if base_chunk_type == ChunkType::Function {
        infer_chunk_type(node, def)
    } else {
        base_chunk_type
    };
    let level = ChunkLevel::from_chunk_type(chunk_type);

    let file_str = path.to_string_lossy().to_string();
    let content_hash = blake3::hash(content.as_bytes()).to_hex().to_string();
    let structural_hash =
        Chunk::compute_structural_hash(&file_str, line_start, line_end, level, &name);
    let id = Chunk::compute_id(&file_str, line_start, line_end, level, &name, &content_hash);

    Ok(Chunk {
        id,
        file: path.to_path_buf(),
        language: def.name,
        level,
        chunk_type,
        name,
        signature,
        content,
        doc,
        line_start,
        line_end,
        content_hash,
        structural_hash,
        parent_id: None,
        parent_chunk_id: None,
    })
}

pub(crate) fn extract_signature(content: &str, def: &LanguageDef) -> String {
    let sig_end = match def.signature_style {
        SignatureStyle::UntilBrace => content.find('{').unwrap_or(content.len()),
        SignatureStyle::UntilColon => content.find(':').unwrap_or(content.len()),
    };
    let sig = &content[..sig_end];
    sig.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract_doc_comment(node: tree_sitter::Node, source: &str, def: &LanguageDef) -> Option<String> {
    let mut comments = Vec::new();
    let mut current = node.prev_sibling();

    while let Some(sibling) = current {
        let kind = sibling.kind();
        if def.doc_nodes.contains(&kind) {
            comments.push(source[sibling.byte_range()].to_string());
            current = sibling.prev_sibling();
        } else if kind.contains("comment") {
            current = sibling.prev_sibling();
        } else {
            break;
        }
    }

    if comments.is_empty() {
        if def.name == "python" {
            if let Some(body) = node.child_by_field_name("body") {
                if let Some(first) = body.named_child(0) {
                    if first.kind() == "expression_statement" {
                        if let Some(string) = first.named_child(0) {
                            if string.kind() == "string" {
                                return Some(source[string.byte_range()].to_string());
                            }
                        }
                    }
                }
            }
        }
        return None;
    }

    comments.reverse();
    Some(comments.join("\n"))
}

fn infer_chunk_type(node: tree_sitter::Node, def: &LanguageDef) -> ChunkType {
    if def.method_node_kinds.contains(&node.kind()) {
        return ChunkType::Method;
    }

    let mut current = node.parent();
    while let Some(parent) = current {
        if def.method_containers.contains(&parent.kind()) {
            return ChunkType::Method;
        }
        current = parent.parent();
    }

    ChunkType::Function
}
