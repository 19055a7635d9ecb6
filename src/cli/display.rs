//! Human and JSON rendering of search results (§4.12 "JSON output mirrors the Query
//! API Response shape verbatim").

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;

use pommel::search::{MatchSource, SearchResponse, SearchResult};

/// Read up to `context` lines of surrounding source before/after `[line_start,
/// line_end]` (1-indexed, inclusive). Used by `--context` in human-readable mode.
pub fn read_context_lines(file: &Path, line_start: u32, line_end: u32, context: usize) -> Result<(Vec<String>, Vec<String>)> {
    const MAX_DISPLAY_FILE_SIZE: u64 = 10 * 1024 * 1024;
    if let Ok(meta) = std::fs::metadata(file) {
        if meta.len() > MAX_DISPLAY_FILE_SIZE {
            anyhow::bail!("file too large for context display: {}MB", meta.len() / (1024 * 1024));
        }
    }
    let content = std::fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))?;
    let lines: Vec<&str> = content.lines().map(|l| l.trim_end_matches('\r')).collect();

    let line_start = line_start.max(1);
    let line_end = line_end.max(line_start);
    let max_idx = lines.len().saturating_sub(1);
    let start_idx = (line_start as usize).saturating_sub(1).min(max_idx);
    let end_idx = (line_end as usize).saturating_sub(1).min(max_idx);

    let context_start = start_idx.saturating_sub(context);
    let before: Vec<String> = if start_idx <= lines.len() {
        lines[context_start..start_idx].iter().map(|s| s.to_string()).collect()
    } else {
        Vec::new()
    };

    let context_end = (end_idx + context + 1).min(lines.len());
    let after: Vec<String> = if end_idx + 1 < lines.len() {
        lines[(end_idx + 1)..context_end].iter().map(|s| s.to_string()).collect()
    } else {
        Vec::new()
    };

    Ok((before, after))
}

/// Render a `SearchResponse` as pretty-printed JSON matching the Query API shape.
pub fn display_json(response: &SearchResponse) -> Result<()> {
    let json = serde_json::json!({
        "query": response.query,
        "total_results": response.total_results,
        "search_time_ms": response.search_time_ms,
        "hybrid_enabled": response.hybrid_enabled,
        "rerank_enabled": response.rerank_enabled,
        "results": response.results.iter().map(result_to_json).collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

fn result_to_json(r: &SearchResult) -> serde_json::Value {
    serde_json::json!({
        "id": r.chunk.id,
        "file": r.chunk.file.to_string_lossy(),
        "language": r.chunk.language,
        "level": r.chunk.level.as_str(),
        "chunk_type": r.chunk.chunk_type.to_string(),
        "name": r.chunk.name,
        "line_start": r.chunk.line_start,
        "line_end": r.chunk.line_end,
        "score": r.score,
        "match_source": match r.match_source {
            MatchSource::Vector => "vector",
            MatchSource::Keyword => "keyword",
            MatchSource::Both => "both",
        },
        "match_reasons": r.match_reasons,
        "matched_splits": r.matched_splits,
        "parent": r.parent.as_ref().map(|p| serde_json::json!({
            "id": p.id, "name": p.name, "level": p.level.as_str(),
        })),
        "content": r.chunk.content,
    })
}

/// Render a `SearchResponse` as human-readable text.
pub fn display_human(response: &SearchResponse, root: &Path, no_content: bool, context: Option<usize>) {
    if response.results.is_empty() {
        println!("No results for \"{}\"", response.query);
        return;
    }

    for (i, r) in response.results.iter().enumerate() {
        let loc = format!("{}:{}-{}", r.chunk.file.display(), r.chunk.line_start, r.chunk.line_end);
        println!(
            "{}. {} {}",
            i + 1,
            loc.cyan(),
            format!("({:.3})", r.score).dimmed()
        );
        println!("   {} {}", r.chunk.name.bold(), format!("[{}]", r.chunk.level.as_str()).dimmed());
        if !r.match_reasons.is_empty() {
            println!("   {}", r.match_reasons.join(", ").dimmed());
        }

        if !no_content {
            if let Some(ctx) = context {
                let abs = root.join(&r.chunk.file);
                if let Ok((before, after)) = read_context_lines(&abs, r.chunk.line_start, r.chunk.line_end, ctx) {
                    for line in &before {
                        println!("   {}", line.dimmed());
                    }
                    for line in r.chunk.content.lines() {
                        println!("   {}", line);
                    }
                    for line in &after {
                        println!("   {}", line.dimmed());
                    }
                } else {
                    for line in r.chunk.content.lines() {
                        println!("   {}", line);
                    }
                }
            } else {
                for line in r.chunk.content.lines() {
                    println!("   {}", line);
                }
            }
        }
        println!();
    }

    println!(
        "{} results in {}ms (hybrid: {}, rerank: {})",
        response.total_results, response.search_time_ms, response.hybrid_enabled, response.rerank_enabled
    );
}
