//! Heuristic re-ranking for second-pass scoring (§4.6)
//!
//! Re-ranking is rule-based and deterministic: a bounded set of additive signals
//! computed per result, summed into a `signal_delta`, and added to the fused/boosted
//! score. No learned model, no network calls.

use std::collections::HashSet;

use crate::store::ChunkSummary;

/// One named heuristic contribution to a result's score delta.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub name: &'static str,
    pub value: f32,
}

/// A result carrying its pre-rerank score plus chunk metadata needed to score it.
pub struct Candidate<'a> {
    pub chunk: &'a ChunkSummary,
    pub score: f32,
    pub file_path: &'a str,
    pub modified_at: Option<i64>,
}

/// Outcome of re-ranking one candidate: final clamped score plus the signals that
/// fired above the surfacing threshold.
#[derive(Debug, Clone)]
pub struct RerankOutcome {
    pub score: f32,
    pub signals: Vec<Signal>,
}

/// Only signals with |value| above this threshold are surfaced to the caller
/// (for `--verbose`/JSON emission); smaller contributions are still summed into
/// the score but considered noise for display purposes.
const SIGNAL_SURFACE_THRESHOLD: f32 = 0.01;

const TEST_PATH_PATTERNS: &[&str] = &["/test/", "/tests/", "_test.", "_spec.", ".test.", ".spec."];

/// Deterministic heuristic re-ranker (§4.6). Stateless — a single instance can be
/// shared across concurrent queries.
pub struct Reranker;

impl Reranker {
    pub fn new() -> Self {
        Self
    }

    /// Scores one candidate against the query's lowercased tokens and raw text,
    /// returning the clamped final score and the signals that fired.
    pub fn score(&self, query_lower: &str, query_tokens: &[String], candidate: &Candidate) -> RerankOutcome {
        let name_lower = candidate.chunk.name.to_lowercase();
        let path_lower = candidate.file_path.to_lowercase();
        let content_lower = candidate.chunk.content.to_lowercase();

        let mut signals = Vec::new();

        let name_match = query_tokens.iter().any(|t| name_lower.contains(t.as_str()));
        if name_match {
            signals.push(Signal { name: "name_match", value: 0.15 });
        }

        let path_match = query_tokens.iter().any(|t| path_lower.contains(t.as_str()));
        if path_match {
            signals.push(Signal { name: "path_match", value: 0.1 });
        }

        let exact_phrase = !query_lower.is_empty() && content_lower.contains(query_lower);
        if exact_phrase {
            signals.push(Signal { name: "exact_phrase", value: 0.2 });
        }

        if let Some(modified_at) = candidate.modified_at {
            let recency = recency_signal(modified_at);
            if recency.abs() > SIGNAL_SURFACE_THRESHOLD {
                signals.push(Signal { name: "recency", value: recency });
            }
        }

        let chunk_type_signal = match candidate.chunk.level {
            crate::parser::ChunkLevel::Method => 0.1,
            crate::parser::ChunkLevel::Class => 0.06,
            crate::parser::ChunkLevel::File => 0.02,
        };
        signals.push(Signal { name: "chunk_type", value: chunk_type_signal });

        if is_test_path(&path_lower) {
            signals.push(Signal { name: "test_penalty", value: -0.1 });
        }

        let signal_delta: f32 = signals.iter().map(|s| s.value).sum();
        let score = (candidate.score + signal_delta).clamp(0.0, 1.0);

        signals.retain(|s| s.value.abs() > SIGNAL_SURFACE_THRESHOLD);

        RerankOutcome { score, signals }
    }
}

impl Default for Reranker {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotone-decreasing recency bonus: ~0.1 for same-day changes, decaying to
/// near-zero by 90 days.
fn recency_signal(modified_at: i64) -> f32 {
    let now = chrono::Utc::now().timestamp();
    let days = ((now - modified_at).max(0) as f64) / 86_400.0;
    (0.1 * (-days / 30.0).exp()) as f32
}

fn is_test_path(path_lower: &str) -> bool {
    TEST_PATH_PATTERNS.iter().any(|p| path_lower.contains(p))
}

/// Builds the deduplicated, capped (≤5) `match_reasons` list for a result (§4.6
/// Enrichment): match source, matched query tokens, phrase match, and positive
/// signal names.
pub fn build_match_reasons(
    match_source: &str,
    query_tokens: &[String],
    name_lower: &str,
    path_lower: &str,
    exact_phrase: bool,
    signals: &[Signal],
) -> Vec<String> {
    let mut reasons = Vec::new();
    let mut seen = HashSet::new();

    let mut push = |reasons: &mut Vec<String>, seen: &mut HashSet<String>, reason: String| {
        if seen.insert(reason.clone()) {
            reasons.push(reason);
        }
    };

    push(&mut reasons, &mut seen, format!("match: {match_source}"));

    for token in query_tokens {
        if name_lower.contains(token.as_str()) {
            push(&mut reasons, &mut seen, format!("name contains \"{token}\""));
        } else if path_lower.contains(token.as_str()) {
            push(&mut reasons, &mut seen, format!("path contains \"{token}\""));
        }
    }

    if exact_phrase {
        push(&mut reasons, &mut seen, "exact phrase".to_string());
    }

    for signal in signals {
        if signal.value > 0.0 {
            push(&mut reasons, &mut seen, signal.name.to_string());
        }
    }

    reasons.truncate(5);
    reasons
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::ChunkType;
    use crate::parser::ChunkLevel;
    use std::path::PathBuf;

    fn sample_chunk(name: &str, content: &str, level: ChunkLevel) -> ChunkSummary {
        ChunkSummary {
            id: "c1".to_string(),
            file: PathBuf::from("src/lib.rs"),
            language: "rust".to_string(),
            level,
            chunk_type: ChunkType::Function,
            name: name.to_string(),
            content: content.to_string(),
            line_start: 1,
            line_end: 3,
            parent_id: None,
            parent_chunk_id: None,
        }
    }

    #[test]
    fn test_name_match_signal_fires() {
        let chunk = sample_chunk("parse_config", "fn parse_config() {}", ChunkLevel::Method);
        let candidate = Candidate { chunk: &chunk, score: 0.5, file_path: "src/lib.rs", modified_at: None };
        let reranker = Reranker::new();
        let outcome = reranker.score("parse config", &["parse".to_string(), "config".to_string()], &candidate);
        assert!(outcome.signals.iter().any(|s| s.name == "name_match"));
        assert!(outcome.score > 0.5);
    }

    #[test]
    fn test_exact_phrase_signal_fires() {
        let chunk = sample_chunk("foo", "retry with exponential backoff", ChunkLevel::Method);
        let candidate = Candidate { chunk: &chunk, score: 0.4, file_path: "src/lib.rs", modified_at: None };
        let reranker = Reranker::new();
        let outcome = reranker.score(
            "retry with exponential backoff",
            &["retry".to_string(), "exponential".to_string(), "backoff".to_string()],
            &candidate,
        );
        assert!(outcome.signals.iter().any(|s| s.name == "exact_phrase"));
    }

    #[test]
    fn test_test_penalty_applies_for_test_paths() {
        let chunk = sample_chunk("foo", "fn foo() {}", ChunkLevel::Method);
        let candidate = Candidate { chunk: &chunk, score: 0.5, file_path: "src/tests/foo_test.rs", modified_at: None };
        let reranker = Reranker::new();
        let outcome = reranker.score("unrelated", &["unrelated".to_string()], &candidate);
        assert!(outcome.signals.iter().any(|s| s.name == "test_penalty" && s.value < 0.0));
    }

    #[test]
    fn test_chunk_type_signal_ranks_method_above_file() {
        let method_chunk = sample_chunk("foo", "fn foo() {}", ChunkLevel::Method);
        let file_chunk = sample_chunk("", "whole file", ChunkLevel::File);
        let reranker = Reranker::new();
        let method_outcome = reranker.score(
            "x",
            &[],
            &Candidate { chunk: &method_chunk, score: 0.5, file_path: "src/lib.rs", modified_at: None },
        );
        let file_outcome = reranker.score(
            "x",
            &[],
            &Candidate { chunk: &file_chunk, score: 0.5, file_path: "src/lib.rs", modified_at: None },
        );
        assert!(method_outcome.score > file_outcome.score);
    }

    #[test]
    fn test_score_clamped_to_one() {
        let chunk = sample_chunk("parse_config", "parse config parse config", ChunkLevel::Method);
        let candidate = Candidate { chunk: &chunk, score: 1.0, file_path: "src/parse_config.rs", modified_at: None };
        let reranker = Reranker::new();
        let outcome = reranker.score(
            "parse config",
            &["parse".to_string(), "config".to_string()],
            &candidate,
        );
        assert!(outcome.score <= 1.0);
    }

    #[test]
    fn test_match_reasons_deduplicated_and_capped() {
        let signals = vec![
            Signal { name: "chunk_type", value: 0.1 },
            Signal { name: "recency", value: 0.05 },
        ];
        let reasons = build_match_reasons("both", &["parse".to_string()], "parse_config", "src/lib.rs", true, &signals);
        assert!(reasons.len() <= 5);
        assert_eq!(reasons.iter().filter(|r| r.as_str() == "match: both").count(), 1);
    }
}
