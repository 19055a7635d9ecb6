//! Query preprocessing, hybrid retrieval, RRF fusion and heuristic re-ranking (§4.6)
//!
//! Control flow: preprocess query → (embed via cache/retry → vector retrieval) in
//! parallel with (FTS query → lexical retrieval) → RRF merge → split-dedup-and-boost
//! → heuristic re-rank → enrich → return. Vector and lexical retrieval run as
//! concurrent futures on the same task; the rest is sequential CPU work.

use std::collections::HashMap;

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

use crate::embedder::{CancelToken, Embedding, Provider, ProviderError};
use crate::index::VectorIndex;
use crate::parser::ChunkLevel;
use crate::reranker::{build_match_reasons, Candidate, Reranker, Signal};
use crate::store::chunks;
use crate::store::{ChunkSummary, SearchFilter, Store, StoreError};

static QUOTED_PHRASE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]+)""#).expect("valid regex"));
static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}_]+").expect("valid regex"));

/// ~80 common English stopwords, dropped from the lexical query (§4.6 Query preprocessing).
const STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "aren't", "as", "at", "be", "because", "been", "before", "being", "below", "between", "both",
    "but", "by", "can", "cannot", "could", "couldn't", "did", "didn't", "do", "does", "doesn't",
    "doing", "don't", "down", "during", "each", "few", "for", "from", "further", "had", "hadn't",
    "has", "hasn't", "have", "haven't", "having", "he", "her", "here", "hers", "herself", "him",
    "himself", "his", "how", "i", "if", "in", "into", "is", "isn't", "it", "its", "itself",
    "let's", "me", "more", "most", "mustn't", "my", "myself", "no", "nor", "not", "of", "off",
    "on", "once", "only", "or", "other", "ought", "our", "ours", "ourselves", "out", "over",
    "own", "same", "shan't", "she", "should", "shouldn't", "so", "some", "such", "than", "that",
    "the", "their", "theirs", "them", "themselves", "then", "there", "these", "they", "this",
    "those", "through", "to", "too", "under", "until", "up", "very", "was", "wasn't", "we",
    "were", "weren't", "what", "when", "where", "which", "while", "who", "whom", "why", "with",
    "won't", "would", "wouldn't", "you", "your", "yours", "yourself", "yourselves",
];

/// Default RRF k constant (§4.6).
const DEFAULT_RRF_K: u32 = 60;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("embedding provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// Per-query tunables (§6 `Search(...)`).
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    pub levels: Vec<ChunkLevel>,
    pub path_prefix: Option<String>,
    pub hybrid: bool,
    pub rerank: bool,
    pub rrf_k: u32,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            levels: Vec::new(),
            path_prefix: None,
            hybrid: true,
            rerank: true,
            rrf_k: DEFAULT_RRF_K,
        }
    }
}

/// Where a result's match came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSource {
    Vector,
    Keyword,
    Both,
}

impl MatchSource {
    fn as_str(self) -> &'static str {
        match self {
            MatchSource::Vector => "vector",
            MatchSource::Keyword => "keyword",
            MatchSource::Both => "both",
        }
    }
}

/// `{id, name, level}` of a result's containing chunk, when it has one.
#[derive(Debug, Clone)]
pub struct ParentInfo {
    pub id: String,
    pub name: String,
    pub level: ChunkLevel,
}

/// Per-stage scoring detail retained for `--verbose`/JSON emission.
#[derive(Debug, Clone, Default)]
pub struct ScoreDetails {
    pub vector: Option<f32>,
    pub keyword: Option<f64>,
    pub rrf: f32,
    pub signals: HashMap<String, f32>,
}

/// One ranked hit.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub chunk: ChunkSummary,
    pub score: f32,
    pub match_source: MatchSource,
    pub match_reasons: Vec<String>,
    pub score_details: ScoreDetails,
    pub matched_splits: usize,
    pub parent: Option<ParentInfo>,
}

/// Full response for one query (§6 `Response`).
#[derive(Debug, Clone)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
    pub total_results: usize,
    pub search_time_ms: u64,
    pub hybrid_enabled: bool,
    pub rerank_enabled: bool,
}

/// Extracted quoted phrases and the remaining, stopword-filtered tokens.
struct PreprocessedQuery {
    phrases: Vec<String>,
    tokens: Vec<String>,
}

fn preprocess_query(query: &str) -> PreprocessedQuery {
    let mut phrases = Vec::new();
    let mut remainder = query.to_string();
    for cap in QUOTED_PHRASE_RE.captures_iter(query) {
        phrases.push(cap[1].to_lowercase());
        remainder = remainder.replace(&cap[0], " ");
    }

    let tokens: Vec<String> = TOKEN_RE
        .find_iter(&remainder)
        .map(|m| m.as_str().to_lowercase())
        .filter(|t| {
            let is_single_non_digit = t.chars().count() == 1 && !t.chars().all(|c| c.is_ascii_digit());
            !STOPWORDS.contains(&t.as_str()) && !is_single_non_digit
        })
        .collect();

    PreprocessedQuery { phrases, tokens }
}

/// Builds the FTS5 MATCH expression: quoted phrases AND remaining terms, joined by OR
/// within each group (§4.6 Query preprocessing).
fn build_fts_query(pre: &PreprocessedQuery) -> String {
    let mut parts: Vec<String> = Vec::new();
    for phrase in &pre.phrases {
        parts.push(format!("\"{}\"", phrase.replace('"', "")));
    }
    parts.extend(pre.tokens.iter().cloned());
    parts.join(" OR ")
}

/// Reciprocal Rank Fusion over two `(chunk_id, score)` source lists (§4.6). Each
/// list's own order defines its rank; `k` defaults to 60.
fn rrf_fuse(
    vector_ranked: &[(String, f32)],
    lexical_ranked: &[(String, f64)],
    k: u32,
) -> Vec<(String, f32, MatchSource, Option<f32>, Option<f64>)> {
    let mut scores: HashMap<String, f32> = HashMap::new();
    let mut vector_score: HashMap<String, f32> = HashMap::new();
    let mut lexical_score: HashMap<String, f64> = HashMap::new();

    for (rank, (id, score)) in vector_ranked.iter().enumerate() {
        *scores.entry(id.clone()).or_insert(0.0) += 1.0 / (k as f32 + rank as f32 + 1.0);
        vector_score.insert(id.clone(), *score);
    }
    for (rank, (id, score)) in lexical_ranked.iter().enumerate() {
        *scores.entry(id.clone()).or_insert(0.0) += 1.0 / (k as f32 + rank as f32 + 1.0);
        lexical_score.insert(id.clone(), *score);
    }

    let mut fused: Vec<(String, f32, MatchSource, Option<f32>, Option<f64>)> = scores
        .into_iter()
        .map(|(id, rrf)| {
            let v = vector_score.get(&id).copied();
            let l = lexical_score.get(&id).copied();
            let source = match (v.is_some(), l.is_some()) {
                (true, true) => MatchSource::Both,
                (true, false) => MatchSource::Vector,
                (false, true) => MatchSource::Keyword,
                (false, false) => unreachable!("candidate must come from at least one branch"),
            };
            (id, rrf, source, v, l)
        })
        .collect();

    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    fused
}

/// Multiplier for the split-dedup-and-boost step (§4.6): `min(1.5, 1 + (n-1) * 0.1)`.
fn split_boost_multiplier(group_size: usize) -> f32 {
    (1.0 + (group_size.saturating_sub(1)) as f32 * 0.1).min(1.5)
}

struct FusedCandidate {
    id: String,
    score: f32,
    match_source: MatchSource,
    vector_score: Option<f32>,
    lexical_score: Option<f64>,
    matched_splits: usize,
}

/// Groups fused candidates by `parent_chunk_id` (falling back to `id`), keeps the
/// highest-scoring member per group, and applies the split-boost multiplier.
fn dedup_and_boost(
    fused: Vec<(String, f32, MatchSource, Option<f32>, Option<f64>)>,
    summaries: &HashMap<String, ChunkSummary>,
) -> Vec<FusedCandidate> {
    let mut groups: HashMap<String, Vec<(String, f32, MatchSource, Option<f32>, Option<f64>)>> =
        HashMap::new();
    for item in fused {
        let key = summaries
            .get(&item.0)
            .and_then(|s| s.parent_chunk_id.clone())
            .unwrap_or_else(|| item.0.clone());
        groups.entry(key).or_default().push(item);
    }

    let mut out = Vec::new();
    for (_, mut members) in groups {
        members.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let group_size = members.len();
        let best = members.remove(0);
        let multiplier = split_boost_multiplier(group_size);
        let boosted = (best.1 * multiplier).clamp(0.0, 1.0);
        out.push(FusedCandidate {
            id: best.0,
            score: boosted,
            match_source: best.2,
            vector_score: best.3,
            lexical_score: best.4,
            matched_splits: group_size,
        });
    }
    out.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    out
}

/// Runs the full hybrid search pipeline against `store`, optionally accelerated by
/// `index` for the vector branch (falling back to a brute-force scan over
/// `Store::all_embeddings` when no index is given or it is empty).
pub async fn search(
    store: &Store,
    index: Option<&dyn VectorIndex>,
    provider: &dyn Provider,
    reranker: &Reranker,
    query: &str,
    options: &SearchOptions,
) -> Result<SearchResponse, SearchError> {
    let start = std::time::Instant::now();
    let filter = SearchFilter {
        levels: options.levels.clone(),
        path_prefix: options.path_prefix.clone(),
    };
    let k_prime = options.limit.saturating_mul(2).max(1);

    let pre = preprocess_query(query);
    let fts_query = build_fts_query(&pre);

    let vector_fut = async {
        if !options.hybrid {
            return Ok::<Vec<(String, f32)>, SearchError>(Vec::new());
        }
        let cancel = CancelToken::new();
        let query_embedding = provider.embed_one(query, &cancel).await?;
        vector_candidates(store, index, &query_embedding, k_prime, &filter).await
    };

    let lexical_fut = async {
        if !options.hybrid || fts_query.trim().is_empty() {
            return Ok::<Vec<(String, f64)>, SearchError>(Vec::new());
        }
        let rows = chunks::search_fts(&store.pool, &fts_query, k_prime, &filter).await?;
        Ok(rows.into_iter().map(|(id, rank)| (id, -rank)).collect())
    };

    let (vector_result, lexical_result) = tokio::join!(vector_fut, lexical_fut);
    let (vector_ranked, lexical_ranked) = match (vector_result, lexical_result) {
        (Ok(v), Ok(l)) => (v, l),
        (Ok(v), Err(_)) => (v, Vec::new()),
        (Err(_), Ok(l)) => (Vec::new(), l),
        (Err(e), Err(_)) => return Err(e),
    };

    let fused = rrf_fuse(&vector_ranked, &lexical_ranked, options.rrf_k);

    let mut summaries: HashMap<String, ChunkSummary> = HashMap::new();
    for (id, ..) in &fused {
        if let Some(summary) = chunks::chunk_summary(&store.pool, id).await? {
            summaries.insert(id.clone(), summary);
        }
    }

    let candidates = dedup_and_boost(fused, &summaries);

    let query_lower = query.to_lowercase();
    let query_tokens: Vec<String> = pre.tokens.clone();

    let mut modified_at_cache: HashMap<String, Option<i64>> = HashMap::new();
    let mut results = Vec::new();
    for candidate in candidates {
        let Some(chunk) = summaries.get(&candidate.id).cloned() else {
            continue;
        };
        let file_path = chunk.file.to_string_lossy().to_string();

        let modified_at = if let Some(cached) = modified_at_cache.get(&file_path) {
            *cached
        } else {
            let fetched = chunks::file_modified_at(&store.pool, &file_path).await?;
            modified_at_cache.insert(file_path.clone(), fetched);
            fetched
        };

        let rerank_candidate = Candidate {
            chunk: &chunk,
            score: candidate.score,
            file_path: &file_path,
            modified_at,
        };

        let (score, signals): (f32, Vec<Signal>) = if options.rerank {
            let outcome = reranker.score(&query_lower, &query_tokens, &rerank_candidate);
            (outcome.score, outcome.signals)
        } else {
            (candidate.score, Vec::new())
        };

        let name_lower = chunk.name.to_lowercase();
        let path_lower = file_path.to_lowercase();
        let exact_phrase =
            !query_lower.is_empty() && chunk.content.to_lowercase().contains(&query_lower);
        let match_reasons = build_match_reasons(
            candidate.match_source.as_str(),
            &query_tokens,
            &name_lower,
            &path_lower,
            exact_phrase,
            &signals,
        );

        let parent = match &chunk.parent_id {
            Some(parent_id) => chunks::chunk_summary(&store.pool, parent_id)
                .await?
                .map(|p| ParentInfo { id: p.id, name: p.name, level: p.level }),
            None => None,
        };

        let mut signal_map = HashMap::new();
        for s in &signals {
            signal_map.insert(s.name.to_string(), s.value);
        }

        results.push(SearchResult {
            chunk,
            score,
            match_source: candidate.match_source,
            match_reasons,
            score_details: ScoreDetails {
                vector: candidate.vector_score.map(|d| 1.0 - d),
                keyword: candidate.lexical_score,
                rrf: candidate.score,
                signals: signal_map,
            },
            matched_splits: candidate.matched_splits,
            parent,
        });
    }

    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    let total_results = results.len();
    results.truncate(options.limit);

    Ok(SearchResponse {
        query: query.to_string(),
        results,
        total_results,
        search_time_ms: start.elapsed().as_millis() as u64,
        hybrid_enabled: options.hybrid,
        rerank_enabled: options.rerank,
    })
}

/// Vector-branch retrieval: via the HNSW index when present and non-empty, otherwise
/// a brute-force cosine scan over `Store::all_embeddings` (§9 "ANN is acceptable
/// where the store provides it", but a correct fallback must exist for small/fresh
/// indexes that haven't been built yet).
async fn vector_candidates(
    store: &Store,
    index: Option<&dyn VectorIndex>,
    query_embedding: &Embedding,
    k_prime: usize,
    filter: &SearchFilter,
) -> Result<Vec<(String, f32)>, SearchError> {
    if let Some(index) = index {
        if !index.is_empty() {
            return Ok(index
                .search(query_embedding, k_prime)
                .into_iter()
                .map(|r| (r.id, 1.0 - r.score))
                .collect());
        }
    }

    let all = chunks::all_embeddings(&store.pool, filter).await?;
    let query = query_embedding.as_slice();
    let mut scored: Vec<(String, f32)> = all
        .into_iter()
        .map(|(id, vector)| (id, cosine_distance(query, &vector)))
        .collect();
    scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k_prime);
    Ok(scored)
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 2.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 2.0;
    }
    1.0 - (dot / (norm_a * norm_b))
}
