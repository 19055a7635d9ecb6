//! Integration tests for the top-level `pommel::search()` pipeline: hybrid fusion,
//! level/path filters, rerank toggle, and HNSW-vs-brute-force index selection.

mod common;

use common::{mock_embedding, test_chunk, TestStore};
use pommel::embedder::{CancelToken, Embedding, Provider, ProviderError};
use pommel::index::{IndexResult, VectorIndex};
use pommel::parser::ChunkLevel;
use pommel::reranker::Reranker;
use pommel::search::SearchOptions;

/// A provider that always returns the same canned embedding, regardless of query
/// text — the tests control relevance entirely through what's inserted into the store.
struct CannedProvider(Embedding);

#[async_trait::async_trait]
impl Provider for CannedProvider {
    async fn embed_one(&self, _text: &str, _cancel: &CancelToken) -> Result<Embedding, ProviderError> {
        Ok(Embedding::new(self.0.as_slice().to_vec()))
    }

    async fn embed_many(
        &self,
        texts: &[String],
        _cancel: &CancelToken,
    ) -> Result<Vec<Embedding>, ProviderError> {
        Ok(texts.iter().map(|_| Embedding::new(self.0.as_slice().to_vec())).collect())
    }

    async fn health(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    fn model_name(&self) -> &str {
        "canned-test-provider"
    }

    fn dimensions(&self) -> usize {
        self.0.as_slice().len()
    }

    fn context_size(&self) -> usize {
        8192
    }
}

struct MockIndex(Vec<IndexResult>);

impl VectorIndex for MockIndex {
    fn search(&self, _query: &Embedding, k: usize) -> Vec<IndexResult> {
        self.0.iter().take(k).cloned().collect()
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

fn insert(store: &TestStore, chunk: &pommel::Chunk, embedding: &pommel::Embedding) {
    store.upsert_file(&chunk.file.to_string_lossy(), &chunk.content_hash, chunk.language, 32, 0).unwrap();
    store.insert_chunk(chunk).unwrap();
    store.insert_embedding(&chunk.id, embedding.as_slice()).unwrap();
}

#[tokio::test]
async fn test_search_hybrid_merges_vector_and_keyword_hits() {
    let store = TestStore::new();
    let provider = CannedProvider(mock_embedding(1.0));
    let reranker = Reranker::new();

    let vector_hit = test_chunk("vectorOnly", "fn vectorOnly() { /* unrelated content */ }");
    let keyword_hit = {
        let mut c = test_chunk("parseConfigFile", "fn parseConfigFile() { /* parse config */ }");
        c.file = "keyword.rs".into();
        c.id = pommel::Chunk::compute_id("keyword.rs", 1, 5, ChunkLevel::Method, &c.name, &c.content_hash);
        c
    };
    insert(&store, &vector_hit, &mock_embedding(1.0));
    insert(&store, &keyword_hit, &mock_embedding(-1.0));

    let options = SearchOptions { limit: 10, ..SearchOptions::default() };
    let response = pommel::search(&store, None, &provider, &reranker, "parse config", &options).await.unwrap();

    let names: Vec<_> = response.results.iter().map(|r| r.chunk.name.as_str()).collect();
    assert!(names.contains(&"vectorOnly"), "vector-similar chunk should surface: {names:?}");
    assert!(names.contains(&"parseConfigFile"), "keyword match should surface: {names:?}");
}

#[tokio::test]
async fn test_search_semantic_only_skips_keyword_matches() {
    let store = TestStore::new();
    let provider = CannedProvider(mock_embedding(1.0));
    let reranker = Reranker::new();

    let keyword_only = {
        let mut c = test_chunk("parseConfigFile", "fn parseConfigFile() { /* parse config */ }");
        c.file = "keyword.rs".into();
        c.id = pommel::Chunk::compute_id("keyword.rs", 1, 5, ChunkLevel::Method, &c.name, &c.content_hash);
        c
    };
    insert(&store, &keyword_only, &mock_embedding(-1.0));

    let options = SearchOptions { limit: 10, hybrid: false, ..SearchOptions::default() };
    let response =
        pommel::search(&store, None, &provider, &reranker, "parse config", &options).await.unwrap();

    assert!(
        response.results.iter().all(|r| r.chunk.name != "parseConfigFile"),
        "semantic-only search should not surface a pure keyword match on a dissimilar vector"
    );
}

#[tokio::test]
async fn test_search_filters_by_level() {
    let store = TestStore::new();
    let provider = CannedProvider(mock_embedding(1.0));
    let reranker = Reranker::new();

    let method_chunk = test_chunk("a_method", "fn a_method() {}");
    let mut file_chunk = test_chunk("whole_file", "// a file chunk");
    file_chunk.level = ChunkLevel::File;
    file_chunk.id =
        pommel::Chunk::compute_id("test.rs", 1, 5, ChunkLevel::File, "whole_file", &file_chunk.content_hash);

    insert(&store, &method_chunk, &mock_embedding(1.0));
    insert(&store, &file_chunk, &mock_embedding(1.0));

    let options =
        SearchOptions { limit: 10, levels: vec![ChunkLevel::Method], ..SearchOptions::default() };
    let response = pommel::search(&store, None, &provider, &reranker, "method", &options).await.unwrap();

    assert!(response.results.iter().all(|r| r.chunk.level == ChunkLevel::Method));
    assert!(response.results.iter().any(|r| r.chunk.name == "a_method"));
}

#[tokio::test]
async fn test_search_filters_by_path_prefix() {
    let store = TestStore::new();
    let provider = CannedProvider(mock_embedding(1.0));
    let reranker = Reranker::new();

    let in_src = {
        let mut c = test_chunk("in_src", "fn in_src() {}");
        c.file = "src/lib.rs".into();
        c.id = pommel::Chunk::compute_id("src/lib.rs", 1, 5, ChunkLevel::Method, "in_src", &c.content_hash);
        c
    };
    let in_tests = {
        let mut c = test_chunk("in_tests", "fn in_tests() {}");
        c.file = "tests/lib.rs".into();
        c.id =
            pommel::Chunk::compute_id("tests/lib.rs", 1, 5, ChunkLevel::Method, "in_tests", &c.content_hash);
        c
    };
    insert(&store, &in_src, &mock_embedding(1.0));
    insert(&store, &in_tests, &mock_embedding(1.0));

    let options =
        SearchOptions { limit: 10, path_prefix: Some("src/".to_string()), ..SearchOptions::default() };
    let response = pommel::search(&store, None, &provider, &reranker, "fn", &options).await.unwrap();

    assert!(response.results.iter().all(|r| r.chunk.file.to_string_lossy().starts_with("src/")));
}

#[tokio::test]
async fn test_search_respects_limit() {
    let store = TestStore::new();
    let provider = CannedProvider(mock_embedding(1.0));
    let reranker = Reranker::new();

    for i in 0..10 {
        let chunk = test_chunk(&format!("fn{i}"), &format!("fn fn{i}() {{}}"));
        insert(&store, &chunk, &mock_embedding(1.0));
    }

    let options = SearchOptions { limit: 3, ..SearchOptions::default() };
    let response = pommel::search(&store, None, &provider, &reranker, "fn", &options).await.unwrap();

    assert_eq!(response.results.len(), 3);
}

#[tokio::test]
async fn test_search_uses_vector_index_when_present() {
    let store = TestStore::new();
    let provider = CannedProvider(mock_embedding(1.0));
    let reranker = Reranker::new();

    let indexed = test_chunk("indexed_fn", "fn indexed_fn() {}");
    let not_indexed = {
        let mut c = test_chunk("not_indexed_fn", "fn not_indexed_fn() {}");
        c.file = "other.rs".into();
        c.id = pommel::Chunk::compute_id(
            "other.rs",
            1,
            5,
            ChunkLevel::Method,
            "not_indexed_fn",
            &c.content_hash,
        );
        c
    };
    insert(&store, &indexed, &mock_embedding(1.0));
    insert(&store, &not_indexed, &mock_embedding(1.0));

    let index = MockIndex(vec![IndexResult { id: indexed.id.clone(), score: 0.95 }]);
    let options = SearchOptions { limit: 10, ..SearchOptions::default() };
    let response = pommel::search(&store, Some(&index), &provider, &reranker, "fn", &options)
        .await
        .unwrap();

    assert!(response.results.iter().any(|r| r.chunk.name == "indexed_fn"));
}

#[tokio::test]
async fn test_search_rerank_toggle_changes_match_reasons() {
    let store = TestStore::new();
    let provider = CannedProvider(mock_embedding(1.0));
    let reranker = Reranker::new();

    let chunk = test_chunk("parseConfig", "fn parseConfig() { /* parses configuration */ }");
    insert(&store, &chunk, &mock_embedding(1.0));

    let reranked = SearchOptions { limit: 10, rerank: true, ..SearchOptions::default() };
    let response = pommel::search(&store, None, &provider, &reranker, "parseConfig", &reranked)
        .await
        .unwrap();
    assert!(!response.results.is_empty());
    assert!(response.rerank_enabled);

    let not_reranked = SearchOptions { limit: 10, rerank: false, ..SearchOptions::default() };
    let response = pommel::search(&store, None, &provider, &reranker, "parseConfig", &not_reranked)
        .await
        .unwrap();
    assert!(!response.rerank_enabled);
}
