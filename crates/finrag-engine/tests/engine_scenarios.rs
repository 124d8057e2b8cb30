//! End-to-end pipeline behavior over a real LanceDB store, a real lexical
//! corpus, and controllable oracles.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use finrag_core::chunker::TextChunker;
use finrag_core::oracle::{EmbeddingOracle, RerankOracle};
use finrag_core::types::{Meta, SourceDocument};
use finrag_engine::{
    ConfigUpdate, RetrievalConfig, RetrieveOptions, Retriever, NO_MATCH_CONTEXT,
};
use finrag_lexical::{LexicalConfig, LexicalIndex};
use finrag_rerank::RerankerAdapter;
use finrag_vector::VectorIndex;

/// Projects valuation-flavored and growth-flavored text onto orthogonal
/// axes, so vector rankings in these tests are fully controlled.
struct AxisEmbedder;

impl AxisEmbedder {
    fn project(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let mut v = vec![0.0f32; 4];
        if lower.contains("per") || lower.contains("저평가") {
            v[0] += 1.0;
        }
        if lower.contains("성장") || lower.contains("매출") {
            v[1] += 1.0;
        }
        if v.iter().all(|x| *x == 0.0) {
            v[2] = 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        v.into_iter().map(|x| x / norm).collect()
    }
}

impl EmbeddingOracle for AxisEmbedder {
    fn dim(&self) -> usize {
        4
    }

    fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| Self::project(t)).collect())
    }

    fn embed_query(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        Ok(Self::project(text))
    }
}

/// Relevance = does the document contain the query string.
struct SubstringRerank;

impl RerankOracle for SubstringRerank {
    fn score_batch(
        &self,
        query: &str,
        documents: &[String],
        _instruction: &str,
    ) -> anyhow::Result<Vec<f32>> {
        Ok(documents
            .iter()
            .map(|d| if d.contains(query) { 0.95 } else { 0.05 })
            .collect())
    }
}

struct OfflineRerank;

impl RerankOracle for OfflineRerank {
    fn score_batch(&self, _: &str, _: &[String], _: &str) -> anyhow::Result<Vec<f32>> {
        Err(anyhow::anyhow!("rerank oracle offline"))
    }
}

async fn make_retriever(tmp: &TempDir, reranker: Option<Arc<RerankerAdapter>>) -> Retriever {
    let embedder: Arc<dyn EmbeddingOracle> = Arc::new(AxisEmbedder);
    let vector = VectorIndex::open(&tmp.path().join("lancedb"), "passages", embedder)
        .await
        .expect("vector index");
    let lexical = Arc::new(LexicalIndex::open(LexicalConfig {
        persist_path: tmp.path().join("lexical_index.json"),
        auto_save: true,
        save_interval: 50,
    }));
    Retriever::new(
        TextChunker::default(),
        lexical,
        vector,
        reranker,
        RetrievalConfig::default(),
    )
}

const D1: &str = "PER 12.5배 저평가";
const D2: &str = "매출 성장률 30% 고성장";

async fn index_sample_docs(retriever: &Retriever) {
    let outcome = retriever
        .index_document(&SourceDocument::from_text("d1.pdf", D1), &Meta::new())
        .await;
    assert!(outcome.success);
    assert_eq!(outcome.chunks_added, 1);

    let outcome = retriever
        .index_document(&SourceDocument::from_text("d2.pdf", D2), &Meta::new())
        .await;
    assert!(outcome.success);
    assert_eq!(outcome.chunks_added, 1);
}

#[tokio::test]
async fn hybrid_search_ranks_exact_term_match_first() {
    let tmp = TempDir::new().expect("tmp");
    let retriever = make_retriever(&tmp, None).await;
    index_sample_docs(&retriever).await;

    let outcome = retriever.retrieve("PER", RetrieveOptions::default()).await.expect("retrieve");

    assert!(!outcome.results.is_empty());
    assert_eq!(outcome.results[0].metadata["source"], "d1.pdf");
    assert!(!outcome.is_reranked, "no reranker wired in");
    assert!(outcome.combined_context.contains("d1.pdf"));
}

#[tokio::test]
async fn growth_query_ranks_growth_document_first() {
    let tmp = TempDir::new().expect("tmp");
    let retriever = make_retriever(&tmp, None).await;
    index_sample_docs(&retriever).await;

    let outcome = retriever.retrieve("성장", RetrieveOptions::default()).await.expect("retrieve");

    assert!(!outcome.results.is_empty());
    assert_eq!(outcome.results[0].metadata["source"], "d2.pdf");
}

#[tokio::test]
async fn empty_corpus_returns_empty_outcome_not_error() {
    let tmp = TempDir::new().expect("tmp");
    let retriever = make_retriever(&tmp, None).await;

    let outcome = retriever
        .retrieve("아직 아무것도 없음", RetrieveOptions::default())
        .await
        .expect("empty corpus is a valid state");

    assert!(outcome.results.is_empty());
    assert!(!outcome.is_reranked);
    assert_eq!(outcome.combined_context, NO_MATCH_CONTEXT);
}

#[tokio::test]
async fn failing_rerank_oracle_degrades_to_fused_ranking() {
    let tmp = TempDir::new().expect("tmp");
    let adapter = Arc::new(RerankerAdapter::new(Arc::new(OfflineRerank)));
    let retriever = make_retriever(&tmp, Some(adapter)).await;
    index_sample_docs(&retriever).await;

    let outcome = retriever.retrieve("PER", RetrieveOptions::default()).await.expect("retrieve");

    assert!(!outcome.results.is_empty(), "fused ranking must survive oracle failure");
    assert!(!outcome.is_reranked);
    assert_eq!(outcome.results[0].metadata["source"], "d1.pdf");
}

#[tokio::test]
async fn working_reranker_reorders_and_marks_outcome() {
    let tmp = TempDir::new().expect("tmp");
    let adapter = Arc::new(RerankerAdapter::new(Arc::new(SubstringRerank)));
    let retriever = make_retriever(&tmp, Some(adapter)).await;
    index_sample_docs(&retriever).await;

    let outcome = retriever.retrieve("저평가", RetrieveOptions::default()).await.expect("retrieve");

    assert!(outcome.is_reranked);
    assert_eq!(outcome.results[0].metadata["source"], "d1.pdf");
    assert!((outcome.results[0].score - 0.95).abs() < 1e-6);
    assert!(outcome.combined_context.contains("(reranked)"));
    // Relevance scores live in [0, 1].
    assert!(outcome.results.iter().all(|r| (0.0..=1.0).contains(&r.score)));
}

#[tokio::test]
async fn indexing_is_idempotent_per_dedup_key() {
    let tmp = TempDir::new().expect("tmp");
    let retriever = make_retriever(&tmp, None).await;

    let mut meta = Meta::new();
    meta.insert("source".to_string(), "dup.pdf".to_string());
    meta.insert("page_num".to_string(), "1".to_string());

    let first = retriever.index_text(D1, &meta).await;
    assert!(first.success);
    assert_eq!(first.chunks_added, 1);

    let second = retriever.index_text(D1, &meta).await;
    assert!(second.success);
    assert_eq!(second.chunks_added, 0, "already-seen passages are not re-added");

    let stats = retriever.get_stats().await.expect("stats");
    assert_eq!(stats.lexical.corpus_size, 1);
    assert_eq!(stats.vector.row_count, 1);
}

#[tokio::test]
async fn output_is_bounded_by_final_k_and_pool() {
    let tmp = TempDir::new().expect("tmp");
    let retriever = make_retriever(&tmp, None).await;
    index_sample_docs(&retriever).await;

    // final_k defaults to 3 but only 2 candidates exist.
    let outcome = retriever.retrieve("PER", RetrieveOptions::default()).await.expect("retrieve");
    assert_eq!(outcome.results.len(), 2);

    let outcome = retriever
        .retrieve("PER", RetrieveOptions { k: Some(1), ..RetrieveOptions::default() })
        .await
        .expect("retrieve");
    assert_eq!(outcome.results.len(), 1);
}

#[tokio::test]
async fn deleted_sources_stop_appearing_in_both_paths() {
    let tmp = TempDir::new().expect("tmp");
    let retriever = make_retriever(&tmp, None).await;
    index_sample_docs(&retriever).await;

    assert!(retriever.delete_document("d1.pdf").await);

    let outcome = retriever.retrieve("PER", RetrieveOptions::default()).await.expect("retrieve");
    assert!(outcome.results.iter().all(|r| r.metadata["source"] != "d1.pdf"));

    // Both indexes individually forget the source.
    assert!(retriever.lexical().search("PER", 10).is_empty());
    let vector_hits = retriever.vector().search_with_score("PER", 10).await.expect("search");
    assert!(vector_hits.iter().all(|(c, _)| c.metadata["source"] != "d1.pdf"));
}

#[tokio::test]
async fn disabling_hybrid_matches_the_vector_only_ranking() {
    let tmp = TempDir::new().expect("tmp");
    let retriever = make_retriever(&tmp, None).await;
    index_sample_docs(&retriever).await;

    retriever.set_config(ConfigUpdate {
        use_hybrid: Some(false),
        use_reranker: Some(false),
        ..ConfigUpdate::default()
    });

    let k = 2;
    let outcome = retriever
        .retrieve("성장", RetrieveOptions { k: Some(k), ..RetrieveOptions::default() })
        .await
        .expect("retrieve");
    let direct = retriever.vector().search_with_score("성장", k).await.expect("search");

    assert_eq!(outcome.results.len(), direct.len());
    for (result, (candidate, distance)) in outcome.results.iter().zip(direct.iter()) {
        assert_eq!(result.content, candidate.content);
        assert!((result.score - (1.0 - distance)).abs() < 1e-6);
    }
}

#[tokio::test]
async fn whitespace_only_document_adds_no_chunks() {
    let tmp = TempDir::new().expect("tmp");
    let retriever = make_retriever(&tmp, None).await;

    let outcome = retriever.index_text("   \n\n  ", &Meta::new()).await;
    assert!(outcome.success);
    assert_eq!(outcome.chunks_added, 0);

    let doc = SourceDocument::from_text("blank.pdf", "");
    let outcome = retriever.index_document(&doc, &Meta::new()).await;
    assert!(outcome.success);
    assert_eq!(outcome.chunks_added, 0);
}

#[tokio::test]
async fn exhausted_deadline_returns_the_fused_stage() {
    let tmp = TempDir::new().expect("tmp");
    let adapter = Arc::new(RerankerAdapter::new(Arc::new(SubstringRerank)));
    let retriever = make_retriever(&tmp, Some(adapter)).await;
    index_sample_docs(&retriever).await;

    let outcome = retriever
        .retrieve(
            "저평가",
            RetrieveOptions {
                timeout: Some(Duration::from_millis(0)),
                ..RetrieveOptions::default()
            },
        )
        .await
        .expect("timeout degrades, not fails");

    assert!(!outcome.results.is_empty());
    assert!(!outcome.is_reranked, "rerank stage is sacrificed under deadline pressure");
}

#[tokio::test]
async fn config_updates_apply_to_subsequent_queries() {
    let tmp = TempDir::new().expect("tmp");
    let retriever = make_retriever(&tmp, None).await;
    index_sample_docs(&retriever).await;

    retriever.set_config(ConfigUpdate { final_k: Some(1), ..ConfigUpdate::default() });
    assert_eq!(retriever.get_config().final_k, 1);

    let outcome = retriever.retrieve("PER", RetrieveOptions::default()).await.expect("retrieve");
    assert_eq!(outcome.results.len(), 1);
}

#[tokio::test]
async fn page_metadata_flows_into_results() {
    let tmp = TempDir::new().expect("tmp");
    let retriever = make_retriever(&tmp, None).await;

    let doc = SourceDocument {
        source: "multi.pdf".to_string(),
        pages: vec![
            finrag_core::types::DocumentPage { page_num: 1, text: D1.to_string() },
            finrag_core::types::DocumentPage { page_num: 2, text: D2.to_string() },
        ],
    };
    let outcome = retriever.index_document(&doc, &Meta::new()).await;
    assert_eq!(outcome.chunks_added, 2);

    let result = retriever.retrieve("PER", RetrieveOptions::default()).await.expect("retrieve");
    assert_eq!(result.results[0].metadata["source"], "multi.pdf");
    assert_eq!(result.results[0].metadata["page_num"], "1");
    assert!(result.combined_context.contains("page: 1"));
}
