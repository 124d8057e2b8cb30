//! Retrieval orchestrator.
//!
//! Owns the chunker, both indexes and the optional reranker, and sequences
//! a query through vector recall, lexical recall, RRF fusion, the precision
//! rerank pass and context assembly. Every stage past vector recall
//! degrades gracefully: a missing lexical corpus means vector-only search,
//! an unavailable reranker means the fused ranking is returned as-is. Only
//! a vector-path failure surfaces to the caller, since it is the primary
//! recall source.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use finrag_core::chunker::TextChunker;
use finrag_core::error::Error as CoreError;
use finrag_core::types::{
    Meta, Passage, RetrievalCandidate, ScoredPassage, SourceDocument, PAGE_NUM_KEY, SOURCE_KEY,
};
use finrag_lexical::{LexicalIndex, LexicalStats};
use finrag_rerank::{RerankedDoc, RerankerAdapter, TaskType};
use finrag_vector::{VectorIndex, VectorStats};

use crate::fusion::{reciprocal_rank_fusion, DEFAULT_RRF_K};

/// Context marker returned when no candidate matches the query.
pub const NO_MATCH_CONTEXT: &str = "No matching documents were found.";

/// All recognized retrieval options, typed, with their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Candidate pool fetched from each index before fusion/reranking.
    pub pool_size: usize,
    /// Final result count returned to callers.
    pub final_k: usize,
    /// Run the precision rerank pass when an adapter is wired in.
    pub use_reranker: bool,
    /// Fuse lexical results with vector results when the corpus is non-empty.
    pub use_hybrid: bool,
    /// RRF smoothing constant.
    pub rrf_k: f32,
    pub vector_weight: f32,
    pub lexical_weight: f32,
    /// Built-in task instruction handed to the rerank oracle.
    pub rerank_task: TaskType,
    /// Custom instruction overriding the task registry.
    pub rerank_instruction: Option<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            pool_size: 20,
            final_k: 3,
            use_reranker: true,
            use_hybrid: true,
            rrf_k: DEFAULT_RRF_K,
            vector_weight: 1.0,
            lexical_weight: 1.0,
            rerank_task: TaskType::default(),
            rerank_instruction: None,
        }
    }
}

/// Per-call overrides; `None` falls back to the engine configuration.
#[derive(Debug, Clone, Default)]
pub struct RetrieveOptions {
    pub k: Option<usize>,
    pub use_reranker: Option<bool>,
    pub task: Option<TaskType>,
    pub instruction: Option<String>,
    /// Soft deadline: when it expires mid-pipeline the best completed stage
    /// is returned instead of an error.
    pub timeout: Option<Duration>,
}

/// Partial configuration update; fields left `None` keep their value.
#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    pub pool_size: Option<usize>,
    pub final_k: Option<usize>,
    pub use_reranker: Option<bool>,
    pub use_hybrid: Option<bool>,
    pub rerank_task: Option<TaskType>,
    pub rerank_instruction: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexOutcome {
    pub success: bool,
    pub chunks_added: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalOutcome {
    pub query: String,
    pub results: Vec<ScoredPassage>,
    pub combined_context: String,
    pub is_reranked: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub lexical: LexicalStats,
    pub vector: VectorStats,
}

/// One pooled candidate with its display score. The score space depends on
/// how the pool was built (RRF consensus or vector similarity) and is only
/// ever formatted, never fed back into another ranking stage.
struct PoolEntry {
    content: String,
    metadata: Meta,
    score: f32,
}

pub struct Retriever {
    chunker: TextChunker,
    lexical: Arc<LexicalIndex>,
    vector: VectorIndex,
    reranker: Option<Arc<RerankerAdapter>>,
    config: RwLock<RetrievalConfig>,
}

impl Retriever {
    pub fn new(
        chunker: TextChunker,
        lexical: Arc<LexicalIndex>,
        vector: VectorIndex,
        reranker: Option<Arc<RerankerAdapter>>,
        config: RetrievalConfig,
    ) -> Self {
        info!(
            pool_size = config.pool_size,
            final_k = config.final_k,
            use_reranker = config.use_reranker,
            use_hybrid = config.use_hybrid,
            "retriever initialized"
        );
        Self { chunker, lexical, vector, reranker, config: RwLock::new(config) }
    }

    fn read_config(&self) -> RwLockReadGuard<'_, RetrievalConfig> {
        self.config.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_config(&self) -> RwLockWriteGuard<'_, RetrievalConfig> {
        self.config.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn lexical(&self) -> &Arc<LexicalIndex> {
        &self.lexical
    }

    pub fn vector(&self) -> &VectorIndex {
        &self.vector
    }

    /// Chunks every page of an extracted document and writes the passages
    /// to both indexes. Page metadata is layered over caller metadata.
    pub async fn index_document(&self, document: &SourceDocument, metadata: &Meta) -> IndexOutcome {
        let mut passages = Vec::new();
        for page in &document.pages {
            if page.text.trim().is_empty() {
                continue;
            }
            let mut page_meta = metadata.clone();
            page_meta.insert(SOURCE_KEY.to_string(), document.source.clone());
            page_meta.insert(PAGE_NUM_KEY.to_string(), page.page_num.to_string());
            passages.extend(self.chunker.split(&page.text, &page_meta));
        }
        info!(
            source = %document.source,
            pages = document.total_pages(),
            chunks = passages.len(),
            "indexing document"
        );
        self.index_passages(passages).await
    }

    /// Indexes a raw text blob under the caller's metadata.
    pub async fn index_text(&self, text: &str, metadata: &Meta) -> IndexOutcome {
        let mut meta = metadata.clone();
        meta.entry(SOURCE_KEY.to_string()).or_insert_with(|| "unknown".to_string());
        let passages = self.chunker.split(text, &meta);
        self.index_passages(passages).await
    }

    /// Best-effort write to both indexes: a failure on one side is logged
    /// and the other side still gets the passages. `chunks_added` is the
    /// lexical dedup-aware count, so re-indexing unchanged content reports 0.
    async fn index_passages(&self, passages: Vec<Passage>) -> IndexOutcome {
        if passages.is_empty() {
            return IndexOutcome { success: true, chunks_added: 0 };
        }

        let vector_ok = match self.vector.add(&passages).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "vector index write failed; lexical write continues");
                false
            }
        };

        let added = self.lexical.add(&passages);

        IndexOutcome { success: vector_ok || added > 0, chunks_added: added }
    }

    /// Answers a query through the full pipeline. Only a vector-path
    /// failure is an error; every other stage degrades.
    pub async fn retrieve(&self, query: &str, opts: RetrieveOptions) -> Result<RetrievalOutcome> {
        let deadline = opts.timeout.map(|t| Instant::now() + t);
        let cfg = self.read_config().clone();

        let final_k = opts.k.unwrap_or(cfg.final_k);
        let want_rerank = opts.use_reranker.unwrap_or(cfg.use_reranker) && self.reranker.is_some();
        let hybrid = cfg.use_hybrid && !self.lexical.is_empty();
        let pool_size = if want_rerank || hybrid { cfg.pool_size } else { final_k };

        info!(query_len = query.len(), pool_size, final_k, hybrid, want_rerank, "retrieving");

        // Primary recall. A failure here is fatal to the query.
        let vector_hits = self
            .vector
            .search_with_score(query, pool_size)
            .await
            .map_err(|e| {
                anyhow::Error::new(CoreError::IndexUnavailable(format!(
                    "vector search failed: {e}"
                )))
            })?;

        let pool: Vec<PoolEntry> = if hybrid {
            let vector_candidates: Vec<RetrievalCandidate> =
                vector_hits.iter().map(|(c, _)| c.clone()).collect();
            let lexical_hits = self.lexical.search(query, pool_size);
            info!(
                vector = vector_candidates.len(),
                lexical = lexical_hits.len(),
                "fusing candidate rankings"
            );
            reciprocal_rank_fusion(
                &vector_candidates,
                &lexical_hits,
                cfg.rrf_k,
                cfg.vector_weight,
                cfg.lexical_weight,
            )
            .into_iter()
            .map(|f| PoolEntry { content: f.content, metadata: f.metadata, score: f.rrf_score })
            .collect()
        } else {
            vector_hits
                .into_iter()
                .map(|(c, distance)| PoolEntry {
                    content: c.content,
                    metadata: c.metadata,
                    // Display conversion only; distance never re-enters a
                    // ranking stage.
                    score: 1.0 - distance,
                })
                .collect()
        };

        if pool.is_empty() {
            info!("no candidates for query");
            return Ok(RetrievalOutcome {
                query: query.to_string(),
                results: Vec::new(),
                combined_context: NO_MATCH_CONTEXT.to_string(),
                is_reranked: false,
            });
        }

        if want_rerank {
            let expired = deadline
                .map(|d| d.saturating_duration_since(Instant::now()).is_zero())
                .unwrap_or(false);
            if expired {
                warn!("deadline exhausted before reranking; returning fused ranking");
            } else if let Some(adapter) = &self.reranker {
                let instruction = opts
                    .instruction
                    .clone()
                    .or_else(|| cfg.rerank_instruction.clone())
                    .unwrap_or_else(|| {
                        opts.task.unwrap_or(cfg.rerank_task).instruction().to_string()
                    });
                let documents: Vec<String> = pool.iter().map(|e| e.content.clone()).collect();
                let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));

                let ranked = run_reranker(
                    Arc::clone(adapter),
                    query.to_string(),
                    documents,
                    final_k,
                    instruction,
                    remaining,
                )
                .await;

                if let Some(ranked) = ranked {
                    let results: Vec<ScoredPassage> = ranked
                        .iter()
                        .filter_map(|r| {
                            pool.get(r.index).map(|entry| ScoredPassage {
                                content: entry.content.clone(),
                                metadata: entry.metadata.clone(),
                                score: r.score,
                            })
                        })
                        .collect();
                    let combined_context = build_context(&results, true);
                    info!(returned = results.len(), "retrieval complete (reranked)");
                    return Ok(RetrievalOutcome {
                        query: query.to_string(),
                        results,
                        combined_context,
                        is_reranked: true,
                    });
                }
                warn!("reranker unavailable; returning fused ranking");
            }
        }

        let results: Vec<ScoredPassage> = pool
            .into_iter()
            .take(final_k)
            .map(|e| ScoredPassage { content: e.content, metadata: e.metadata, score: e.score })
            .collect();
        let combined_context = build_context(&results, false);
        info!(returned = results.len(), "retrieval complete");
        Ok(RetrievalOutcome {
            query: query.to_string(),
            results,
            combined_context,
            is_reranked: false,
        })
    }

    /// Removes the source from both indexes; true when either side removed
    /// anything.
    pub async fn delete_document(&self, source: &str) -> bool {
        let lexical_removed = self.lexical.delete_by_source(source);
        let vector_ok = self.vector.delete_by_source(source).await;
        info!(source, lexical_removed, vector_ok, "delete_document finished");
        vector_ok || lexical_removed > 0
    }

    pub async fn get_stats(&self) -> Result<EngineStats> {
        Ok(EngineStats { lexical: self.lexical.stats(), vector: self.vector.stats().await? })
    }

    pub fn get_config(&self) -> RetrievalConfig {
        self.read_config().clone()
    }

    pub fn set_config(&self, update: ConfigUpdate) {
        let mut cfg = self.write_config();
        if let Some(v) = update.pool_size {
            cfg.pool_size = v;
        }
        if let Some(v) = update.final_k {
            cfg.final_k = v;
        }
        if let Some(v) = update.use_reranker {
            cfg.use_reranker = v;
        }
        if let Some(v) = update.use_hybrid {
            cfg.use_hybrid = v;
        }
        if let Some(v) = update.rerank_task {
            cfg.rerank_task = v;
        }
        if let Some(v) = update.rerank_instruction {
            cfg.rerank_instruction = Some(v);
        }
        info!(
            pool_size = cfg.pool_size,
            final_k = cfg.final_k,
            use_reranker = cfg.use_reranker,
            use_hybrid = cfg.use_hybrid,
            "retrieval config updated"
        );
    }
}

/// Runs the blocking rerank call off the async runtime, bounded by the
/// remaining deadline when one exists. Panics and timeouts both degrade to
/// `None` so the caller falls back to the fused ranking.
async fn run_reranker(
    adapter: Arc<RerankerAdapter>,
    query: String,
    documents: Vec<String>,
    top_k: usize,
    instruction: String,
    remaining: Option<Duration>,
) -> Option<Vec<RerankedDoc>> {
    let task =
        tokio::task::spawn_blocking(move || adapter.rerank(&query, &documents, top_k, &instruction));

    match remaining {
        Some(limit) => match tokio::time::timeout(limit, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(error = %e, "rerank task failed");
                None
            }
            Err(_) => {
                warn!("rerank timed out");
                None
            }
        },
        None => match task.await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "rerank task failed");
                None
            }
        },
    }
}

/// Human-readable context for the final results, in rank order.
fn build_context(results: &[ScoredPassage], reranked: bool) -> String {
    if results.is_empty() {
        return NO_MATCH_CONTEXT.to_string();
    }

    let mut parts = Vec::with_capacity(results.len() * 2 + 1);
    parts.push(
        if reranked {
            "=== Retrieved documents (reranked) ==="
        } else {
            "=== Retrieved documents ==="
        }
        .to_string(),
    );
    for (i, result) in results.iter().enumerate() {
        let source = result.metadata.get(SOURCE_KEY).map(String::as_str).unwrap_or("unknown");
        let page = result.metadata.get(PAGE_NUM_KEY).map(String::as_str).unwrap_or("?");
        parts.push(format!(
            "\n[Document {}] (source: {}, page: {}, score: {:.3})",
            i + 1,
            source,
            page,
            result.score
        ));
        parts.push(result.content.clone());
    }
    parts.join("\n")
}
