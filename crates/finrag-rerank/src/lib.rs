//! finrag-rerank
//!
//! Precision pass over the fused candidate pool. Scoring is delegated to an
//! external cross-encoder oracle in fixed-size batches; the adapter only
//! formats the task instruction, batches the calls, and reorders. An
//! unavailable oracle yields `None` so the orchestrator can fall back to
//! the fused ranking instead of failing the query.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use finrag_core::oracle::RerankOracle;

/// Batch size for oracle calls. Bounds the latency and memory of each
/// suspension on the oracle.
pub const DEFAULT_BATCH_SIZE: usize = 8;

/// Built-in notions of relevance the oracle can be instructed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Retrieval,
    Qa,
    Finance,
    Code,
    Semantic,
}

impl TaskType {
    pub fn instruction(self) -> &'static str {
        match self {
            TaskType::Retrieval => {
                "Given a web search query, retrieve relevant passages that answer the query"
            }
            TaskType::Qa => {
                "Given a question, retrieve passages that contain the answer to the question"
            }
            TaskType::Finance => {
                "Given a financial query, retrieve relevant financial documents, reports, or news that answer the query"
            }
            TaskType::Code => {
                "Given a code-related query, retrieve relevant code snippets or documentation"
            }
            TaskType::Semantic => "Given a query, retrieve semantically similar passages",
        }
    }
}

impl Default for TaskType {
    fn default() -> Self {
        TaskType::Finance
    }
}

/// One reranked document: the index into the caller's candidate list plus
/// the oracle's relevance score in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct RerankedDoc {
    pub index: usize,
    pub score: f32,
}

pub struct RerankerAdapter {
    oracle: Arc<dyn RerankOracle>,
    batch_size: usize,
}

impl RerankerAdapter {
    pub fn new(oracle: Arc<dyn RerankOracle>) -> Self {
        Self { oracle, batch_size: DEFAULT_BATCH_SIZE }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Scores `documents` against `query` under `instruction` and returns
    /// the top `top_k`, best first; ties keep the incoming candidate order.
    /// `None` means the oracle is unavailable — the caller decides the
    /// fallback, this adapter never errors out of a query.
    pub fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_k: usize,
        instruction: &str,
    ) -> Option<Vec<RerankedDoc>> {
        if documents.is_empty() {
            return Some(Vec::new());
        }

        let mut scores = Vec::with_capacity(documents.len());
        for batch in documents.chunks(self.batch_size) {
            match self.oracle.score_batch(query, batch, instruction) {
                Ok(batch_scores) => {
                    if batch_scores.len() != batch.len() {
                        warn!(
                            expected = batch.len(),
                            got = batch_scores.len(),
                            "rerank oracle returned a mismatched score count"
                        );
                        return None;
                    }
                    scores.extend(batch_scores);
                }
                Err(e) => {
                    warn!(error = %e, "rerank oracle unavailable");
                    return None;
                }
            }
        }

        let mut ranked: Vec<RerankedDoc> = scores
            .into_iter()
            .enumerate()
            .map(|(index, score)| RerankedDoc { index, score })
            .collect();
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        ranked.truncate(top_k);
        Some(ranked)
    }
}
