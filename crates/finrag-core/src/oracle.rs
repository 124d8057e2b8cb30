//! External scoring oracles consumed through narrow traits.
//!
//! The engine never computes embedding or cross-encoder math itself; it
//! calls whatever implementation the host application wires in. The hashed
//! embedder below is a deterministic stand-in for tests and development,
//! switched on with `APP_USE_FAKE_EMBEDDINGS=1`.

use std::hash::{Hash, Hasher};
use twox_hash::XxHash64;

/// Dense-embedding oracle. Document-side and query-side embeddings may use
/// different prompt prefixes, so both variants exist and callers must pick
/// the one matching the role of the text.
pub trait EmbeddingOracle: Send + Sync {
    /// Embedding dimensionality.
    fn dim(&self) -> usize;
    /// Document-side embeddings for a batch of passages.
    fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
    /// Query-side embedding for a search string.
    fn embed_query(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}

/// Cross-encoder relevance oracle. Scores each (query, document) pair under
/// the given task instruction, returning one value in [0, 1] per document.
pub trait RerankOracle: Send + Sync {
    fn score_batch(
        &self,
        query: &str,
        documents: &[String],
        instruction: &str,
    ) -> anyhow::Result<Vec<f32>>;
}

/// Deterministic token-hashing embedder. Not semantically meaningful, but
/// stable across runs, which is what tests and offline development need.
pub struct HashedEmbedder {
    dim: usize,
}

impl HashedEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for (i, token) in text.split_whitespace().enumerate() {
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize) % self.dim;
            let val = (((h >> 32) as u32) as f32) / (u32::MAX as f32);
            v[idx] += val + (i as f32 % 3.0) * 0.01;
        }
        let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt().max(1e-6);
        for x in &mut v {
            *x /= norm;
        }
        v
    }
}

impl EmbeddingOracle for HashedEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn embed_query(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        // No query-side prompt for the hashed stand-in; same projection.
        Ok(self.embed_one(text))
    }
}

/// True when the host opted into deterministic hashed embeddings.
pub fn use_hashed_embeddings() -> bool {
    std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashed_embedder_is_deterministic() {
        let e = HashedEmbedder::new(64);
        let a = e.embed_query("PER 12.5배 저평가").expect("embed");
        let b = e.embed_query("PER 12.5배 저평가").expect("embed");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn hashed_embedder_output_is_normalized() {
        let e = HashedEmbedder::new(32);
        let v = e.embed_query("매출 성장률 30%").expect("embed");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3);
    }

    #[test]
    fn document_and_query_sides_share_dimension() {
        let e = HashedEmbedder::new(16);
        let docs = e.embed(&["alpha".to_string(), "beta".to_string()]).expect("embed");
        assert_eq!(docs.len(), 2);
        assert!(docs.iter().all(|v| v.len() == 16));
    }
}
