//! Domain types shared by the lexical and vector engines.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hasher;
use twox_hash::XxHash64;

/// Caller-supplied metadata. All values are strings so the map can travel
/// unchanged through both indexes and the persisted lexical file.
pub type Meta = HashMap<String, String>;

/// Metadata key naming the originating document.
pub const SOURCE_KEY: &str = "source";
/// Metadata key carrying the page number within the originating document.
pub const PAGE_NUM_KEY: &str = "page_num";

/// Number of leading characters of passage content hashed into the dedup key.
pub const DEDUP_PREFIX_CHARS: usize = 200;

/// One page of extracted text, as delivered by the upstream text-extraction
/// engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentPage {
    pub page_num: u32,
    pub text: String,
}

/// A named source document: ordered pages of raw text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub source: String,
    pub pages: Vec<DocumentPage>,
}

impl SourceDocument {
    /// Wraps a single blob of text as a one-page document.
    pub fn from_text(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            pages: vec![DocumentPage { page_num: 1, text: text.into() }],
        }
    }

    pub fn total_pages(&self) -> usize {
        self.pages.len()
    }
}

/// A bounded-length excerpt of a source document; the unit of indexing and
/// retrieval. Origin (`source`, `page_num`) and position (`chunk_index`,
/// `total_chunks`, offsets) live in the metadata map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Passage {
    pub content: String,
    pub metadata: Meta,
}

impl Passage {
    pub fn new(content: impl Into<String>, metadata: Meta) -> Self {
        Self { content: content.into(), metadata }
    }

    pub fn source(&self) -> &str {
        self.metadata
            .get(SOURCE_KEY)
            .map(String::as_str)
            .unwrap_or("unknown")
    }

    /// Page number parsed from metadata; 0 when absent or unparseable.
    pub fn page_num(&self) -> i32 {
        self.metadata
            .get(PAGE_NUM_KEY)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// Deterministic identifier for duplicate detection. Re-indexing the
    /// same (source, page, content) yields the same key.
    pub fn dedup_key(&self) -> String {
        let page = self
            .metadata
            .get(PAGE_NUM_KEY)
            .map(String::as_str)
            .unwrap_or("0");
        dedup_key(self.source(), page, &self.content)
    }
}

/// `{source}_{page}_{hash8}` where `hash8` covers the first
/// [`DEDUP_PREFIX_CHARS`] characters of content.
pub fn dedup_key(source: &str, page: &str, content: &str) -> String {
    let prefix: String = content.chars().take(DEDUP_PREFIX_CHARS).collect();
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(prefix.as_bytes());
    let hash = hasher.finish();
    format!("{}_{}_{:08x}", source, page, (hash >> 32) as u32)
}

/// A raw hit from one index. `score` semantics depend on the origin:
/// distance for the vector index (lower is closer), a BM25 relevance
/// statistic for the lexical index (higher is better). Scores from
/// different origins are never compared directly; fusion works on ranks.
#[derive(Debug, Clone)]
pub struct RetrievalCandidate {
    pub content: String,
    pub metadata: Meta,
    pub score: f32,
    /// 1-based position within the originating ranking.
    pub rank: usize,
}

/// A candidate after Reciprocal Rank Fusion. The score is rank-based and
/// dimensionless; it is formatted for display, never reinterpreted as a
/// distance or probability.
#[derive(Debug, Clone)]
pub struct FusedCandidate {
    pub content: String,
    pub metadata: Meta,
    pub rrf_score: f32,
}

/// Final result entity handed to callers, ordered by score descending.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredPassage {
    pub content: String,
    pub metadata: Meta,
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_key_is_stable() {
        let a = dedup_key("report.pdf", "3", "PER 12.5배 저평가 구간");
        let b = dedup_key("report.pdf", "3", "PER 12.5배 저평가 구간");
        assert_eq!(a, b);
        assert!(a.starts_with("report.pdf_3_"));
    }

    #[test]
    fn dedup_key_ignores_tail_past_prefix() {
        let head: String = "가".repeat(DEDUP_PREFIX_CHARS);
        let a = dedup_key("s", "1", &format!("{head}xxx"));
        let b = dedup_key("s", "1", &format!("{head}yyy"));
        assert_eq!(a, b, "only the first {DEDUP_PREFIX_CHARS} chars are hashed");
    }

    #[test]
    fn dedup_key_differs_on_source_and_page() {
        let a = dedup_key("a.pdf", "1", "text");
        let b = dedup_key("b.pdf", "1", "text");
        let c = dedup_key("a.pdf", "2", "text");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn passage_accessors_fall_back() {
        let p = Passage::new("body", Meta::new());
        assert_eq!(p.source(), "unknown");
        assert_eq!(p.page_num(), 0);
    }
}
