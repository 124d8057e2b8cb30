//! BM25 ranking structure.
//!
//! Built from the full tokenized corpus and rebuilt after every batch of
//! additions or deletions: inverse document frequency is a global statistic,
//! so a from-scratch rebuild is the only way to keep it correct.

use std::collections::HashMap;

/// Term-frequency saturation parameter.
pub const DEFAULT_K1: f32 = 1.5;
/// Length-normalization parameter.
pub const DEFAULT_B: f32 = 0.75;

pub struct Bm25Model {
    /// Per-document term frequencies, corpus order.
    doc_term_freqs: Vec<HashMap<String, u32>>,
    doc_lens: Vec<f32>,
    avg_doc_len: f32,
    idf: HashMap<String, f32>,
    k1: f32,
    b: f32,
}

impl Bm25Model {
    pub fn build(tokenized_corpus: &[&[String]]) -> Self {
        Self::build_with_params(tokenized_corpus, DEFAULT_K1, DEFAULT_B)
    }

    pub fn build_with_params(tokenized_corpus: &[&[String]], k1: f32, b: f32) -> Self {
        let n = tokenized_corpus.len();
        let mut doc_freqs: HashMap<String, u32> = HashMap::new();
        let mut doc_term_freqs = Vec::with_capacity(n);
        let mut doc_lens = Vec::with_capacity(n);

        for tokens in tokenized_corpus {
            let mut tf: HashMap<String, u32> = HashMap::new();
            for token in tokens.iter() {
                *tf.entry(token.clone()).or_insert(0) += 1;
            }
            for term in tf.keys() {
                *doc_freqs.entry(term.clone()).or_insert(0) += 1;
            }
            doc_lens.push(tokens.len() as f32);
            doc_term_freqs.push(tf);
        }

        let avg_doc_len = if n > 0 {
            doc_lens.iter().sum::<f32>() / n as f32
        } else {
            0.0
        };

        // Lucene-style smoothed IDF; always positive, no negative-score
        // correction needed.
        let idf = doc_freqs
            .into_iter()
            .map(|(term, df)| {
                let value = (1.0 + (n as f32 - df as f32 + 0.5) / (df as f32 + 0.5)).ln();
                (term, value)
            })
            .collect();

        Self { doc_term_freqs, doc_lens, avg_doc_len, idf, k1, b }
    }

    pub fn len(&self) -> usize {
        self.doc_term_freqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_term_freqs.is_empty()
    }

    /// BM25 score of every corpus document against the query tokens, in
    /// corpus order. Documents sharing no term with the query score 0.
    pub fn scores(&self, query_tokens: &[String]) -> Vec<f32> {
        let mut scores = vec![0.0f32; self.doc_term_freqs.len()];
        if self.avg_doc_len <= 0.0 {
            return scores;
        }

        for term in query_tokens {
            let Some(idf) = self.idf.get(term) else { continue };
            for (i, tf_map) in self.doc_term_freqs.iter().enumerate() {
                let Some(&tf) = tf_map.get(term) else { continue };
                let tf = tf as f32;
                let norm = self.k1 * (1.0 - self.b + self.b * self.doc_lens[i] / self.avg_doc_len);
                scores[i] += idf * tf * (self.k1 + 1.0) / (tf + norm);
            }
        }

        scores
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus(docs: &[&[&str]]) -> Vec<Vec<String>> {
        docs.iter()
            .map(|d| d.iter().map(|t| (*t).to_string()).collect())
            .collect()
    }

    fn model(docs: &[&[&str]]) -> (Bm25Model, Vec<Vec<String>>) {
        let owned = corpus(docs);
        let refs: Vec<&[String]> = owned.iter().map(Vec::as_slice).collect();
        (Bm25Model::build(&refs), owned)
    }

    fn query(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| (*t).to_string()).collect()
    }

    #[test]
    fn empty_corpus_scores_nothing() {
        let (m, _) = model(&[]);
        assert!(m.is_empty());
        assert!(m.scores(&query(&["per"])).is_empty());
    }

    #[test]
    fn matching_document_outranks_non_matching() {
        let (m, _) = model(&[&["per", "저평가"], &["매출", "성장률"]]);
        let scores = m.scores(&query(&["per"]));
        assert!(scores[0] > 0.0);
        assert_eq!(scores[1], 0.0);
    }

    #[test]
    fn term_frequency_raises_the_score() {
        let (m, _) = model(&[&["per", "분석"], &["per", "per", "per", "분석"], &["매출"]]);
        let scores = m.scores(&query(&["per"]));
        assert!(scores[1] > scores[0], "{scores:?}");
    }

    #[test]
    fn rare_terms_weigh_more_than_common_ones() {
        // "분석" appears everywhere, "저평가" in one document only.
        let (m, _) = model(&[&["분석", "저평가"], &["분석", "성장"], &["분석", "매출"]]);
        let scores = m.scores(&query(&["분석", "저평가"]));
        let common_only = m.scores(&query(&["분석"]));
        assert!(scores[0] > common_only[0]);
        assert!(scores[0] > scores[1]);
    }

    #[test]
    fn unknown_query_terms_are_ignored() {
        let (m, _) = model(&[&["per", "저평가"]]);
        let scores = m.scores(&query(&["없는단어"]));
        assert_eq!(scores[0], 0.0);
    }

    #[test]
    fn idf_is_always_positive() {
        // A term present in every document must still contribute positively.
        let (m, _) = model(&[&["분석"], &["분석"], &["분석"]]);
        let scores = m.scores(&query(&["분석"]));
        assert!(scores.iter().all(|s| *s > 0.0), "{scores:?}");
    }

    #[test]
    fn longer_documents_are_penalized() {
        let long: Vec<&str> = std::iter::once("per")
            .chain(std::iter::repeat("채움").take(30))
            .collect();
        let docs: Vec<&[&str]> = vec![&["per", "분석"], &long[..]];
        let (m, _) = model(&docs);
        let scores = m.scores(&query(&["per"]));
        assert!(scores[0] > scores[1], "{scores:?}");
    }
}
