//! Lightweight tokenizer for a mixed Korean/English financial corpus.
//!
//! Works without a morphological analyzer. Protects domain tokens that the
//! vector index is weak on: abbreviations like "per" or "ev/ebitda", figures
//! with units like "12.5배" or "3.2%", and ticker-style numeric ids. Text
//! matching none of the patterns contributes no tokens.

use once_cell::sync::Lazy;
use regex::Regex;

/// Figures with a unit suffix: "12.5배", "3.2%", "1,200억", "50bp".
static NUMBER_WITH_UNIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[-+]?\d[\d,]*\.?\d*\s*(?:배|%|억|조|만|원|주|달러|위안|엔|점|bps|bp)")
        .expect("number-with-unit pattern is valid")
});

/// Latin abbreviations, `/` and `&` allowed inside: "per", "ev/ebitda", "m&a".
static ABBREVIATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-z][a-z/&]+[a-z]").expect("abbreviation pattern is valid"));

/// Hangul words of two or more syllables.
static HANGUL_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[가-힣]{2,}").expect("hangul pattern is valid"));

/// Standalone numbers of four or more digits (ticker codes and the like).
static STANDALONE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{4,}\b").expect("standalone-number pattern is valid"));

/// Tokenizes `text` for BM25 indexing and querying. Both sides must use
/// this same function so query terms line up with corpus terms.
pub fn tokenize(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    let text = text.to_lowercase();
    let mut tokens = Vec::new();

    for m in NUMBER_WITH_UNIT.find_iter(&text) {
        tokens.push(m.as_str().trim().to_string());
    }
    for m in ABBREVIATION.find_iter(&text) {
        tokens.push(m.as_str().to_string());
    }
    for m in HANGUL_WORD.find_iter(&text) {
        tokens.push(m.as_str().to_string());
    }
    for m in STANDALONE_NUMBER.find_iter(&text) {
        tokens.push(m.as_str().to_string());
    }

    tokens
}
