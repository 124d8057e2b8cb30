//! Text chunking: recursive separator splitting with greedy re-merging.
//!
//! Splitting is pure and restartable. Lengths are measured in characters,
//! not bytes, since the corpus mixes Hangul and Latin script.

use crate::error::{Error, Result};
use crate::types::{Meta, Passage};

/// Separators tried in order, coarsest first. Korean sentence endings sit
/// alongside the Latin terminators because OCR output mixes both scripts.
pub const DEFAULT_SEPARATORS: [&str; 10] =
    ["\n\n", "\n", "。", ". ", "! ", "? ", "다. ", "요. ", ", ", " "];

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Maximum passage length in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive force-split passages.
    pub chunk_overlap: usize,
    pub separators: Vec<String>,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            separators: DEFAULT_SEPARATORS.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl TextChunker {
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        if config.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be > 0".to_string()));
        }
        if config.chunk_overlap >= config.chunk_size {
            return Err(Error::InvalidConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                config.chunk_overlap, config.chunk_size
            )));
        }
        if config.separators.iter().any(String::is_empty) {
            return Err(Error::InvalidConfig("separators must be non-empty".to_string()));
        }
        Ok(Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            separators: config.separators,
        })
    }

    /// Splits `text` into passages no longer than `chunk_size` characters.
    /// Empty or whitespace-only input yields zero passages.
    pub fn split(&self, text: &str, metadata: &Meta) -> Vec<Passage> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let pieces = self.split_recursive(text, &self.separators);
        let merged = self.merge_pieces(pieces);

        let total = merged.len();
        let mut passages = Vec::with_capacity(total);
        // Byte offset where the next chunk is searched for; backtracked by
        // chunk_overlap characters so overlapping chunks still resolve.
        let mut scan_from = 0usize;

        for (i, chunk) in merged.into_iter().enumerate() {
            let start = text
                .get(scan_from..)
                .and_then(|rest| rest.find(chunk.as_str()))
                .map(|off| scan_from + off)
                .unwrap_or(scan_from);
            let end = start + chunk.len();

            let mut meta = metadata.clone();
            meta.insert("chunk_index".to_string(), i.to_string());
            meta.insert("total_chunks".to_string(), total.to_string());
            meta.insert("start_char".to_string(), start.to_string());
            meta.insert("end_char".to_string(), end.to_string());

            let keep = char_len(&chunk).saturating_sub(self.chunk_overlap);
            let keep_bytes: usize = chunk.chars().take(keep).map(char::len_utf8).sum();
            scan_from = start + keep_bytes;

            passages.push(Passage::new(chunk, meta));
        }

        passages
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let Some((separator, remaining)) = separators.split_first() else {
            return self.split_by_length(text);
        };

        let mut pieces = Vec::new();
        for part in text.split(separator.as_str()) {
            if char_len(part) <= self.chunk_size {
                if !part.trim().is_empty() {
                    pieces.push(part.to_string());
                }
            } else {
                pieces.extend(self.split_recursive(part, remaining));
            }
        }
        pieces
    }

    /// Last resort when no separator applies: fixed windows with real
    /// character overlap between consecutive windows.
    fn split_by_length(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let mut pieces = Vec::new();
        let mut start = 0usize;
        while start < chars.len() {
            let end = (start + self.chunk_size).min(chars.len());
            pieces.push(chars[start..end].iter().collect());
            if end >= chars.len() {
                break;
            }
            start = end - self.chunk_overlap;
        }
        pieces
    }

    /// Greedily joins adjacent small pieces while the combined length stays
    /// within chunk_size, to avoid pathologically small passages.
    fn merge_pieces(&self, pieces: Vec<String>) -> Vec<String> {
        let mut iter = pieces.into_iter();
        let Some(mut current) = iter.next() else {
            return Vec::new();
        };

        let mut merged = Vec::new();
        for piece in iter {
            if char_len(&current) + char_len(&piece) + 1 <= self.chunk_size {
                current.push('\n');
                current.push_str(&piece);
            } else {
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    merged.push(trimmed.to_string());
                }
                current = piece;
            }
        }
        let trimmed = current.trim();
        if !trimmed.is_empty() {
            merged.push(trimmed.to_string());
        }
        merged
    }
}

impl Default for TextChunker {
    fn default() -> Self {
        Self::new(ChunkerConfig::default()).expect("default chunker config is valid")
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
