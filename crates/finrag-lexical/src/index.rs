//! Persistent BM25 keyword index.
//!
//! The in-memory corpus is authoritative; a single JSON document on disk is
//! the durable copy, written after every `save_interval` net additions and
//! after deletions. Tokens are derived and never persisted — they are
//! recomputed with the current tokenizer on load, so tokenizer upgrades
//! apply to old corpora automatically.
//!
//! Write discipline is single-writer: corpus mutation, statistics rebuild
//! and the persistence trigger all happen under one write lock, because the
//! rebuild recomputes global statistics over the whole corpus. Readers take
//! the read lock and are never blocked longer than one rebuild.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use finrag_core::error::Error;
use finrag_core::types::{Meta, Passage, RetrievalCandidate, SOURCE_KEY};

use crate::bm25::Bm25Model;
use crate::tokenizer::tokenize;

#[derive(Debug, Clone)]
pub struct LexicalConfig {
    /// Location of the persisted index file.
    pub persist_path: PathBuf,
    /// When false, the index only writes on explicit `save()`.
    pub auto_save: bool,
    /// Net additions between debounced writes.
    pub save_interval: usize,
}

impl Default for LexicalConfig {
    fn default() -> Self {
        Self {
            persist_path: PathBuf::from("./database/lexical_index.json"),
            auto_save: true,
            save_interval: 50,
        }
    }
}

/// One corpus entry. Tokens are derived state, owned by the index.
#[derive(Debug, Clone)]
struct CorpusEntry {
    doc_id: String,
    content: String,
    metadata: Meta,
    tokens: Vec<String>,
}

#[derive(Default)]
struct LexicalState {
    corpus: Vec<CorpusEntry>,
    model: Option<Bm25Model>,
    indexed_ids: HashSet<String>,
    changes_since_save: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LexicalStats {
    pub corpus_size: usize,
    pub index_built: bool,
    pub persist_path: String,
    pub pending_changes: usize,
}

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    version: String,
    corpus_size: usize,
    documents: Vec<PersistedDocument>,
}

#[derive(Serialize, Deserialize)]
struct PersistedDocument {
    doc_id: String,
    page_content: String,
    metadata: Meta,
}

const FORMAT_VERSION: &str = "1.0";

pub struct LexicalIndex {
    config: LexicalConfig,
    state: RwLock<LexicalState>,
}

impl LexicalIndex {
    /// Opens the index, loading any persisted corpus. A missing or corrupt
    /// file is a valid empty start, not an error.
    pub fn open(config: LexicalConfig) -> Self {
        let index = Self { config, state: RwLock::new(LexicalState::default()) };
        index.load();
        index
    }

    fn read_state(&self) -> RwLockReadGuard<'_, LexicalState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, LexicalState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds passages, skipping duplicates (dedup key) and passages whose
    /// text produces no tokens. Returns the number actually added.
    pub fn add(&self, passages: &[Passage]) -> usize {
        let mut state = self.write_state();

        let mut added = 0;
        for passage in passages {
            let doc_id = passage.dedup_key();
            if state.indexed_ids.contains(&doc_id) {
                continue;
            }
            let tokens = tokenize(&passage.content);
            if tokens.is_empty() {
                debug!(doc_id = %doc_id, "skipping passage with no indexable tokens");
                continue;
            }
            state.indexed_ids.insert(doc_id.clone());
            state.corpus.push(CorpusEntry {
                doc_id,
                content: passage.content.clone(),
                metadata: passage.metadata.clone(),
                tokens,
            });
            added += 1;
        }

        if added > 0 {
            Self::rebuild(&mut state);
            state.changes_since_save += added;
            info!(added, total = state.corpus.len(), "lexical corpus updated");
            if self.config.auto_save && state.changes_since_save >= self.config.save_interval {
                self.persist(&mut state);
            }
        }

        added
    }

    /// Top `k` corpus entries with BM25 score > 0, best first. Ties keep
    /// corpus order so results are deterministic.
    pub fn search(&self, query: &str, k: usize) -> Vec<RetrievalCandidate> {
        let state = self.read_state();
        let Some(model) = state.model.as_ref() else {
            return Vec::new();
        };

        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }

        let scores = model.scores(&query_tokens);
        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| scores[b].partial_cmp(&scores[a]).unwrap_or(Ordering::Equal));

        let mut results = Vec::new();
        for idx in order.into_iter().take(k) {
            if scores[idx] <= 0.0 {
                break;
            }
            let entry = &state.corpus[idx];
            results.push(RetrievalCandidate {
                content: entry.content.clone(),
                metadata: entry.metadata.clone(),
                score: scores[idx],
                rank: results.len() + 1,
            });
        }
        results
    }

    /// Removes every entry whose metadata source matches; rebuilds and
    /// persists. Returns the number removed.
    pub fn delete_by_source(&self, source: &str) -> usize {
        let mut state = self.write_state();

        let mut removed_ids = Vec::new();
        state.corpus.retain(|entry| {
            let matches = entry.metadata.get(SOURCE_KEY).map(String::as_str) == Some(source);
            if matches {
                removed_ids.push(entry.doc_id.clone());
            }
            !matches
        });

        let deleted = removed_ids.len();
        if deleted == 0 {
            return 0;
        }
        for id in removed_ids {
            state.indexed_ids.remove(&id);
        }

        Self::rebuild(&mut state);
        info!(deleted, source, "removed entries from lexical corpus");
        if self.config.auto_save {
            self.persist(&mut state);
        }
        deleted
    }

    /// Drops all in-memory state and the persisted file.
    pub fn clear(&self) {
        let mut state = self.write_state();
        *state = LexicalState::default();
        if self.config.persist_path.exists() {
            if let Err(e) = fs::remove_file(&self.config.persist_path) {
                warn!(error = %e, "failed to remove persisted lexical index");
            }
        }
        info!("lexical index cleared");
    }

    /// Forces a write regardless of the debounce counter.
    pub fn save(&self) {
        let mut state = self.write_state();
        self.persist(&mut state);
    }

    pub fn corpus_size(&self) -> usize {
        self.read_state().corpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.corpus_size() == 0
    }

    pub fn stats(&self) -> LexicalStats {
        let state = self.read_state();
        LexicalStats {
            corpus_size: state.corpus.len(),
            index_built: state.model.is_some(),
            persist_path: self.config.persist_path.to_string_lossy().to_string(),
            pending_changes: state.changes_since_save,
        }
    }

    fn rebuild(state: &mut LexicalState) {
        if state.corpus.is_empty() {
            state.model = None;
            return;
        }
        let tokenized: Vec<&[String]> =
            state.corpus.iter().map(|entry| entry.tokens.as_slice()).collect();
        state.model = Some(Bm25Model::build(&tokenized));
    }

    /// Best-effort durable write. On failure the in-memory state stays
    /// authoritative and the unchanged counter retries at the next debounce
    /// point.
    fn persist(&self, state: &mut LexicalState) {
        if state.corpus.is_empty() {
            return;
        }
        match self.write_file(state) {
            Ok(()) => {
                state.changes_since_save = 0;
                info!(
                    path = %self.config.persist_path.display(),
                    documents = state.corpus.len(),
                    "lexical index saved"
                );
            }
            Err(e) => {
                warn!(error = %e, "failed to persist lexical index; in-memory state kept");
            }
        }
    }

    fn write_file(&self, state: &LexicalState) -> finrag_core::error::Result<()> {
        if let Some(parent) = self.config.persist_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| Error::Persistence(e.to_string()))?;
            }
        }
        let data = PersistedIndex {
            version: FORMAT_VERSION.to_string(),
            corpus_size: state.corpus.len(),
            documents: state
                .corpus
                .iter()
                .map(|entry| PersistedDocument {
                    doc_id: entry.doc_id.clone(),
                    page_content: entry.content.clone(),
                    metadata: entry.metadata.clone(),
                })
                .collect(),
        };
        let json = serde_json::to_string(&data).map_err(|e| Error::Persistence(e.to_string()))?;
        fs::write(&self.config.persist_path, json)
            .map_err(|e| Error::Persistence(e.to_string()))?;
        Ok(())
    }

    fn load(&self) {
        if !self.config.persist_path.exists() {
            debug!("no persisted lexical index; starting empty");
            return;
        }

        let parsed: anyhow::Result<PersistedIndex> = fs::read_to_string(&self.config.persist_path)
            .map_err(anyhow::Error::from)
            .and_then(|raw| serde_json::from_str(&raw).map_err(anyhow::Error::from));

        match parsed {
            Ok(data) => {
                let mut state = self.write_state();
                for doc in data.documents {
                    let tokens = tokenize(&doc.page_content);
                    if tokens.is_empty() {
                        continue;
                    }
                    if !state.indexed_ids.insert(doc.doc_id.clone()) {
                        continue;
                    }
                    state.corpus.push(CorpusEntry {
                        doc_id: doc.doc_id,
                        content: doc.page_content,
                        metadata: doc.metadata,
                        tokens,
                    });
                }
                Self::rebuild(&mut state);
                info!(
                    path = %self.config.persist_path.display(),
                    documents = state.corpus.len(),
                    "lexical index loaded"
                );
            }
            Err(e) => {
                warn!(error = %e, "failed to load lexical index; starting empty");
            }
        }
    }
}
