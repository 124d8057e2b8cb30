//! finrag-engine
//!
//! The public face of the retrieval engine: Reciprocal Rank Fusion over the
//! lexical and vector rankings, plus the orchestrator that sequences
//! chunking, indexing, fusion, reranking and context assembly.

pub mod fusion;
pub mod retriever;

pub use fusion::{reciprocal_rank_fusion, DEFAULT_RRF_K};
pub use retriever::{
    ConfigUpdate, EngineStats, IndexOutcome, RetrievalConfig, RetrievalOutcome, RetrieveOptions,
    Retriever, NO_MATCH_CONTEXT,
};
