//! finrag-vector
//!
//! Thin async wrapper around a LanceDB table holding passage embeddings and
//! metadata. Embeddings come from the external embedding oracle; this crate
//! only moves vectors in and out of the store.

pub mod schema;
pub mod store;

pub use store::{VectorIndex, VectorStats};
