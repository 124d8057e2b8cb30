use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A required backing store or dependency is missing. The hybrid
    /// pipeline degrades to the remaining index instead of surfacing this.
    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    /// An external scoring oracle (embedding or rerank) failed or timed out.
    #[error("oracle call failed: {0}")]
    Oracle(String),

    /// A durable-storage write failed; in-memory state stays authoritative.
    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("malformed input: {0}")]
    MalformedInput(String),
}

pub type Result<T> = std::result::Result<T, Error>;
