//! Error types for the parts of Strand that can fail outside a side effect's
//! own failure channel.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// `TokioExecutor::current` was called outside a tokio runtime.
    #[error("no tokio runtime is running on this thread")]
    NoRuntime,

    #[error("invalid store configuration: {0}")]
    InvalidConfig(#[from] serde_json::Error),
}
