//! 统一错误类型：按调用方可采取的动作划分，而不是按出错位置划分。
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LivebindError {
    /// The provider behind a proxy was revoked; retry or drop the reference.
    #[error("service is unavailable")]
    Unavailable,

    /// The collection already presents a different member shape.
    #[error("configuration conflict: {0}")]
    ConfigurationConflict(String),

    /// Building or resolving one provider failed. Never aborts other providers.
    #[error("failed to resolve provider {service}: {reason}")]
    ProviderResolution { service: u64, reason: String },

    #[error("unsupported operation: {0} (this collection is read only)")]
    UnsupportedOperation(&'static str),

    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("invalid tracker state: {0}")]
    InvalidState(&'static str),

    #[error("no ordering registered under `{0}`")]
    UnknownOrdering(String),
}

pub type Result<T = (), E = LivebindError> = std::result::Result<T, E>;
