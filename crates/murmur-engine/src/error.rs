/// Failures surfaced by the delivery engine. Cache trouble never shows up
/// here; it is absorbed inside `murmur-cache`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Absent, or present but not visible to the caller.
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error("storage failure: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
