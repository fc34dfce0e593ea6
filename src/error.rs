use thiserror::Error;

/// Errors surfaced by the analyzer core.
///
/// Backpressure drops are not errors and never appear here.
#[derive(Debug, Error)]
pub enum Error {
    /// Selection index outside `[0, len)`. No state was changed.
    #[error("pipeline index {index} out of range (registry has {len} entries)")]
    InvalidPipelineIndex { index: usize, len: usize },

    /// The factory or warm-up of a registry entry failed. No state was changed.
    #[error("failed to initialize pipeline '{name}': {source}")]
    PipelineInit {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// The camera provider refused the session (conflict, unsupported config).
    #[error("camera binding failed: {0}")]
    BindingFailure(String),

    /// A pipeline returned an error or panicked inside `analyze`.
    #[error("pipeline '{pipeline}' failed to analyze frame: {reason}")]
    AnalysisFailure { pipeline: String, reason: String },

    #[error("analyzer is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, Error>;
