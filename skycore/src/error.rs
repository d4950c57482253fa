use thiserror::Error;

/// Errors raised by sky-table and grouping operations.
///
/// Every fallible operation validates its inputs before touching the table,
/// so a returned error always leaves the table exactly as it was.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SkyError {
    #[error("unknown source '{0}'")]
    UnknownSource(String),

    #[error("unknown patch '{0}'")]
    UnknownPatch(String),

    #[error("duplicate source name '{0}'")]
    DuplicateSource(String),

    #[error("unsupported grouping algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The grid-accelerated grouping path is not compiled in. Internal to
    /// the engine: `group()` falls back to the in-process path instead of
    /// surfacing this.
    #[error("spatial accelerator is not available in this build")]
    AcceleratorUnavailable,
}

pub type SkyResult<T> = Result<T, SkyError>;
