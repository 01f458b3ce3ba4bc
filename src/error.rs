use thiserror::Error;

/// Failures surfaced by the numeric core.
///
/// Precondition violations indicate a caller or configuration bug and are
/// never recoverable by retrying; they are returned eagerly instead of
/// panicking so the demo layer can report them.
#[derive(Debug, Error)]
pub enum DeconvolveError {
    /// Two grids that must share a shape do not.
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    /// A subproblem/axis index outside `[0, rank)`.
    #[error("axis {axis} out of range for rank {rank}")]
    AxisOutOfRange { axis: usize, rank: usize },

    /// Grid rank outside the supported `1..={max}` window.
    #[error("unsupported rank {rank}, expected 1..={max}")]
    UnsupportedRank { rank: usize, max: usize },

    /// Message passing was invoked before `sample_labels` populated the
    /// label table.
    #[error("label table is empty, call sample_labels before message passing")]
    LabelsNotSampled,

    /// Method name outside the closed solver set.
    #[error("unknown optimization method `{0}`")]
    UnknownMethod(String),

    /// A numeric parameter outside its valid range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
}

pub type Result<T> = std::result::Result<T, DeconvolveError>;
