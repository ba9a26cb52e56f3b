//! Error types for fused nearest-neighbor dispatch.
//!
//! Every failure is a dispatch-step failure: configuration, geometry or
//! argument shapes. The kernel itself never errors; out-of-range accesses
//! are handled by zero padding and sentinel substitution.

use thiserror::Error;

/// Result type alias for fused nearest-neighbor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by the dispatcher and its configuration layer.
#[derive(Error, Debug)]
pub enum Error {
    /// Tiling parameters do not yield integral per-worker load counts
    /// or violate the lane-group constraints (FNN-001).
    #[error("[FNN-001] Invalid tile configuration: {0}")]
    InvalidTileConfig(String),

    /// The requested geometry needs more scratch than the budget allows (FNN-002).
    #[error("[FNN-002] Scratch budget exceeded: geometry needs {required} bytes, budget is {budget} bytes")]
    ScratchExceeded {
        /// Bytes of scratch the geometry requires.
        required: usize,
        /// Configured scratch budget in bytes.
        budget: usize,
    },

    /// Matrix, norm, output or lock buffer shapes disagree (FNN-003).
    #[error("[FNN-003] Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A configuration value is out of range or unsupported (FNN-004).
    #[error("[FNN-004] Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The execution queue could not be created or a step failed (FNN-005).
    #[error("[FNN-005] Dispatch error: {0}")]
    Dispatch(String),

    /// Layered configuration could not be extracted (FNN-006).
    #[error("[FNN-006] Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration could not be rendered (FNN-007).
    #[error("[FNN-007] Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Returns the stable error code (e.g. `FNN-003`).
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidTileConfig(_) => "FNN-001",
            Self::ScratchExceeded { .. } => "FNN-002",
            Self::ShapeMismatch(_) => "FNN-003",
            Self::InvalidConfig(_) => "FNN-004",
            Self::Dispatch(_) => "FNN-005",
            Self::Config(_) => "FNN-006",
            Self::Serialization(_) => "FNN-007",
        }
    }

    /// Returns true for errors caused by the caller's tiling or budget choice
    /// rather than by the shapes of the data.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidTileConfig(_)
                | Self::ScratchExceeded { .. }
                | Self::InvalidConfig(_)
                | Self::Config(_)
        )
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<rayon::ThreadPoolBuildError> for Error {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        Self::Dispatch(err.to_string())
    }
}
