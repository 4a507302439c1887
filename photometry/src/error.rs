//! Error types for the photometry core.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PhotometryError>;

/// Errors raised by the photometry core.
///
/// Configuration and detection errors abort the current operation
/// before any further state is mutated; worker failures surface through
/// the optimization coordinator with no partial results.
#[derive(Debug, Error)]
pub enum PhotometryError {
    /// A numeric parameter was outside its valid domain.
    #[error("invalid parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: f64 },

    /// Mask dilation was asked for more rounds than the runaway cap.
    #[error("mask dilation exceeded {0} iterations")]
    IterationCapExceeded(usize),

    /// Bright-region extraction found a different number of regions
    /// than there are registered stars.
    #[error("detected {regions} bright regions for {stars} stars")]
    DetectionMismatch { regions: usize, stars: usize },

    /// No extracted region contains the star's initial position.
    #[error("no bright region contains star {0}")]
    UnmatchedStar(usize),

    /// Configuration failed pre-flight validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Frame data is missing or inconsistent with the requested
    /// operation.
    #[error("frame data error: {0}")]
    FrameData(String),

    /// An optimization worker reported a fatal error; sibling workers
    /// were cancelled and no optimized values were produced.
    #[error("optimization worker failed: {0}")]
    WorkerFailed(String),
}
