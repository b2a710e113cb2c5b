//! Error types for movalign.

use thiserror::Error;

/// Result alias for movalign operations.
pub type MovAlignResult<T> = std::result::Result<T, MovAlignError>;

/// Errors that can occur while aligning a movie.
///
/// Every variant is fatal for the run that produced it; the engine has no
/// partial-result recovery path.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MovAlignError {
    /// A buffer shape has a zero extent or overflows `usize`.
    #[error("invalid dimensions {x} * {y} * {z} * {n}")]
    InvalidDimensions {
        x: usize,
        y: usize,
        z: usize,
        n: usize,
    },
    /// A configuration value is out of range or inconsistent.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
    /// A caller-provided buffer is shorter than required.
    #[error("buffer too small: needed {needed}, got {got}")]
    BufferTooSmall { needed: usize, got: usize },
    /// An index is outside the valid range.
    #[error("{context} index {index} out of bounds (len {len})")]
    IndexOutOfBounds {
        index: usize,
        len: usize,
        context: &'static str,
    },
    /// The spline control grid is not strictly smaller than the patch grid.
    #[error(
        "more control points ({control_x} x {control_y}) than patches ({patches_x} x {patches_y})"
    )]
    ControlPointsExceedPatches {
        control_x: usize,
        control_y: usize,
        patches_x: usize,
        patches_y: usize,
    },
    /// The usable movie area cannot hold a single patch.
    #[error("movie ({movie_x} x {movie_y}) is too small for patches of {patch_x} x {patch_y}")]
    MovieTooSmall {
        movie_x: usize,
        movie_y: usize,
        patch_x: usize,
        patch_y: usize,
    },
    /// No transform shape fits the available device memory.
    #[error("insufficient device memory: {context}")]
    OutOfMemory { context: &'static str },
    /// Resampling was requested without a fitted spline model.
    #[error("missing B-spline representation of the local alignment")]
    MissingSplineModel,
    /// A movie frame was accessed before it was loaded.
    #[error("frame {index} is not loaded")]
    FrameNotLoaded { index: usize },
    /// The FFT backend rejected an input.
    #[error("fft failure: {reason}")]
    Fft { reason: String },
    /// The benchmark cache could not be read or written.
    #[error("settings store failure: {reason}")]
    SettingsStore { reason: String },
    /// Image decoding or encoding failed.
    #[error("image io failure: {reason}")]
    ImageIo { reason: String },
    /// The named worker pool could not be started.
    #[error("cannot start the {pool} pool: {reason}")]
    ThreadPool { pool: &'static str, reason: String },
}

impl MovAlignError {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        MovAlignError::InvalidConfig {
            reason: reason.into(),
        }
    }
}
