//! Alignment run configuration.

use crate::local::ControlPoints;
use crate::util::{MovAlignError, MovAlignResult};

/// Patch-based alignment settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocalConfig {
    /// Requested patch size in pixels; the transform search may enlarge it.
    pub patch_size: (usize, usize),
    /// Patch grid; `None` covers the movie once per axis.
    pub patches: Option<(usize, usize)>,
    /// Spline control points in `x`, `y` and time.
    pub control_points: ControlPoints,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            patch_size: (500, 500),
            patches: None,
            control_points: ControlPoints::default(),
        }
    }
}

/// Parameters of a full alignment run.
#[derive(Clone, Debug, PartialEq)]
pub struct AlignConfig {
    /// Maximal expected shift between two frames, in pixels.
    pub max_shift: usize,
    /// Pixel size in Å.
    pub sampling_rate: f64,
    /// Resolution (Å) beyond which correlations are low-pass filtered.
    pub max_resolution: f64,
    /// First movie frame to align.
    pub first_frame: usize,
    /// Last movie frame to align (inclusive); `None` means the last frame.
    pub last_frame: Option<usize>,
    /// First movie frame to sum; defaults to `first_frame`.
    pub first_sum: Option<usize>,
    /// Last movie frame to sum (inclusive); defaults to the last aligned frame.
    pub last_sum: Option<usize>,
    /// Frames averaged together when extracting patches.
    pub patches_avg: usize,
    /// Use the requested transform shapes and only search the batch size.
    pub skip_autotuning: bool,
    /// Outlier-rejection rounds of the least-squares solvers.
    pub solver_iterations: usize,
    /// Output binning factor; values `<= 1` disable binning.
    pub output_binning: f64,
    pub compute_initial: bool,
    pub compute_aligned: bool,
    /// Local alignment; `None` aligns globally only.
    pub local: Option<LocalConfig>,
    /// Loader threads; `0` uses twice the number of device streams.
    pub cpu_threads: usize,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            max_shift: 40,
            sampling_rate: 1.0,
            max_resolution: 30.0,
            first_frame: 0,
            last_frame: None,
            first_sum: None,
            last_sum: None,
            patches_avg: 3,
            skip_autotuning: false,
            solver_iterations: 20,
            output_binning: 1.0,
            compute_initial: false,
            compute_aligned: true,
            local: Some(LocalConfig::default()),
            cpu_threads: 0,
        }
    }
}

/// Frame ranges resolved against a movie of known length.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameRanges {
    pub first: usize,
    pub last: usize,
    pub first_sum: usize,
    pub last_sum: usize,
}

impl FrameRanges {
    /// Number of aligned frames.
    pub fn aligned(&self) -> usize {
        self.last - self.first + 1
    }
}

impl AlignConfig {
    /// Checks values that do not depend on the movie.
    pub fn validate(&self) -> MovAlignResult<()> {
        if self.max_shift == 0 {
            return Err(MovAlignError::config("max_shift must be positive"));
        }
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(self.sampling_rate) || !positive(self.max_resolution) {
            return Err(MovAlignError::config(
                "sampling_rate and max_resolution must be positive",
            ));
        }
        if self.patches_avg == 0 {
            return Err(MovAlignError::config("patches_avg must be at least one"));
        }
        if !self.output_binning.is_finite() {
            return Err(MovAlignError::config("output_binning must be finite"));
        }
        if !self.compute_initial && !self.compute_aligned {
            return Err(MovAlignError::config(
                "neither the initial nor the aligned average is requested",
            ));
        }
        if let Some(local) = &self.local {
            let (px, py) = local.patch_size;
            if px == 0 || py == 0 {
                return Err(MovAlignError::config("patch size must be positive"));
            }
            let c = local.control_points;
            if c.x < 3 || c.y < 3 || c.t < 3 {
                return Err(MovAlignError::config(
                    "at least three control points per axis are required",
                ));
            }
            if let Some((nx, ny)) = local.patches {
                if nx <= c.x || ny <= c.y {
                    return Err(MovAlignError::ControlPointsExceedPatches {
                        control_x: c.x,
                        control_y: c.y,
                        patches_x: nx,
                        patches_y: ny,
                    });
                }
            }
        }
        if let (Some(first), Some(last)) = (self.first_sum, self.last_sum) {
            if last < first {
                return Err(MovAlignError::config("last_sum precedes first_sum"));
            }
        }
        Ok(())
    }

    /// Correlation scale `min(1, 2 * sampling_rate / max_resolution)`.
    pub fn scale_factor(&self) -> f64 {
        (2.0 * self.sampling_rate / self.max_resolution).min(1.0)
    }

    /// Resolves the alignment and summation ranges for a movie of
    /// `frame_count` frames.
    pub fn frame_ranges(&self, frame_count: usize) -> MovAlignResult<FrameRanges> {
        if frame_count == 0 {
            return Err(MovAlignError::config("movie has no frames"));
        }
        let last = self.last_frame.unwrap_or(frame_count - 1);
        if last >= frame_count || self.first_frame > last {
            return Err(MovAlignError::config(format!(
                "frame range {}..={last} does not fit a movie of {frame_count} frames",
                self.first_frame
            )));
        }
        let first_sum = self.first_sum.unwrap_or(self.first_frame);
        let last_sum = self.last_sum.unwrap_or(last);
        if first_sum < self.first_frame || last_sum > last || first_sum > last_sum {
            return Err(MovAlignError::config(format!(
                "summation range {first_sum}..={last_sum} lies outside the aligned frames {}..={last}",
                self.first_frame
            )));
        }
        Ok(FrameRanges {
            first: self.first_frame,
            last,
            first_sum,
            last_sum,
        })
    }
}
