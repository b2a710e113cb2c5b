//! Sub-pixel peak refinement.

pub mod quad1d;
pub mod quad2d;

pub use quad2d::refine_peak;
