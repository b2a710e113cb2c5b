//! Shared utility helpers.

pub mod error;
pub(crate) mod math;
pub mod real;
#[cfg(feature = "simd")]
pub(crate) mod simd;
pub mod threads;

pub use error::{MovAlignError, MovAlignResult};
pub use math::center_size;
pub use real::Real;
pub use threads::build_pool;
