//! Buffer shapes and FFT processing settings.
//!
//! [`Dimensions`] is the 4-D extent `(x, y, z, n)` of a buffer: `x` is the
//! fastest axis, `n` counts independent items (frames, or frame pairs for
//! correlations). [`FftSettings`] pairs a spatial shape with its
//! real-to-complex frequency shape and a batch size used to chunk `n`.

use crate::util::{MovAlignError, MovAlignResult};
use rustfft::num_complex::Complex;
use std::fmt;
use std::mem::size_of;

/// Immutable 4-D buffer extent. All fields are non-zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Dimensions {
    x: usize,
    y: usize,
    z: usize,
    n: usize,
}

impl Dimensions {
    /// Creates a shape, rejecting zero extents and overflowing sizes.
    pub fn new(x: usize, y: usize, z: usize, n: usize) -> MovAlignResult<Self> {
        let invalid = MovAlignError::InvalidDimensions { x, y, z, n };
        if x == 0 || y == 0 || z == 0 || n == 0 {
            return Err(invalid);
        }
        x.checked_mul(y)
            .and_then(|v| v.checked_mul(z))
            .and_then(|v| v.checked_mul(n))
            .ok_or(invalid)?;
        Ok(Self { x, y, z, n })
    }

    /// Shape of `n` 2-D frames of `x * y` pixels.
    pub fn frames(x: usize, y: usize, n: usize) -> MovAlignResult<Self> {
        Self::new(x, y, 1, n)
    }

    pub fn x(&self) -> usize {
        self.x
    }

    pub fn y(&self) -> usize {
        self.y
    }

    pub fn z(&self) -> usize {
        self.z
    }

    pub fn n(&self) -> usize {
        self.n
    }

    /// Total number of elements, `x * y * z * n`.
    pub fn size(&self) -> usize {
        self.x * self.y * self.z * self.n
    }

    /// Number of elements in one item, `x * y * z`.
    pub fn size_single(&self) -> usize {
        self.x * self.y * self.z
    }

    /// Number of elements in one 2-D plane.
    pub fn xy(&self) -> usize {
        self.x * self.y
    }

    /// Same spatial extent with a different item count.
    pub fn copy_for_n(&self, n: usize) -> MovAlignResult<Self> {
        Self::new(self.x, self.y, self.z, n)
    }

    /// Same spatial extent with a single item.
    pub fn create_single(&self) -> Self {
        Self { n: 1, ..*self }
    }

    pub fn is_square(&self) -> bool {
        self.x == self.y
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} * {} * {} * {}", self.x, self.y, self.z, self.n)
    }
}

/// Spatial shape, derived frequency shape and batch size of a transform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FftSettings {
    s_dim: Dimensions,
    f_dim: Dimensions,
    batch: usize,
}

impl FftSettings {
    /// Creates settings for a real-to-complex transform of `s_dim`.
    ///
    /// `batch` must lie in `1..=n`.
    pub fn new(s_dim: Dimensions, batch: usize) -> MovAlignResult<Self> {
        if batch == 0 || batch > s_dim.n() {
            return Err(MovAlignError::config(format!(
                "batch {batch} must be in 1..={}",
                s_dim.n()
            )));
        }
        let f_dim = Dimensions::new(s_dim.x() / 2 + 1, s_dim.y(), s_dim.z(), s_dim.n())?;
        Ok(Self {
            s_dim,
            f_dim,
            batch,
        })
    }

    /// Settings that process every item in a single batch.
    pub fn whole(s_dim: Dimensions) -> MovAlignResult<Self> {
        Self::new(s_dim, s_dim.n())
    }

    /// Spatial (real) shape.
    pub fn s_dim(&self) -> Dimensions {
        self.s_dim
    }

    /// Frequency (complex, half-spectrum) shape.
    pub fn f_dim(&self) -> Dimensions {
        self.f_dim
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    /// Number of batches needed to process all items, `ceil(n / batch)`.
    pub fn batch_count(&self) -> usize {
        self.s_dim.n().div_ceil(self.batch)
    }

    /// Settings for a single batch of items.
    pub fn create_batch(&self) -> Self {
        let s_dim = Dimensions {
            n: self.batch,
            ..self.s_dim
        };
        let f_dim = Dimensions {
            n: self.batch,
            ..self.f_dim
        };
        Self {
            s_dim,
            f_dim,
            batch: self.batch,
        }
    }

    /// Same shape with another item count; the batch is clamped to it.
    pub fn copy_for_n(&self, n: usize) -> MovAlignResult<Self> {
        let s_dim = self.s_dim.copy_for_n(n)?;
        Self::new(s_dim, self.batch.min(n))
    }

    /// Same shape and item count with another batch size.
    pub fn copy_for_batch(&self, batch: usize) -> MovAlignResult<Self> {
        Self::new(self.s_dim, batch)
    }

    /// Bytes of all spatial items with element type `T`.
    pub fn s_bytes<T>(&self) -> usize {
        self.s_dim.size() * size_of::<T>()
    }

    /// Bytes of one batch of spatial items.
    pub fn s_bytes_batch<T>(&self) -> usize {
        self.s_dim.size_single() * self.batch * size_of::<T>()
    }

    /// Bytes of all frequency items.
    pub fn f_bytes<T>(&self) -> usize {
        self.f_dim.size() * size_of::<Complex<T>>()
    }

    /// Bytes of one batch of frequency items.
    pub fn f_bytes_batch<T>(&self) -> usize {
        self.f_dim.size_single() * self.batch * size_of::<Complex<T>>()
    }

    /// Bytes of a single frequency item.
    pub fn f_bytes_single<T>(&self) -> usize {
        self.f_dim.size_single() * size_of::<Complex<T>>()
    }
}

impl fmt::Display for FftSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "spatial {} | frequency {} | batch {}",
            self.s_dim, self.f_dim, self.batch
        )
    }
}
