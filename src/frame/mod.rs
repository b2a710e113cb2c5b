//! Borrowed 2-D frame views.
//!
//! `FrameView` is a borrowed 2D view into a 1D buffer with an explicit stride.
//! The stride counts elements between the starts of consecutive rows, so a
//! stride larger than the width describes a crop of a wider frame. ROI views
//! are zero-copy and keep the original stride.

use crate::util::{MovAlignError, MovAlignResult};

#[cfg(feature = "image-io")]
pub mod io;

/// Borrowed 2D frame view with an explicit stride.
#[derive(Copy, Clone, Debug)]
pub struct FrameView<'a, T> {
    data: &'a [T],
    width: usize,
    height: usize,
    stride: usize,
}

impl<'a, T: Copy> FrameView<'a, T> {
    /// Creates a contiguous view with `stride == width`.
    pub fn from_slice(data: &'a [T], width: usize, height: usize) -> MovAlignResult<Self> {
        Self::new(data, width, height, width)
    }

    /// Creates a view with an explicit stride.
    pub fn new(data: &'a [T], width: usize, height: usize, stride: usize) -> MovAlignResult<Self> {
        let needed = required_len(width, height, stride)?;
        if data.len() < needed {
            return Err(MovAlignError::BufferTooSmall {
                needed,
                got: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            stride,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Returns the pixel at `(x, y)` if it is within bounds.
    pub fn get(&self, x: usize, y: usize) -> Option<T> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data.get(y * self.stride + x).copied()
    }

    /// Returns the pixel at `(x, y)` with coordinates clamped to the frame.
    #[inline]
    pub fn get_clamped(&self, x: i64, y: i64) -> T {
        let cx = x.clamp(0, self.width as i64 - 1) as usize;
        let cy = y.clamp(0, self.height as i64 - 1) as usize;
        self.data[cy * self.stride + cx]
    }

    /// Returns row `y` (exactly `width` elements).
    pub fn row(&self, y: usize) -> Option<&'a [T]> {
        if y >= self.height {
            return None;
        }
        let start = y * self.stride;
        self.data.get(start..start + self.width)
    }

    /// Returns a zero-copy view of the rectangle `(x, y, width, height)`.
    pub fn roi(
        &self,
        x: usize,
        y: usize,
        width: usize,
        height: usize,
    ) -> MovAlignResult<FrameView<'a, T>> {
        let end_x = x.checked_add(width);
        let end_y = y.checked_add(height);
        let fits = matches!((end_x, end_y), (Some(ex), Some(ey)) if ex <= self.width && ey <= self.height);
        if !fits {
            return Err(MovAlignError::IndexOutOfBounds {
                index: x.max(y),
                len: self.width.min(self.height),
                context: "roi",
            });
        }
        let start = y * self.stride + x;
        FrameView::new(&self.data[start..], width, height, self.stride)
    }

    /// Copies the view row by row into a contiguous buffer.
    pub fn copy_into(&self, out: &mut [T]) -> MovAlignResult<()> {
        let needed = self.width * self.height;
        if out.len() < needed {
            return Err(MovAlignError::BufferTooSmall {
                needed,
                got: out.len(),
            });
        }
        for (y, dst) in out.chunks_exact_mut(self.width).take(self.height).enumerate() {
            let start = y * self.stride;
            dst.copy_from_slice(&self.data[start..start + self.width]);
        }
        Ok(())
    }
}

fn required_len(width: usize, height: usize, stride: usize) -> MovAlignResult<usize> {
    if width == 0 || height == 0 {
        return Err(MovAlignError::InvalidDimensions {
            x: width,
            y: height,
            z: 1,
            n: 1,
        });
    }
    if stride < width {
        return Err(MovAlignError::config(format!(
            "stride {stride} is smaller than width {width}"
        )));
    }
    (height - 1)
        .checked_mul(stride)
        .and_then(|v| v.checked_add(width))
        .ok_or(MovAlignError::InvalidDimensions {
            x: width,
            y: height,
            z: 1,
            n: 1,
        })
}
