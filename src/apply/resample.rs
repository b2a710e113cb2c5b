//! Frame resampling: bilinear warping and Fourier binning.

use crate::fft::{crop_spectrum, FftProvider};
use crate::frame::FrameView;
use crate::memory::{BufferPool, MemKind};
use crate::shift::Shift;
use crate::util::{MovAlignError, MovAlignResult, Real};
use rustfft::num_complex::Complex;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Bilinear sample of `view` at `(x, y)` with edge clamping.
#[inline]
pub fn sample_bilinear<T: Real>(view: &FrameView<'_, T>, x: f64, y: f64) -> T {
    let fx0 = x.floor();
    let fy0 = y.floor();
    let (tx, ty) = (x - fx0, y - fy0);
    let (ix, iy) = (fx0 as i64, fy0 as i64);
    let v00 = view.get_clamped(ix, iy).as_f64();
    let v10 = view.get_clamped(ix + 1, iy).as_f64();
    let v01 = view.get_clamped(ix, iy + 1).as_f64();
    let v11 = view.get_clamped(ix + 1, iy + 1).as_f64();
    let top = v00 + (v10 - v00) * tx;
    let bottom = v01 + (v11 - v01) * tx;
    T::cast(top + (bottom - top) * ty)
}

/// Writes `out(p) = src(p + field(p))` for every pixel of `src`.
pub fn warp_frame<T: Real>(
    src: &FrameView<'_, T>,
    field: &[Shift],
    out: &mut [T],
) -> MovAlignResult<()> {
    let (w, h) = (src.width(), src.height());
    if field.len() != w * h || out.len() < w * h {
        return Err(MovAlignError::BufferTooSmall {
            needed: w * h,
            got: field.len().min(out.len()),
        });
    }
    let row = |(y, dst): (usize, &mut [T])| {
        for (x, value) in dst.iter_mut().enumerate() {
            let s = field[y * w + x];
            *value = sample_bilinear(src, x as f64 + s.x, y as f64 + s.y);
        }
    };
    #[cfg(feature = "parallel")]
    out[..w * h].par_chunks_exact_mut(w).enumerate().for_each(row);
    #[cfg(not(feature = "parallel"))]
    out[..w * h].chunks_exact_mut(w).enumerate().for_each(row);
    Ok(())
}

/// Output size of a `len` axis binned by `binning` (no binning when `<= 1`).
pub fn binned_len(len: usize, binning: f64) -> usize {
    if binning > 1.0 {
        ((len as f64 / binning).floor() as usize).max(1)
    } else {
        len
    }
}

/// Resizes a frame by cropping (or zero-padding) its spectrum; the mean
/// intensity is preserved.
#[allow(clippy::too_many_arguments)]
pub fn scale_to_size_fourier<T: Real>(
    fft: &dyn FftProvider<T>,
    pool: &BufferPool,
    src: &[T],
    width: usize,
    height: usize,
    new_width: usize,
    new_height: usize,
    out: &mut [T],
) -> MovAlignResult<()> {
    if out.len() < new_width * new_height {
        return Err(MovAlignError::BufferTooSmall {
            needed: new_width * new_height,
            got: out.len(),
        });
    }
    let mut spectrum = pool.acquire::<Complex<T>>(MemKind::Device, (width / 2 + 1) * height);
    let mut cropped =
        pool.acquire::<Complex<T>>(MemKind::Device, (new_width / 2 + 1) * new_height);
    fft.forward(width, height, src, &mut spectrum)?;
    let scale = T::cast((new_width * new_height) as f64 / (width * height) as f64);
    crop_spectrum(
        &spectrum, width, height, &mut cropped, new_width, new_height, None, scale,
    );
    fft.inverse(
        new_width,
        new_height,
        &mut cropped,
        &mut out[..new_width * new_height],
    )
}
