//! Fourier downscaling and pairwise cross-correlation of frame stacks.
//!
//! [`CorrelationEngine::perform_fft_and_scale`] turns spatial frames into
//! low-pass filtered half spectra at correlation resolution.
//! [`CorrelationEngine::compute_correlations`] correlates every unique pair
//! of those spectra and keeps only the `center_size x center_size` window
//! around zero shift, written at [`pair_index`] in the output.
//!
//! The correlation of frames `i` and `j` is `IFFT(conj(F_i) * F_j)`; its peak
//! sits at the displacement of frame `j` relative to frame `i`.

mod filter;
mod pairs;

pub use filter::{cutoff_frequency, low_pass_filter, max_filter_bytes, MAX_CUTOFF};
pub use pairs::{pair_count, pair_index, pairs};

use crate::fft::{crop_spectrum, FftProvider};
use crate::memory::{BufferPool, MemKind};
use crate::trace::trace_span;
use crate::util::{MovAlignError, MovAlignResult, Real};
use rustfft::num_complex::Complex;
use std::sync::Arc;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Spatial extent of a stack of frames or correlations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaneDims {
    pub width: usize,
    pub height: usize,
}

impl PlaneDims {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bins of the real-to-complex half spectrum.
    pub fn spectrum_len(&self) -> usize {
        (self.width / 2 + 1) * self.height
    }
}

/// Computes scaled spectra and windowed pairwise correlations.
pub struct CorrelationEngine<T: Real> {
    fft: Arc<dyn FftProvider<T>>,
    pool: BufferPool,
}

impl<T: Real> CorrelationEngine<T> {
    pub fn new(fft: Arc<dyn FftProvider<T>>, pool: BufferPool) -> Self {
        Self { fft, pool }
    }

    /// Forward-transforms every frame of `frames`, crops the spectrum to
    /// `output_dims`, applies `filter` and normalizes by the input pixel
    /// count. `output` receives one half spectrum per frame.
    pub fn perform_fft_and_scale(
        &self,
        frames: &[T],
        input_dims: PlaneDims,
        output: &mut [Complex<T>],
        output_dims: PlaneDims,
        filter: &[T],
    ) -> MovAlignResult<()> {
        let in_spec = input_dims.spectrum_len();
        let out_spec = output_dims.spectrum_len();
        if input_dims.is_empty() || frames.len() % input_dims.len() != 0 {
            return Err(MovAlignError::config(
                "frame buffer is not a whole number of frames",
            ));
        }
        if filter.len() != out_spec {
            return Err(MovAlignError::BufferTooSmall {
                needed: out_spec,
                got: filter.len(),
            });
        }
        let count = frames.len() / input_dims.len();
        if output.len() < count * out_spec {
            return Err(MovAlignError::BufferTooSmall {
                needed: count * out_spec,
                got: output.len(),
            });
        }

        let mut spectra = self
            .pool
            .acquire::<Complex<T>>(MemKind::Device, count * in_spec);
        self.fft
            .forward(input_dims.width, input_dims.height, frames, &mut spectra)?;
        let scale = T::one() / T::cast(input_dims.len() as f64);
        for (src, dst) in spectra
            .chunks_exact(in_spec)
            .zip(output.chunks_exact_mut(out_spec))
        {
            crop_spectrum(
                src,
                input_dims.width,
                input_dims.height,
                dst,
                output_dims.width,
                output_dims.height,
                Some(filter),
                scale,
            );
        }
        Ok(())
    }

    /// Correlates every pair of the `n` spectra in `spectra` (each of
    /// spatial size `dims`) and stores the central windows in `output`.
    ///
    /// At most `frames_in_buffer` spectra are staged in working memory at a
    /// time (two blocks of half that size), and at most `batch` pairs are
    /// inverse-transformed together.
    #[allow(clippy::too_many_arguments)]
    pub fn compute_correlations(
        &self,
        center_size: usize,
        n: usize,
        spectra: &[Complex<T>],
        dims: PlaneDims,
        frames_in_buffer: usize,
        batch: usize,
        output: &mut [T],
    ) -> MovAlignResult<()> {
        let _span = trace_span!("compute_correlations", frames = n, center = center_size).entered();
        if center_size == 0 || center_size > dims.width || center_size > dims.height {
            return Err(MovAlignError::config(format!(
                "correlation window {center_size} does not fit {} x {}",
                dims.width, dims.height
            )));
        }
        let spec_len = dims.spectrum_len();
        if spectra.len() < n * spec_len {
            return Err(MovAlignError::BufferTooSmall {
                needed: n * spec_len,
                got: spectra.len(),
            });
        }
        let window = center_size * center_size;
        if output.len() < pair_count(n) * window {
            return Err(MovAlignError::BufferTooSmall {
                needed: pair_count(n) * window,
                got: output.len(),
            });
        }
        if n < 2 {
            return Ok(());
        }

        let block = (frames_in_buffer / 2).max(1).min(n);
        let batch = batch.max(1);
        let mut first = self.pool.acquire::<Complex<T>>(MemKind::Device, block * spec_len);
        let mut second = self.pool.acquire::<Complex<T>>(MemKind::Device, block * spec_len);
        let mut work = Workspace {
            products: self.pool.acquire::<Complex<T>>(MemKind::Device, batch * spec_len),
            planes: self.pool.acquire::<T>(MemKind::Device, batch * dims.len()),
            dims,
            center_size,
            n,
        };

        let stage = |dst: &mut [Complex<T>], start: usize| -> usize {
            let count = block.min(n - start);
            dst[..count * spec_len]
                .copy_from_slice(&spectra[start * spec_len..(start + count) * spec_len]);
            count
        };

        let mut pending = Vec::with_capacity(batch);
        for i0 in (0..n).step_by(block) {
            let count_i = stage(&mut first, i0);
            for i in i0..i0 + count_i {
                for j in i + 1..i0 + count_i {
                    pending.push((i, j));
                }
            }
            self.flush_pairs(&mut pending, &first, i0, &first, i0, batch, &mut work, output)?;

            for j0 in (i0 + block..n).step_by(block) {
                let count_j = stage(&mut second, j0);
                for i in i0..i0 + count_i {
                    for j in j0..j0 + count_j {
                        pending.push((i, j));
                    }
                }
                self.flush_pairs(&mut pending, &first, i0, &second, j0, batch, &mut work, output)?;
            }
        }
        Ok(())
    }

    /// Correlates `pending` pairs whose first frame is staged in `a` (from
    /// frame `a_start`) and second in `b` (from frame `b_start`).
    #[allow(clippy::too_many_arguments)]
    fn flush_pairs(
        &self,
        pending: &mut Vec<(usize, usize)>,
        a: &[Complex<T>],
        a_start: usize,
        b: &[Complex<T>],
        b_start: usize,
        batch: usize,
        work: &mut Workspace<T>,
        output: &mut [T],
    ) -> MovAlignResult<()> {
        let dims = work.dims;
        let spec_len = dims.spectrum_len();
        let window = work.center_size * work.center_size;
        for chunk in pending.chunks(batch) {
            let count = chunk.len();
            let products = &mut work.products[..count * spec_len];
            let cross = |(dst, &(i, j)): (&mut [Complex<T>], &(usize, usize))| {
                let fi = &a[(i - a_start) * spec_len..(i - a_start + 1) * spec_len];
                let fj = &b[(j - b_start) * spec_len..(j - b_start + 1) * spec_len];
                for ((d, x), y) in dst.iter_mut().zip(fi).zip(fj) {
                    *d = x.conj() * y;
                }
            };
            #[cfg(feature = "parallel")]
            products
                .par_chunks_exact_mut(spec_len)
                .zip(chunk.par_iter())
                .for_each(cross);
            #[cfg(not(feature = "parallel"))]
            products
                .chunks_exact_mut(spec_len)
                .zip(chunk.iter())
                .for_each(cross);

            let planes = &mut work.planes[..count * dims.len()];
            self.fft
                .inverse(dims.width, dims.height, products, planes)?;
            for (plane, &(i, j)) in planes.chunks_exact(dims.len()).zip(chunk) {
                let offset = pair_index(i, j, work.n) * window;
                extract_center(plane, dims, work.center_size, &mut output[offset..offset + window]);
            }
        }
        pending.clear();
        Ok(())
    }
}

struct Workspace<T: Real> {
    products: crate::memory::PooledBuffer<Complex<T>>,
    planes: crate::memory::PooledBuffer<T>,
    dims: PlaneDims,
    center_size: usize,
    n: usize,
}

/// Copies the `size x size` window centred on zero shift out of a full
/// (unshifted) correlation plane. Window element `(wx, wy)` holds the value
/// for displacement `(wx - size / 2, wy - size / 2)`.
pub fn extract_center<T: Copy>(plane: &[T], dims: PlaneDims, size: usize, window: &mut [T]) {
    let half = (size / 2) as i64;
    for (wy, row) in window.chunks_exact_mut(size).take(size).enumerate() {
        let sy = (wy as i64 - half).rem_euclid(dims.height as i64) as usize;
        let src = &plane[sy * dims.width..(sy + 1) * dims.width];
        for (wx, value) in row.iter_mut().enumerate() {
            let sx = (wx as i64 - half).rem_euclid(dims.width as i64) as usize;
            *value = src[sx];
        }
    }
}
