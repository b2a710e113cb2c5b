//! FFT provider abstraction and spectrum helpers.
//!
//! Frames are stored row-major (`x` fastest). A forward transform of a
//! `width x height` frame produces a half spectrum of `(width / 2 + 1) x height`
//! complex bins, also row-major. Inverse transforms are normalized, so
//! `inverse(forward(f)) == f`.

mod cpu;

pub use cpu::CpuFft;

use crate::settings::{Dimensions, FftSettings};
use crate::util::math::{fft_cost, is_fft_friendly, signed_frequency};
use crate::util::{MovAlignResult, Real};
use rustfft::num_complex::Complex;

/// Transform backend used by the correlation engine and the size selector.
pub trait FftProvider<T: Real>: Send + Sync {
    /// Forward real-to-complex transform of every `width x height` frame in
    /// `input` into consecutive half spectra in `output`.
    fn forward(
        &self,
        width: usize,
        height: usize,
        input: &[T],
        output: &mut [Complex<T>],
    ) -> MovAlignResult<()>;

    /// Normalized inverse transform of every half spectrum in `input`.
    ///
    /// `input` is used as scratch and is clobbered.
    fn inverse(
        &self,
        width: usize,
        height: usize,
        input: &mut [Complex<T>],
        output: &mut [T],
    ) -> MovAlignResult<()>;

    /// Bytes of workspace a plan for one batch of `settings` needs.
    fn estimate_plan_bytes(&self, settings: &FftSettings) -> usize;

    /// Total bytes to process one batch: plan, spatial and frequency buffers.
    fn required_bytes(&self, settings: &FftSettings) -> usize {
        self.estimate_plan_bytes(settings)
            + settings.s_bytes_batch::<T>()
            + settings.f_bytes_batch::<T>()
    }

    /// Sizes within `tolerance_percent` of `len` the backend handles well,
    /// best first. With `crop` only sizes `<= len` are offered, otherwise
    /// only sizes `>= len`.
    fn candidate_sizes(&self, len: usize, tolerance_percent: usize, crop: bool) -> Vec<usize> {
        let delta = len * tolerance_percent / 100;
        let (lo, hi) = if crop {
            (len.saturating_sub(delta).max(1), len)
        } else {
            (len, len + delta)
        };
        let mut sizes: Vec<usize> = (lo..=hi).filter(|&n| is_fft_friendly(n)).collect();
        if sizes.is_empty() {
            sizes.push(len);
        }
        // Cropping keeps as much data as it cheaply can; padding only adds work.
        let rank = |n: usize| {
            if crop {
                fft_cost(n) / n as f64
            } else {
                fft_cost(n)
            }
        };
        sizes.sort_by(|a, b| {
            rank(*a)
                .total_cmp(&rank(*b))
                .then_with(|| a.abs_diff(len).cmp(&b.abs_diff(len)))
        });
        sizes
    }

    /// Largest batch of `settings` whose [`FftProvider::required_bytes`] fits
    /// `budget`, or `None` if not even a single item fits.
    fn find_max_batch(&self, settings: &FftSettings, budget: usize) -> Option<FftSettings> {
        let n = settings.s_dim().n();
        let single = settings.copy_for_batch(1).ok()?;
        let per_item = self.required_bytes(&single).max(1);
        let mut batch = (budget / per_item).min(n);
        while batch > 0 {
            let candidate = settings.copy_for_batch(batch).ok()?;
            if self.required_bytes(&candidate) <= budget {
                return Some(candidate);
            }
            batch -= 1;
        }
        None
    }

    /// Benchmark search: tries every shape suggested by
    /// [`FftProvider::candidate_sizes`] and returns the one allowing the
    /// largest batch within `free_bytes - extra_bytes`, cheaper shapes first
    /// on ties.
    fn find_optimal_shape(
        &self,
        hint: &FftSettings,
        extra_bytes: usize,
        square_only: bool,
        tolerance_percent: usize,
        crop: bool,
        free_bytes: usize,
    ) -> Option<FftSettings> {
        let budget = free_bytes.checked_sub(extra_bytes)?;
        let dim = hint.s_dim();
        let xs = self.candidate_sizes(dim.x(), tolerance_percent, crop);
        let shapes: Vec<(usize, usize)> = if square_only {
            xs.iter().map(|&x| (x, x)).collect()
        } else {
            let ys = self.candidate_sizes(dim.y(), tolerance_percent, crop);
            let mut shapes = Vec::with_capacity(xs.len() * ys.len());
            for &x in &xs {
                for &y in &ys {
                    shapes.push((x, y));
                }
            }
            shapes.sort_by(|a, b| plane_rank(*a, crop).total_cmp(&plane_rank(*b, crop)));
            shapes
        };

        let mut best: Option<FftSettings> = None;
        for (x, y) in shapes {
            let Ok(s_dim) = Dimensions::new(x, y, dim.z(), dim.n()) else {
                continue;
            };
            let Ok(whole) = FftSettings::whole(s_dim) else {
                continue;
            };
            let Some(found) = self.find_max_batch(&whole, budget) else {
                continue;
            };
            if best.map_or(true, |b| found.batch() > b.batch()) {
                best = Some(found);
            }
        }
        best
    }
}

fn plane_rank((x, y): (usize, usize), crop: bool) -> f64 {
    let cost = y as f64 * fft_cost(x) / 2.0 + (x / 2 + 1) as f64 * fft_cost(y);
    if crop {
        cost / (x * y) as f64
    } else {
        cost
    }
}

/// Copies the low-frequency part of a half spectrum into a (usually smaller)
/// half spectrum, multiplying every bin by `scale` and the optional
/// destination-shaped `filter`.
///
/// Destination bins without a source counterpart are zeroed. When padding
/// an even source axis, its Nyquist bin lands on both `+n/2` and `-n/2` and
/// is split half and half between them. This is the Fourier-domain
/// resampling used both for correlation downscaling and for output binning.
#[allow(clippy::too_many_arguments)]
pub fn crop_spectrum<T: Real>(
    src: &[Complex<T>],
    src_width: usize,
    src_height: usize,
    dst: &mut [Complex<T>],
    dst_width: usize,
    dst_height: usize,
    filter: Option<&[T]>,
    scale: T,
) {
    let src_fw = src_width / 2 + 1;
    let dst_fw = dst_width / 2 + 1;
    let max_ky = (src_height / 2) as i64;
    let split_rows = dst_height > src_height && src_height % 2 == 0;
    let split_cols = dst_width > src_width && src_width % 2 == 0;
    let half = T::cast(0.5);
    for (dy, dst_row) in dst.chunks_exact_mut(dst_fw).take(dst_height).enumerate() {
        let ky = signed_frequency(dy, dst_height);
        if ky.abs() > max_ky {
            dst_row.fill(Complex::default());
            continue;
        }
        let sy = ky.rem_euclid(src_height as i64) as usize;
        let src_row = &src[sy * src_fw..(sy + 1) * src_fw];
        let row_scale = if split_rows && ky.abs() == max_ky {
            scale * half
        } else {
            scale
        };
        for (dx, value) in dst_row.iter_mut().enumerate() {
            if dx >= src_fw {
                *value = Complex::default();
                continue;
            }
            let mut weight = match filter {
                Some(f) => f[dy * dst_fw + dx] * row_scale,
                None => row_scale,
            };
            // Real output mirrors the column, so the bin counts twice.
            if split_cols && dx == src_fw - 1 {
                weight *= half;
            }
            *value = src_row[dx] * weight;
        }
    }
}
