//! Host FFT backend built on `realfft` and `rustfft`.
//!
//! 2-D transforms are computed separably: a real-to-complex pass over every
//! row, then a complex pass over every column of the half spectrum. Plans are
//! cached by the planners, so repeated shapes are cheap.

use super::FftProvider;
use crate::settings::FftSettings;
use crate::util::{MovAlignError, MovAlignResult, Real};
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::mem::size_of;
use std::sync::{Arc, Mutex, MutexGuard};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// CPU implementation of [`FftProvider`].
pub struct CpuFft<T: Real> {
    real: Mutex<RealFftPlanner<T>>,
    complex: Mutex<FftPlanner<T>>,
}

impl<T: Real> Default for CpuFft<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn relock<G>(result: Result<G, std::sync::PoisonError<G>>) -> G {
    result.unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn fft_error(err: impl std::fmt::Display) -> MovAlignError {
    MovAlignError::Fft {
        reason: err.to_string(),
    }
}

struct ForwardPlan<T: Real> {
    rows: Arc<dyn RealToComplex<T>>,
    cols: Arc<dyn Fft<T>>,
}

struct InversePlan<T: Real> {
    rows: Arc<dyn ComplexToReal<T>>,
    cols: Arc<dyn Fft<T>>,
}

impl<T: Real> CpuFft<T> {
    pub fn new() -> Self {
        Self {
            real: Mutex::new(RealFftPlanner::new()),
            complex: Mutex::new(FftPlanner::new()),
        }
    }

    fn real_planner(&self) -> MutexGuard<'_, RealFftPlanner<T>> {
        relock(self.real.lock())
    }

    fn complex_planner(&self) -> MutexGuard<'_, FftPlanner<T>> {
        relock(self.complex.lock())
    }

    fn forward_plan(&self, width: usize, height: usize) -> ForwardPlan<T> {
        ForwardPlan {
            rows: self.real_planner().plan_fft_forward(width),
            cols: self.complex_planner().plan_fft_forward(height),
        }
    }

    fn inverse_plan(&self, width: usize, height: usize) -> InversePlan<T> {
        InversePlan {
            rows: self.real_planner().plan_fft_inverse(width),
            cols: self.complex_planner().plan_fft_inverse(height),
        }
    }
}

fn frame_count(
    width: usize,
    height: usize,
    real_len: usize,
    complex_len: usize,
) -> MovAlignResult<usize> {
    let frame_len = width * height;
    let spectrum_len = (width / 2 + 1) * height;
    if frame_len == 0 || real_len % frame_len != 0 {
        return Err(MovAlignError::config(format!(
            "buffer of {real_len} samples is not a whole number of {width} x {height} frames"
        )));
    }
    let count = real_len / frame_len;
    if complex_len < count * spectrum_len {
        return Err(MovAlignError::BufferTooSmall {
            needed: count * spectrum_len,
            got: complex_len,
        });
    }
    Ok(count)
}

fn transform_columns<T: Real>(
    cols: &dyn Fft<T>,
    spectrum: &mut [Complex<T>],
    fw: usize,
    height: usize,
) {
    let mut column = vec![Complex::default(); height];
    let mut scratch = vec![Complex::default(); cols.get_inplace_scratch_len()];
    for x in 0..fw {
        for (y, value) in column.iter_mut().enumerate() {
            *value = spectrum[y * fw + x];
        }
        cols.process_with_scratch(&mut column, &mut scratch);
        for (y, value) in column.iter().enumerate() {
            spectrum[y * fw + x] = *value;
        }
    }
}

fn forward_frame<T: Real>(
    plan: &ForwardPlan<T>,
    width: usize,
    height: usize,
    frame: &[T],
    spectrum: &mut [Complex<T>],
) -> MovAlignResult<()> {
    let fw = width / 2 + 1;
    let mut row = plan.rows.make_input_vec();
    let mut scratch = plan.rows.make_scratch_vec();
    for (src, dst) in frame
        .chunks_exact(width)
        .zip(spectrum.chunks_exact_mut(fw))
        .take(height)
    {
        row.copy_from_slice(src);
        plan.rows
            .process_with_scratch(&mut row, dst, &mut scratch)
            .map_err(fft_error)?;
    }
    transform_columns(plan.cols.as_ref(), spectrum, fw, height);
    Ok(())
}

fn inverse_frame<T: Real>(
    plan: &InversePlan<T>,
    width: usize,
    height: usize,
    spectrum: &mut [Complex<T>],
    frame: &mut [T],
) -> MovAlignResult<()> {
    let fw = width / 2 + 1;
    transform_columns(plan.cols.as_ref(), spectrum, fw, height);
    let mut scratch = plan.rows.make_scratch_vec();
    let norm = T::one() / T::cast((width * height) as f64);
    for (src, dst) in spectrum
        .chunks_exact_mut(fw)
        .zip(frame.chunks_exact_mut(width))
        .take(height)
    {
        // Hermitian symmetry: DC and Nyquist bins of a real row are real.
        src[0].im = T::zero();
        if width % 2 == 0 {
            src[fw - 1].im = T::zero();
        }
        plan.rows
            .process_with_scratch(src, dst, &mut scratch)
            .map_err(fft_error)?;
        for v in dst.iter_mut() {
            *v *= norm;
        }
    }
    Ok(())
}

impl<T: Real> FftProvider<T> for CpuFft<T> {
    fn forward(
        &self,
        width: usize,
        height: usize,
        input: &[T],
        output: &mut [Complex<T>],
    ) -> MovAlignResult<()> {
        let count = frame_count(width, height, input.len(), output.len())?;
        let frame_len = width * height;
        let spectrum_len = (width / 2 + 1) * height;
        let plan = self.forward_plan(width, height);
        let output = &mut output[..count * spectrum_len];

        #[cfg(feature = "parallel")]
        {
            input
                .par_chunks_exact(frame_len)
                .zip(output.par_chunks_exact_mut(spectrum_len))
                .try_for_each(|(frame, spectrum)| {
                    forward_frame(&plan, width, height, frame, spectrum)
                })
        }
        #[cfg(not(feature = "parallel"))]
        {
            input
                .chunks_exact(frame_len)
                .zip(output.chunks_exact_mut(spectrum_len))
                .try_for_each(|(frame, spectrum)| {
                    forward_frame(&plan, width, height, frame, spectrum)
                })
        }
    }

    fn inverse(
        &self,
        width: usize,
        height: usize,
        input: &mut [Complex<T>],
        output: &mut [T],
    ) -> MovAlignResult<()> {
        let count = frame_count(width, height, output.len(), input.len())?;
        let frame_len = width * height;
        let spectrum_len = (width / 2 + 1) * height;
        let plan = self.inverse_plan(width, height);
        let input = &mut input[..count * spectrum_len];

        #[cfg(feature = "parallel")]
        {
            input
                .par_chunks_exact_mut(spectrum_len)
                .zip(output.par_chunks_exact_mut(frame_len))
                .try_for_each(|(spectrum, frame)| {
                    inverse_frame(&plan, width, height, spectrum, frame)
                })
        }
        #[cfg(not(feature = "parallel"))]
        {
            input
                .chunks_exact_mut(spectrum_len)
                .zip(output.chunks_exact_mut(frame_len))
                .try_for_each(|(spectrum, frame)| {
                    inverse_frame(&plan, width, height, spectrum, frame)
                })
        }
    }

    fn estimate_plan_bytes(&self, settings: &FftSettings) -> usize {
        // Row and column scratch per frame in flight plus twiddle tables.
        let s = settings.s_dim();
        let twiddles = (s.x() + s.y()) * size_of::<Complex<T>>();
        let per_frame = (s.x() + 2 * s.y()) * size_of::<Complex<T>>();
        twiddles + per_frame * settings.batch()
    }
}

#[cfg(test)]
mod tests {
    use super::CpuFft;
    use crate::fft::FftProvider;
    use rustfft::num_complex::Complex;

    #[test]
    fn forward_then_inverse_is_identity() {
        let fft = CpuFft::<f64>::new();
        let (w, h) = (12, 10);
        let input: Vec<f64> = (0..2 * w * h).map(|v| ((v * 7) % 13) as f64 - 6.0).collect();
        let mut spectrum = vec![Complex::default(); 2 * (w / 2 + 1) * h];
        fft.forward(w, h, &input, &mut spectrum).unwrap();
        let mut output = vec![0.0; input.len()];
        fft.inverse(w, h, &mut spectrum, &mut output).unwrap();
        for (a, b) in input.iter().zip(&output) {
            assert!((a - b).abs() < 1e-9, "{a} vs {b}");
        }
    }

    #[test]
    fn dc_bin_holds_the_sum() {
        let fft = CpuFft::<f32>::new();
        let input = vec![1.5f32; 8 * 6];
        let mut spectrum = vec![Complex::default(); 5 * 6];
        fft.forward(8, 6, &input, &mut spectrum).unwrap();
        assert!((spectrum[0].re - 72.0).abs() < 1e-4);
        assert!(spectrum[1..].iter().all(|c| c.norm() < 1e-4));
    }

    #[test]
    fn ragged_input_is_rejected() {
        let fft = CpuFft::<f32>::new();
        let input = vec![0.0f32; 50];
        let mut spectrum = vec![Complex::default(); 100];
        assert!(fft.forward(8, 6, &input, &mut spectrum).is_err());
    }
}
