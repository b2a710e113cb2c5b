//! Output generation: resampling frames through the fitted shift field and
//! accumulating the averages.
//!
//! Frames of the summation range are processed concurrently on a rayon pool
//! sized by [`stream_count`]; each worker bins, warps and then adds its
//! frame to the shared sums under one mutex.

mod resample;

pub use resample::{binned_len, sample_bilinear, scale_to_size_fourier, warp_frame};

use crate::device::{stream_count, Device};
use crate::fft::FftProvider;
use crate::frame::FrameView;
use crate::local::LocalAlignmentResult;
use crate::memory::{BufferPool, MemKind};
use crate::movie::Movie;
use crate::trace::{trace_event, trace_span};
use crate::util::{build_pool, MovAlignError, MovAlignResult, Real};
use rayon::prelude::*;
use std::sync::Mutex;

/// Receives every aligned frame as it is produced.
pub trait AlignedFrameSink<T>: Send {
    /// `index` is the frame's position within the aligned range.
    fn write_frame(&mut self, index: usize, width: usize, height: usize, data: &[T])
        -> MovAlignResult<()>;
}

/// What to produce and from which frames.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ApplyParams {
    /// First movie frame of the aligned range (movie slot 0).
    pub first_frame: usize,
    /// First and last (inclusive) movie frame to sum.
    pub first_sum: usize,
    pub last_sum: usize,
    /// Output binning factor; `<= 1` disables binning.
    pub binning: f64,
    pub compute_initial: bool,
    pub compute_aligned: bool,
}

/// Sums of the unaligned and aligned frames with their frame counts.
#[derive(Clone, Debug, PartialEq)]
pub struct Averages<T> {
    pub width: usize,
    pub height: usize,
    pub initial: Option<Vec<T>>,
    pub initial_count: usize,
    pub aligned: Option<Vec<T>>,
    pub aligned_count: usize,
}

impl<T: Real> Averages<T> {
    /// Divides each sum by its frame count.
    pub fn into_means(mut self) -> Self {
        let normalize = |sum: &mut Option<Vec<T>>, count: usize| {
            if let (Some(sum), true) = (sum.as_mut(), count > 0) {
                let inv = T::one() / T::cast(count as f64);
                sum.iter_mut().for_each(|v| *v *= inv);
            }
        };
        normalize(&mut self.initial, self.initial_count);
        normalize(&mut self.aligned, self.aligned_count);
        self
    }
}

struct Accumulator<'a, T> {
    initial: Vec<T>,
    initial_count: usize,
    aligned: Vec<T>,
    aligned_count: usize,
    sink: Option<&'a mut dyn AlignedFrameSink<T>>,
}

/// Resamples every frame of the summation range through the spline of
/// `alignment` and accumulates the requested sums.
///
/// Fails with [`MovAlignError::MissingSplineModel`] when `alignment` has no
/// fitted model.
pub fn apply_shifts_compute_average<T: Real>(
    params: &ApplyParams,
    movie: &Movie<T>,
    alignment: &LocalAlignmentResult,
    fft: &dyn FftProvider<T>,
    device: &dyn Device,
    pool: &BufferPool,
    sink: Option<&mut dyn AlignedFrameSink<T>>,
) -> MovAlignResult<Averages<T>> {
    let _span = trace_span!("apply_shifts").entered();
    let grid = alignment.bspline()?;
    let dim = movie
        .full_dim()
        .ok_or(MovAlignError::FrameNotLoaded { index: 0 })?;
    let (w, h) = (dim.x(), dim.y());
    let (ow, oh) = (binned_len(w, params.binning), binned_len(h, params.binning));
    let binned = (ow, oh) != (w, h);
    let field_scale = (w as f64 / ow as f64, h as f64 / oh as f64);

    if params.first_sum < params.first_frame || params.last_sum < params.first_sum {
        return Err(MovAlignError::config(format!(
            "summation range {}..={} lies outside the aligned frames",
            params.first_sum, params.last_sum
        )));
    }
    let offsets: Vec<usize> = (params.first_sum..=params.last_sum)
        .map(|i| i - params.first_frame)
        .collect();
    if let Some(&last) = offsets.last() {
        if last >= dim.n() {
            return Err(MovAlignError::IndexOutOfBounds {
                index: last,
                len: dim.n(),
                context: "summation frame",
            });
        }
    }

    let acc = Mutex::new(Accumulator {
        initial: vec![T::zero(); if params.compute_initial { ow * oh } else { 0 }],
        initial_count: 0,
        aligned: vec![T::zero(); if params.compute_aligned { ow * oh } else { 0 }],
        aligned_count: 0,
        sink,
    });
    let streams = stream_count(device, w * h * std::mem::size_of::<T>());
    trace_event!("output_streams", streams = streams, frames = offsets.len());

    let process = |offset: usize| -> MovAlignResult<()> {
        let source = movie.frame(offset)?;
        let mut reduced = pool.acquire::<T>(MemKind::Pinned, ow * oh);
        if binned {
            scale_to_size_fourier(fft, pool, source, w, h, ow, oh, &mut reduced)?;
        } else {
            reduced.copy_from_slice(source);
        }

        let mut shifted = None;
        if params.compute_aligned {
            let field = grid.displacement_field(ow, oh, offset as f64, field_scale);
            let view = FrameView::from_slice(&reduced[..], ow, oh)?;
            let mut out = pool.acquire::<T>(MemKind::Pinned, ow * oh);
            warp_frame(&view, &field, &mut out)?;
            shifted = Some(out);
        }

        let mut guard = acc.lock().unwrap_or_else(|p| p.into_inner());
        let acc = &mut *guard;
        if params.compute_initial {
            T::accumulate(&mut acc.initial, &reduced);
            acc.initial_count += 1;
        }
        if let Some(out) = shifted {
            if let Some(sink) = acc.sink.as_mut() {
                sink.write_frame(offset, ow, oh, &out)?;
            }
            T::accumulate(&mut acc.aligned, &out);
            acc.aligned_count += 1;
        }
        Ok(())
    };

    let workers = build_pool("output", streams)?;
    workers.install(|| offsets.par_iter().try_for_each(|&offset| process(offset)))?;

    let acc = acc.into_inner().unwrap_or_else(|p| p.into_inner());
    Ok(Averages {
        width: ow,
        height: oh,
        initial: params.compute_initial.then_some(acc.initial),
        initial_count: acc.initial_count,
        aligned: params.compute_aligned.then_some(acc.aligned),
        aligned_count: acc.aligned_count,
    })
}

#[cfg(test)]
mod tests {
    use super::{apply_shifts_compute_average, AlignedFrameSink, ApplyParams, Averages};
    use crate::device::HostDevice;
    use crate::fft::CpuFft;
    use crate::local::LocalAlignmentResult;
    use crate::memory::{BufferPool, MemKind};
    use crate::movie::Movie;
    use crate::settings::Dimensions;
    use crate::shift::AlignmentResult;
    use crate::util::{MovAlignError, MovAlignResult};

    struct Collect(Vec<usize>);

    impl AlignedFrameSink<f32> for Collect {
        fn write_frame(&mut self, index: usize, _: usize, _: usize, _: &[f32]) -> MovAlignResult<()> {
            self.0.push(index);
            Ok(())
        }
    }

    #[test]
    fn missing_model_is_fatal() {
        let pool = BufferPool::new();
        let mut movie = Movie::<f32>::new(pool.clone());
        let dim = Dimensions::frames(8, 8, 2).unwrap();
        movie.set_full_dim(dim);
        let alignment = LocalAlignmentResult {
            global_hint: AlignmentResult::new(0, Vec::new()),
            movie_dim: dim,
            shifts: Vec::new(),
            bspline: None,
        };
        let params = ApplyParams {
            first_frame: 0,
            first_sum: 0,
            last_sum: 1,
            binning: 1.0,
            compute_initial: true,
            compute_aligned: true,
        };
        let mut sink = Collect(Vec::new());
        let err = apply_shifts_compute_average(
            &params,
            &movie,
            &alignment,
            &CpuFft::new(),
            &HostDevice::with_budget(1 << 20),
            &pool,
            Some(&mut sink),
        );
        assert_eq!(err, Err(MovAlignError::MissingSplineModel));
        assert!(sink.0.is_empty());
        assert_eq!(pool.bytes_in_use(MemKind::Pinned), 0);
    }

    #[test]
    fn means_divide_by_counts() {
        let avg = Averages {
            width: 2,
            height: 1,
            initial: Some(vec![4.0f32, 8.0]),
            initial_count: 4,
            aligned: None,
            aligned_count: 0,
        }
        .into_means();
        assert_eq!(avg.initial, Some(vec![1.0, 2.0]));
    }
}
