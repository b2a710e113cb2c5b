//! Alignment driver: ties the size selector, movie store, correlation
//! engine, shift solver, patch model and applicator into one run.
//!
//! Work is split over two rayon pools. Loader threads read, crop and cut
//! patches out of frames; device threads transform and correlate. A loader
//! job hands its buffer to the device pool through `install` and blocks
//! until the device work returns.

mod config;

pub use config::{AlignConfig, FrameRanges, LocalConfig};

use crate::apply::{apply_shifts_compute_average, AlignedFrameSink, ApplyParams, Averages};
use crate::bench::{SettingsStore, SizeSelector};
use crate::correlate::{
    cutoff_frequency, low_pass_filter, max_filter_bytes, pair_count, CorrelationEngine, PlaneDims,
};
use crate::device::{stream_count, Device};
use crate::fft::FftProvider;
use crate::local::{
    fit_bspline, local_from_global, movie_borders, patch_data, patches_location,
    set_no_of_patches, ControlPoints, LocalAlignmentResult, PatchContextTemplate,
    SharedLocalShifts,
};
use crate::memory::{BufferPool, MemKind, PooledBuffer};
use crate::movie::{GainCorrection, Movie, MovieSource};
use crate::settings::{Dimensions, FftSettings};
use crate::shift::{compute_shifts, AlignmentResult, Shift, ShiftContext};
use crate::trace::{trace_event, trace_span};
use crate::util::math::mb_f64;
use crate::util::{build_pool, center_size, MovAlignError, MovAlignResult, Real};
use rayon::prelude::*;
use rustfft::num_complex::Complex;
use std::mem::size_of;
use std::sync::Arc;

/// Requested correlation shape for frames of `input`: per axis the smallest
/// even size holding a `center`-wide window whose ratio to the input size
/// reaches `scale`, with one item per frame pair.
pub fn correlation_hint(input: Dimensions, scale: f64, center: usize) -> MovAlignResult<Dimensions> {
    let nearest_even = |len: usize| {
        let mut size = center.div_ceil(2) * 2;
        while (size as f64) / (len as f64) < scale {
            size += 2;
        }
        size
    };
    Dimensions::new(
        nearest_even(input.x()),
        nearest_even(input.y()),
        input.z(),
        pair_count(input.n()),
    )
}

/// Spectra the correlation step may stage at once: a third of `free_bytes`
/// worth of correlation-sized spectra, at least two.
pub fn frames_in_buffer<T: Real>(free_bytes: usize, correlation: &FftSettings) -> usize {
    let per_frame = mb_f64(correlation.f_bytes_single::<T>());
    if per_frame <= 0.0 {
        return 2;
    }
    ((mb_f64(free_bytes / 3) / per_frame).ceil() as usize).max(2)
}

/// Copies the top-left `width x height` region of movie frames
/// `first..first + k` into consecutive planes of `out`.
pub fn cropped_frames<T: Real>(
    movie: &Movie<T>,
    width: usize,
    height: usize,
    first: usize,
    out: &mut [T],
) -> MovAlignResult<()> {
    for (k, plane) in out.chunks_exact_mut(width * height).enumerate() {
        movie
            .frame_view(first + k)?
            .roi(0, 0, width, height)?
            .copy_into(plane)?;
    }
    Ok(())
}

/// Everything a run produced.
#[derive(Clone, Debug)]
pub struct AlignmentOutcome<T> {
    pub global: AlignmentResult,
    pub local: LocalAlignmentResult,
    pub averages: Averages<T>,
}

/// Movie aligner bound to a device, an FFT backend and a buffer pool.
pub struct MovieAligner<T: Real> {
    config: AlignConfig,
    device: Arc<dyn Device>,
    fft: Arc<dyn FftProvider<T>>,
    pool: BufferPool,
    selector: SizeSelector<T>,
    engine: CorrelationEngine<T>,
    movie: Movie<T>,
    ranges: Option<FrameRanges>,
}

impl<T: Real> MovieAligner<T> {
    /// Validates `config` and wires the components together. `store` caches
    /// the transform shapes chosen by the size selector.
    pub fn new(
        config: AlignConfig,
        device: Arc<dyn Device>,
        fft: Arc<dyn FftProvider<T>>,
        pool: BufferPool,
        store: Box<dyn SettingsStore>,
    ) -> MovAlignResult<Self> {
        config.validate()?;
        let selector = SizeSelector::new(
            Arc::clone(&device),
            Arc::clone(&fft),
            store,
            config.skip_autotuning,
        );
        let engine = CorrelationEngine::new(Arc::clone(&fft), pool.clone());
        Ok(Self {
            movie: Movie::new(pool.clone()),
            config,
            device,
            fft,
            pool,
            selector,
            engine,
            ranges: None,
        })
    }

    pub fn config(&self) -> &AlignConfig {
        &self.config
    }

    pub fn movie(&self) -> &Movie<T> {
        &self.movie
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn selector(&self) -> &SizeSelector<T> {
        &self.selector
    }

    fn cpu_threads(&self, streams: usize) -> usize {
        match self.config.cpu_threads {
            0 => 2 * streams,
            n => n,
        }
    }

    fn free_bytes(&self) -> usize {
        self.device.update_memory_info();
        self.device.last_free_bytes()
    }

    /// Resolves the frame ranges for `source` and sizes the movie store.
    fn prepare_movie(&mut self, source: &dyn MovieSource<T>) -> MovAlignResult<Dimensions> {
        let ranges = self.config.frame_ranges(source.frame_count())?;
        let (w, h) = source.frame_dims();
        let dim = Dimensions::frames(w, h, ranges.aligned())?;
        if self.movie.full_dim() != Some(dim) || self.ranges != Some(ranges) {
            self.movie.set_full_dim(dim);
        }
        self.ranges = Some(ranges);
        Ok(dim)
    }

    fn ranges(&self) -> MovAlignResult<FrameRanges> {
        self.ranges
            .ok_or_else(|| MovAlignError::config("no movie has been prepared"))
    }

    /// Loads every missing frame of the aligned range on a loader pool.
    fn ensure_loaded(
        &self,
        source: &dyn MovieSource<T>,
        correction: &GainCorrection<T>,
    ) -> MovAlignResult<()> {
        if self.movie.has_full_movie() {
            return Ok(());
        }
        let first = self.ranges()?.first;
        let cpu = build_pool("cpu", self.cpu_threads(1))?;
        self.movie.load_frames(source, correction, first, &cpu)
    }

    /// Frame shape used for global alignment; the frames may be cropped.
    fn movie_settings(&self, dim: Dimensions) -> MovAlignResult<FftSettings> {
        self.selector
            .select_settings("movie", dim, max_filter_bytes::<T>(dim.x(), dim.y()), true)
    }

    /// Correlation shape for frames of `input`; may be padded.
    fn correlation_settings(&self, input: Dimensions) -> MovAlignResult<FftSettings> {
        let hint = correlation_hint(
            input,
            self.config.scale_factor(),
            center_size(self.config.max_shift),
        )?;
        let extra = 2 * (self.free_bytes() / 3);
        self.selector
            .select_settings("correlation", hint, extra, false)
    }

    /// Patch shape for `n` frames; may be padded.
    fn patch_settings(&self, patch: (usize, usize), n: usize) -> MovAlignResult<FftSettings> {
        let hint = Dimensions::frames(patch.0, patch.1, n)?;
        let extra = 2 * (self.free_bytes() / 3);
        self.selector.select_settings("patch", hint, extra, false)
    }

    fn filter_for(&self, input_x: usize, correlation: &FftSettings) -> (f64, Vec<T>) {
        let c = correlation.s_dim();
        let actual_scale = c.x() as f64 / input_x as f64;
        let cutoff = cutoff_frequency(
            self.config.sampling_rate / actual_scale,
            self.config.max_resolution,
        );
        (actual_scale, low_pass_filter(c.x(), c.y(), cutoff))
    }

    /// Estimates one shift per frame of the aligned range, relative to its
    /// first frame.
    pub fn compute_global_alignment(
        &mut self,
        source: &dyn MovieSource<T>,
        correction: &GainCorrection<T>,
    ) -> MovAlignResult<AlignmentResult> {
        let _span = trace_span!("global_alignment").entered();
        let movie_dim = self.prepare_movie(source)?;
        let n = movie_dim.n();
        if n < 2 {
            self.ensure_loaded(source, correction)?;
            return Ok(AlignmentResult::new(0, vec![Shift::ZERO; n]));
        }

        let movie_settings = self.movie_settings(movie_dim)?;
        let correlation = self.correlation_settings(movie_settings.s_dim())?;
        let m = movie_settings.s_dim();
        let c = correlation.s_dim();
        let (actual_scale, filter) = self.filter_for(m.x(), &correlation);
        let buffered = frames_in_buffer::<T>(self.free_bytes(), &correlation);
        trace_event!(
            "global_settings",
            requested_scale = self.config.scale_factor(),
            actual_scale = actual_scale,
            movie_x = m.x(),
            movie_y = m.y(),
            movie_batch = movie_settings.batch(),
            correlation_x = c.x(),
            correlation_y = c.y(),
            correlation_batch = correlation.batch(),
            frames_in_buffer = buffered
        );

        let crop_dims = PlaneDims::new(m.x(), m.y());
        let corr_dims = PlaneDims::new(c.x(), c.y());
        let spec_len = corr_dims.spectrum_len();
        let batch = movie_settings.batch();
        let mut spectra = self
            .pool
            .acquire::<Complex<T>>(MemKind::Host, n * spec_len);

        let streams = stream_count(self.device.as_ref(), movie_dim.xy() * size_of::<T>());
        let threads = self.cpu_threads(streams);
        trace_event!("pools", cpu_threads = threads, device_streams = streams);
        let first = self.ranges()?.first;
        let movie = &self.movie;
        let engine = &self.engine;
        let pool = &self.pool;
        let filter = &filter[..];
        let chunks: Vec<(usize, &mut [Complex<T>])> = spectra
            .chunks_mut(batch * spec_len)
            .enumerate()
            .map(|(k, chunk)| (k * batch, chunk))
            .collect();

        let gpu = build_pool("gpu", streams)?;
        let cpu = build_pool("cpu", threads)?;
        movie.load_frames(source, correction, first, &cpu)?;
        cpu.install(|| {
            chunks.into_par_iter().try_for_each(|(start, out)| {
                let count = out.len() / spec_len;
                let mut frames = pool.acquire::<T>(MemKind::Pinned, count * crop_dims.len());
                cropped_frames(movie, crop_dims.width, crop_dims.height, start, &mut frames)?;
                gpu.install(|| {
                    engine.perform_fft_and_scale(&frames, crop_dims, out, corr_dims, filter)
                })
            })
        })?;

        let window = center_size(self.config.max_shift);
        let mut correlations = self
            .pool
            .acquire::<T>(MemKind::Host, pair_count(n) * window * window);
        self.engine.compute_correlations(
            window,
            n,
            &spectra,
            corr_dims,
            buffered,
            correlation.batch(),
            &mut correlations,
        )?;
        drop(spectra);

        let ctx = ShiftContext {
            n,
            max_shift: self.config.max_shift,
            center_size: window,
            scale: (m.x() as f64 / c.x() as f64, m.y() as f64 / c.y() as f64),
            ref_frame: None,
            solver_iterations: self.config.solver_iterations,
        };
        let result = compute_shifts(&correlations, &ctx);
        self.pool.release_cached(MemKind::Device);
        Ok(result)
    }

    /// Estimates the per-patch shifts on top of `global` and fits the spline
    /// model through them.
    pub fn compute_local_alignment(
        &mut self,
        source: &dyn MovieSource<T>,
        correction: &GainCorrection<T>,
        global: &AlignmentResult,
    ) -> MovAlignResult<LocalAlignmentResult> {
        let _span = trace_span!("local_alignment").entered();
        let local = self
            .config
            .local
            .ok_or_else(|| MovAlignError::config("local alignment is not configured"))?;
        let movie_dim = self.prepare_movie(source)?;
        let n = movie_dim.n();
        if global.len() != n {
            return Err(MovAlignError::config(format!(
                "global alignment has {} shifts, the movie {n} frames",
                global.len()
            )));
        }

        let patch_settings = self.patch_settings(local.patch_size, n)?;
        let p = patch_settings.s_dim();
        let grid = local
            .patches
            .unwrap_or_else(|| set_no_of_patches((movie_dim.x(), movie_dim.y()), (p.x(), p.y())));
        let control = local.control_points;
        if grid.0 <= control.x || grid.1 <= control.y {
            return Err(MovAlignError::ControlPointsExceedPatches {
                control_x: control.x,
                control_y: control.y,
                patches_x: grid.0,
                patches_y: grid.1,
            });
        }
        if movie_dim.x() < p.x() || movie_dim.y() < p.y() {
            return Err(MovAlignError::MovieTooSmall {
                movie_x: movie_dim.x(),
                movie_y: movie_dim.y(),
                patch_x: p.x(),
                patch_y: p.y(),
            });
        }
        if n < 2 {
            return Err(MovAlignError::config(
                "local alignment needs at least two frames",
            ));
        }

        let correlation = self.correlation_settings(p)?;
        let c = correlation.s_dim();
        let borders = movie_borders(global);
        let layout = patches_location(borders, (movie_dim.x(), movie_dim.y()), (p.x(), p.y()), grid)?;
        let (actual_scale, filter) = self.filter_for(p.x(), &correlation);
        let buffered = frames_in_buffer::<T>(self.free_bytes(), &correlation);
        trace_event!(
            "local_settings",
            patches_x = grid.0,
            patches_y = grid.1,
            patch_x = p.x(),
            patch_y = p.y(),
            border_x = borders.x,
            border_y = borders.y,
            actual_scale = actual_scale,
            correlation_x = c.x(),
            correlation_y = c.y(),
            correlation_batch = correlation.batch()
        );

        self.ensure_loaded(source, correction)?;

        let template = PatchContextTemplate {
            max_shift: self.config.max_shift,
            scale: (p.x() as f64 / c.x() as f64, p.y() as f64 / c.y() as f64),
            ref_frame: Some(global.ref_frame()),
            center_size: center_size(self.config.max_shift),
            frames_in_correlation_buffer: buffered,
        };
        let shared = SharedLocalShifts::new(layout.len(), n);
        let patch_dims = PlaneDims::new(p.x(), p.y());
        let corr_dims = PlaneDims::new(c.x(), c.y());
        let corr_batch = correlation.batch();
        let avg = self.config.patches_avg;
        let iterations = self.config.solver_iterations;
        let max_shift = self.config.max_shift;
        let streams = stream_count(self.device.as_ref(), patch_dims.len() * n * size_of::<T>());
        let threads = self.cpu_threads(streams);
        let movie = &self.movie;
        let engine = &self.engine;
        let pool = &self.pool;
        let filter = &filter[..];

        let gpu = build_pool("gpu", streams)?;
        let cpu = build_pool("cpu", threads)?;
        cpu.install(|| {
            layout.par_iter().enumerate().try_for_each(|(k, meta)| {
                let ctx = shared.create_context(k, meta, global, &template)?;
                let mut data = pool.acquire::<T>(MemKind::Pinned, n * patch_dims.len());
                patch_data(movie, meta.rect, global, n, avg, &mut data)?;
                let correlations = gpu.install(|| -> MovAlignResult<PooledBuffer<T>> {
                    let mut spectra =
                        pool.acquire::<Complex<T>>(MemKind::Device, n * corr_dims.spectrum_len());
                    engine.perform_fft_and_scale(&data, patch_dims, &mut spectra, corr_dims, filter)?;
                    let mut out = pool.acquire::<T>(MemKind::Host, ctx.corr_elems());
                    engine.compute_correlations(
                        ctx.center_size,
                        n,
                        &spectra,
                        corr_dims,
                        ctx.frames_in_correlation_buffer,
                        corr_batch,
                        &mut out,
                    )?;
                    Ok(out)
                })?;
                drop(data);
                let shifts = compute_shifts(
                    &correlations,
                    &ShiftContext {
                        n,
                        max_shift,
                        center_size: ctx.center_size,
                        scale: ctx.scale,
                        ref_frame: ctx.ref_frame,
                        solver_iterations: iterations,
                    },
                );
                shared.add_local_shifts(&ctx, &shifts);
                trace_event!("patch_done", id_x = meta.id_x, id_y = meta.id_y);
                Ok(())
            })
        })?;

        let shifts = shared.into_inner();
        let bspline = fit_bspline(movie_dim, control, &shifts, iterations);
        trace_event!(
            "spline_fit",
            observations = shifts.len(),
            fitted = bspline.is_some()
        );
        self.pool.release_cached(MemKind::Device);
        Ok(LocalAlignmentResult {
            global_hint: global.clone(),
            movie_dim,
            shifts,
            bspline,
        })
    }

    /// Spline model carrying `global` alone, for runs without local
    /// alignment.
    ///
    /// The field is constant in space, so the default spatial control grid
    /// is fitted through a non-overlapping patch grid one patch larger,
    /// grown until the observations cover every coefficient. The time axis
    /// keeps at most one control point per frame, but never fewer than three.
    pub fn local_from_global(&self, global: &AlignmentResult) -> MovAlignResult<LocalAlignmentResult> {
        let dim = self
            .movie
            .full_dim()
            .ok_or_else(|| MovAlignError::config("no movie has been prepared"))?;
        let defaults = self.config.local.unwrap_or_default().control_points;
        let control = ControlPoints::new(defaults.x, defaults.y, defaults.t.min(dim.n()).max(3));
        let mut grid = (control.x + 1, control.y + 1);
        while grid.0 * grid.1 * dim.n() < control.count() {
            grid = (grid.0 + 1, grid.1 + 1);
        }
        let patch = ((dim.x() / grid.0).max(1), (dim.y() / grid.1).max(1));
        local_from_global(global, dim, patch, grid, control, self.config.solver_iterations)
    }

    /// Resamples the summation range through `alignment` and accumulates
    /// the configured sums.
    pub fn apply(
        &self,
        source: &dyn MovieSource<T>,
        correction: &GainCorrection<T>,
        alignment: &LocalAlignmentResult,
        sink: Option<&mut dyn AlignedFrameSink<T>>,
    ) -> MovAlignResult<Averages<T>> {
        let ranges = self.ranges()?;
        self.ensure_loaded(source, correction)?;
        let params = ApplyParams {
            first_frame: ranges.first,
            first_sum: ranges.first_sum,
            last_sum: ranges.last_sum,
            binning: self.config.output_binning,
            compute_initial: self.config.compute_initial,
            compute_aligned: self.config.compute_aligned,
        };
        apply_shifts_compute_average(
            &params,
            &self.movie,
            alignment,
            self.fft.as_ref(),
            self.device.as_ref(),
            &self.pool,
            sink,
        )
    }

    /// Global alignment, local alignment (or the global-only model) and
    /// averaging. Movie frames and cached buffers are released afterwards,
    /// whether the run succeeded or not.
    pub fn run(
        &mut self,
        source: &dyn MovieSource<T>,
        correction: &GainCorrection<T>,
        sink: Option<&mut dyn AlignedFrameSink<T>>,
    ) -> MovAlignResult<AlignmentOutcome<T>> {
        let _span = trace_span!("alignment_run").entered();
        let outcome = self.run_stages(source, correction, sink);
        self.release_all();
        outcome
    }

    fn run_stages(
        &mut self,
        source: &dyn MovieSource<T>,
        correction: &GainCorrection<T>,
        sink: Option<&mut dyn AlignedFrameSink<T>>,
    ) -> MovAlignResult<AlignmentOutcome<T>> {
        let global = self.compute_global_alignment(source, correction)?;
        let local = if self.config.local.is_some() {
            self.compute_local_alignment(source, correction, &global)?
        } else {
            self.local_from_global(&global)?
        };
        let averages = self.apply(source, correction, &local, sink)?;
        Ok(AlignmentOutcome {
            global,
            local,
            averages,
        })
    }

    /// Drops the movie frames and every cached buffer.
    pub fn release_all(&mut self) {
        self.movie.release_full_frames();
        self.ranges = None;
        self.pool.release_all();
        self.device.synch();
    }
}
