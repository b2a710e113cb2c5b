//! Local (patch-based) alignment model.
//!
//! The movie is cut into a grid of overlapping patches; every patch is
//! aligned like a small movie on top of the rounded global shifts, and the
//! resulting per-patch, per-frame shifts are smoothed by a cubic B-spline
//! over `(x, y, t)`. This module holds the result types, the patch layout,
//! the spline model and the shared result store patch workers write into.

mod bspline;
mod patches;

pub use bspline::{fit_bspline, BSplineGrid, ControlPoints};
pub use patches::{
    averaging_window, movie_borders, patch_data, patches_location, set_no_of_patches, Borders,
    PatchRect,
};

use crate::settings::Dimensions;
use crate::shift::{AlignmentResult, Shift};
use crate::trace::trace_event;
use crate::util::{MovAlignError, MovAlignResult};
use std::sync::{Mutex, MutexGuard};

/// Location of a patch and the frame an observation belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FramePatchMeta {
    pub rect: PatchRect,
    pub id_x: usize,
    pub id_y: usize,
    pub id_t: usize,
}

/// Outcome of local alignment.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalAlignmentResult {
    /// Global alignment the patches were stabilized with.
    pub global_hint: AlignmentResult,
    /// Full movie extent; `n` is the number of aligned frames.
    pub movie_dim: Dimensions,
    /// Total (global + local) shift per patch and frame, patch-major.
    pub shifts: Vec<(FramePatchMeta, Shift)>,
    /// Smoothed model; absent when too few observations were available.
    pub bspline: Option<BSplineGrid>,
}

impl LocalAlignmentResult {
    /// The fitted model, required by every resampling step.
    pub fn bspline(&self) -> MovAlignResult<&BSplineGrid> {
        self.bspline.as_ref().ok_or(MovAlignError::MissingSplineModel)
    }
}

/// Everything a patch worker needs to turn correlations into shifts and
/// write them back.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PatchContext {
    /// Frames in the patch stack.
    pub n: usize,
    /// Maximal expected shift (patch pixels).
    pub max_shift: usize,
    /// First slot of this patch in the shared shift array.
    pub shifts_offset: usize,
    /// Patch pixels per correlation pixel, per axis.
    pub scale: (f64, f64),
    /// Frame the local shifts are expressed against.
    pub ref_frame: Option<usize>,
    /// Side of the correlation windows.
    pub center_size: usize,
    /// Spectra the correlation step may stage at once.
    pub frames_in_correlation_buffer: usize,
}

impl PatchContext {
    /// Elements of the correlation buffer for this patch.
    pub fn corr_elems(&self) -> usize {
        crate::correlate::pair_count(self.n) * self.center_size * self.center_size
    }
}

/// Settings shared by all patch contexts of one run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PatchContextTemplate {
    pub max_shift: usize,
    pub scale: (f64, f64),
    pub ref_frame: Option<usize>,
    pub center_size: usize,
    pub frames_in_correlation_buffer: usize,
}

/// Shift store shared by all patch workers.
///
/// The array is sized up front: patch `k` owns slots `k * n..(k + 1) * n`,
/// so the final layout does not depend on the order patches finish in.
pub struct SharedLocalShifts {
    n: usize,
    slots: Mutex<Vec<(FramePatchMeta, Shift)>>,
}

impl SharedLocalShifts {
    pub fn new(patches: usize, n: usize) -> Self {
        let empty = FramePatchMeta {
            rect: PatchRect {
                x0: 0,
                y0: 0,
                x1: 0,
                y1: 0,
            },
            id_x: 0,
            id_y: 0,
            id_t: 0,
        };
        Self {
            n,
            slots: Mutex::new(vec![(empty, Shift::ZERO); patches * n]),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(FramePatchMeta, Shift)>> {
        self.slots.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Reserves the slots of patch `patch_index`, seeding each frame with
    /// the patch identity and the rounded global shift.
    pub fn create_context(
        &self,
        patch_index: usize,
        patch: &FramePatchMeta,
        global: &AlignmentResult,
        template: &PatchContextTemplate,
    ) -> MovAlignResult<PatchContext> {
        let offset = patch_index * self.n;
        let mut slots = self.lock();
        let len = slots.len();
        let target = slots
            .get_mut(offset..offset + self.n)
            .ok_or(MovAlignError::IndexOutOfBounds {
                index: offset + self.n,
                len,
                context: "local shift slots",
            })?;
        for (t, slot) in target.iter_mut().enumerate() {
            let global_shift = global.shifts().get(t).copied().unwrap_or(Shift::ZERO);
            *slot = (
                FramePatchMeta { id_t: t, ..*patch },
                global_shift.rounded(),
            );
        }
        Ok(PatchContext {
            n: self.n,
            max_shift: template.max_shift,
            shifts_offset: offset,
            scale: template.scale,
            ref_frame: template.ref_frame,
            center_size: template.center_size,
            frames_in_correlation_buffer: template.frames_in_correlation_buffer,
        })
    }

    /// Adds the local shifts of one patch on top of its seeded values.
    pub fn add_local_shifts(&self, ctx: &PatchContext, local: &AlignmentResult) {
        let mut slots = self.lock();
        for (slot, shift) in slots[ctx.shifts_offset..ctx.shifts_offset + ctx.n]
            .iter_mut()
            .zip(local.shifts())
        {
            slot.1 = slot.1 + *shift;
        }
    }

    pub fn into_inner(self) -> Vec<(FramePatchMeta, Shift)> {
        self.slots.into_inner().unwrap_or_else(|p| p.into_inner())
    }
}

/// Local result that carries the global shifts at every patch, fitted with
/// the same spline model as a real local alignment.
///
/// Like a configured local alignment, the control grid needs at least three
/// points per axis.
pub fn local_from_global(
    global: &AlignmentResult,
    movie_dim: Dimensions,
    patch: (usize, usize),
    patches: (usize, usize),
    control: ControlPoints,
    solver_iterations: usize,
) -> MovAlignResult<LocalAlignmentResult> {
    if control.x < 3 || control.y < 3 || control.t < 3 {
        return Err(MovAlignError::config(format!(
            "at least three control points per axis are required, got {} x {} x {}",
            control.x, control.y, control.t
        )));
    }
    let n = movie_dim.n();
    let layout = patches_location(
        Borders::default(),
        (movie_dim.x(), movie_dim.y()),
        patch,
        patches,
    )?;
    let mut shifts = Vec::with_capacity(layout.len() * n);
    for meta in &layout {
        for t in 0..n {
            let shift = global.shifts().get(t).copied().unwrap_or(Shift::ZERO);
            shifts.push((FramePatchMeta { id_t: t, ..*meta }, shift));
        }
    }
    let bspline = fit_bspline(movie_dim, control, &shifts, solver_iterations);
    trace_event!(
        "local_from_global",
        patches = layout.len(),
        fitted = bspline.is_some()
    );
    Ok(LocalAlignmentResult {
        global_hint: global.clone(),
        movie_dim,
        shifts,
        bspline,
    })
}

#[cfg(test)]
mod tests {
    use super::{
        local_from_global, ControlPoints, FramePatchMeta, PatchContextTemplate, PatchRect,
        SharedLocalShifts,
    };
    use crate::settings::Dimensions;
    use crate::shift::{AlignmentResult, Shift};
    use crate::util::MovAlignError;

    fn meta(id_x: usize) -> FramePatchMeta {
        FramePatchMeta {
            rect: PatchRect {
                x0: id_x * 10,
                y0: 0,
                x1: id_x * 10 + 9,
                y1: 9,
            },
            id_x,
            id_y: 0,
            id_t: 0,
        }
    }

    #[test]
    fn contexts_own_disjoint_slots() {
        let global = AlignmentResult::new(0, vec![Shift::ZERO, Shift::new(1.6, -0.4), Shift::new(2.2, 0.5)]);
        let template = PatchContextTemplate {
            max_shift: 10,
            scale: (1.0, 1.0),
            ref_frame: Some(0),
            center_size: 21,
            frames_in_correlation_buffer: 4,
        };
        let store = SharedLocalShifts::new(2, 3);
        // Patches may be processed out of order.
        let c1 = store.create_context(1, &meta(1), &global, &template).unwrap();
        let c0 = store.create_context(0, &meta(0), &global, &template).unwrap();
        assert_eq!((c0.shifts_offset, c1.shifts_offset), (0, 3));
        assert_eq!(c0.corr_elems(), 3 * 21 * 21);
        store.add_local_shifts(&c1, &AlignmentResult::new(0, vec![Shift::new(0.25, 0.0); 3]));
        let shifts = store.into_inner();
        assert_eq!(shifts[1].1, Shift::new(2.0, 0.0));
        assert_eq!(shifts[4].1, Shift::new(2.25, 0.0));
        assert_eq!(shifts[4].0.id_x, 1);
        assert_eq!(shifts[5].0.id_t, 2);
        assert!(store_out_of_range());
    }

    fn store_out_of_range() -> bool {
        let global = AlignmentResult::new(0, vec![Shift::ZERO]);
        let template = PatchContextTemplate {
            max_shift: 1,
            scale: (1.0, 1.0),
            ref_frame: None,
            center_size: 3,
            frames_in_correlation_buffer: 2,
        };
        let store = SharedLocalShifts::new(1, 1);
        matches!(
            store.create_context(1, &meta(0), &global, &template),
            Err(MovAlignError::IndexOutOfBounds { .. })
        )
    }

    #[test]
    fn local_from_global_reproduces_global_shifts() {
        let shifts: Vec<Shift> = (0..6).map(|t| Shift::new(0.5 * t as f64, -0.25 * t as f64)).collect();
        let global = AlignmentResult::new(0, shifts.clone());
        let dim = Dimensions::frames(128, 128, 6).unwrap();
        let local = local_from_global(&global, dim, (32, 32), (5, 5), ControlPoints::new(4, 4, 4), 20).unwrap();
        assert_eq!(local.shifts.len(), 25 * 6);
        let grid = local.bspline().unwrap();
        for (t, want) in shifts.iter().enumerate() {
            let got = grid.shift_at(64.0, 40.0, t as f64);
            assert!((got.x - want.x).abs() < 1e-6 && (got.y - want.y).abs() < 1e-6);
        }
    }

    #[test]
    fn local_from_global_needs_three_time_points() {
        let global = AlignmentResult::new(0, vec![Shift::ZERO, Shift::new(1.0, 0.0)]);
        let dim = Dimensions::frames(128, 128, 2).unwrap();
        let err = local_from_global(&global, dim, (32, 32), (5, 5), ControlPoints::new(4, 4, 2), 20);
        assert!(matches!(err, Err(MovAlignError::InvalidConfig { .. })));
    }
}
