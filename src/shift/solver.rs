//! Least-squares recovery of per-frame shifts from pairwise measurements.
//!
//! The unknowns are the `n - 1` increments between consecutive frames. The
//! measurement for pair `(i, j)` is the sum of increments `i..j`, so its row
//! of the design matrix has ones in columns `i..j` and zeros elsewhere.

use super::{AlignmentResult, Shift};
use crate::correlate::{pair_count, pairs};
use crate::trace::trace_debug;
use nalgebra::{DMatrix, DVector};

const SVD_EPS: f64 = 1e-12;
const MIN_REJECTED_RESIDUAL: f64 = 1e-6;

/// Design matrix of the pairwise system for `n` frames.
pub fn design_matrix(n: usize) -> DMatrix<f64> {
    let cols = n.saturating_sub(1);
    let mut a = DMatrix::zeros(pair_count(n), cols);
    for (row, (i, j)) in pairs(n).enumerate() {
        for col in i..j {
            a[(row, col)] = 1.0;
        }
    }
    a
}

/// Solves `a * x = bx` and `a * y = by` in the least-squares sense with
/// iterative outlier rejection.
///
/// Each round solves on the rows still active, then drops every row whose
/// combined residual exceeds the mean plus three standard deviations. Stops
/// after `iterations` rounds, when nothing is dropped, or when fewer rows
/// than unknowns would remain. A failed decomposition yields zeros.
pub fn solve_shifts(
    a: &DMatrix<f64>,
    bx: &DVector<f64>,
    by: &DVector<f64>,
    iterations: usize,
) -> (DVector<f64>, DVector<f64>) {
    let cols = a.ncols();
    let zeros = || (DVector::zeros(cols), DVector::zeros(cols));
    if cols == 0 {
        return zeros();
    }
    let mut active: Vec<usize> = (0..a.nrows()).collect();
    let mut solution = zeros();
    for round in 0..iterations.max(1) {
        if active.len() < cols {
            break;
        }
        let sub = a.select_rows(&active);
        let svd = sub.clone().svd(true, true);
        let (Ok(x), Ok(y)) = (
            svd.solve(&bx.select_rows(&active), SVD_EPS),
            svd.solve(&by.select_rows(&active), SVD_EPS),
        ) else {
            return zeros();
        };
        let rx = &sub * &x - bx.select_rows(&active);
        let ry = &sub * &y - by.select_rows(&active);
        solution = (x, y);

        let residuals: Vec<f64> = rx
            .iter()
            .zip(ry.iter())
            .map(|(ex, ey)| (ex * ex + ey * ey).sqrt())
            .collect();
        let count = residuals.len() as f64;
        let mean = residuals.iter().sum::<f64>() / count;
        let var = residuals.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / count;
        let threshold = (mean + 3.0 * var.sqrt()).max(MIN_REJECTED_RESIDUAL);
        let kept: Vec<usize> = active
            .iter()
            .zip(&residuals)
            .filter(|&(_, &r)| r <= threshold)
            .map(|(&row, _)| row)
            .collect();
        if kept.len() == active.len() {
            break;
        }
        trace_debug!(
            "outliers_rejected",
            round = round,
            dropped = active.len() - kept.len()
        );
        active = kept;
    }
    solution
}

/// Recovers per-frame shifts from pairwise measurements `bx`, `by` given in
/// [`pairs`] order.
///
/// Shifts are cumulative sums of the solved increments with frame 0 at zero,
/// then re-based onto `ref_frame` when one is given. Fewer than two frames
/// produce an all-zero result.
pub fn compute_alignment(
    bx: &[f64],
    by: &[f64],
    a: &DMatrix<f64>,
    ref_frame: Option<usize>,
    n: usize,
    iterations: usize,
) -> AlignmentResult {
    let reference = ref_frame.filter(|&r| r < n).unwrap_or(0);
    if n < 2 {
        return AlignmentResult::new(reference, vec![Shift::ZERO; n]);
    }
    let (ix, iy) = solve_shifts(
        a,
        &DVector::from_column_slice(bx),
        &DVector::from_column_slice(by),
        iterations,
    );
    let mut shifts = Vec::with_capacity(n);
    let mut acc = Shift::ZERO;
    shifts.push(acc);
    for k in 0..n - 1 {
        acc = acc + Shift::new(ix[k], iy[k]);
        shifts.push(acc);
    }
    let origin = shifts[reference];
    for s in &mut shifts {
        *s = *s - origin;
    }
    AlignmentResult::new(reference, shifts)
}

#[cfg(test)]
mod tests {
    use super::{compute_alignment, design_matrix, solve_shifts};
    use crate::correlate::pairs;
    use crate::shift::Shift;
    use nalgebra::DVector;

    fn measurements(truth: &[Shift]) -> (Vec<f64>, Vec<f64>) {
        pairs(truth.len())
            .map(|(i, j)| (truth[j].x - truth[i].x, truth[j].y - truth[i].y))
            .unzip()
    }

    #[test]
    fn design_rows_encode_cumulative_sums() {
        let a = design_matrix(4);
        assert_eq!(a.shape(), (6, 3));
        // Pair (1, 3) is row 4.
        assert_eq!(a.row(4).iter().copied().collect::<Vec<_>>(), vec![0.0, 1.0, 1.0]);
    }

    #[test]
    fn consistent_measurements_are_recovered_exactly() {
        for n in [2usize, 3, 10] {
            let truth: Vec<Shift> = (0..n)
                .map(|k| Shift::new(0.7 * k as f64 - 1.0, (k * k) as f64 * 0.1))
                .collect();
            let (bx, by) = measurements(&truth);
            let result = compute_alignment(&bx, &by, &design_matrix(n), None, n, 20);
            assert_eq!(result.ref_frame(), 0);
            for (got, want) in result.shifts().iter().zip(&truth) {
                let want = *want - truth[0];
                assert!((got.x - want.x).abs() < 1e-9 && (got.y - want.y).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn reference_frame_rebases_shifts() {
        let truth: Vec<Shift> = (0..5).map(|k| Shift::new(k as f64, -(k as f64))).collect();
        let (bx, by) = measurements(&truth);
        let result = compute_alignment(&bx, &by, &design_matrix(5), Some(2), 5, 20);
        assert_eq!(result.ref_frame(), 2);
        assert!(result.shifts()[2].x.abs() < 1e-12);
        assert!((result.shifts()[0].x + 2.0).abs() < 1e-9);
        assert!((result.shifts()[4].y + 2.0).abs() < 1e-9);
    }

    #[test]
    fn single_frame_is_all_zero() {
        let result = compute_alignment(&[], &[], &design_matrix(1), None, 1, 20);
        assert_eq!(result.shifts(), &[Shift::ZERO]);
    }

    #[test]
    fn gross_outlier_is_rejected() {
        let n = 8;
        let truth: Vec<Shift> = (0..n).map(|k| Shift::new(k as f64 * 0.5, 0.0)).collect();
        let (mut bx, by) = measurements(&truth);
        bx[3] += 25.0;
        let a = design_matrix(n);
        let (x, _) = solve_shifts(
            &a,
            &DVector::from_vec(bx),
            &DVector::from_vec(by),
            20,
        );
        for inc in x.iter() {
            assert!((inc - 0.5).abs() < 1e-6, "{inc}");
        }
    }
}
