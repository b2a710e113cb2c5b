//! Parabolic interpolation of a sampled peak along one axis.

/// Offset of the vertex of the parabola through `(-1, left)`, `(0, mid)` and
/// `(1, right)`.
///
/// Returns `None` unless the parabola opens downwards and its vertex lies in
/// `[-1, 1]`; flat or non-finite samples never produce an offset.
pub fn parabolic_offset(left: f64, mid: f64, right: f64) -> Option<f64> {
    if !(left.is_finite() && mid.is_finite() && right.is_finite()) {
        return None;
    }
    let curvature = left - 2.0 * mid + right;
    if curvature > -1e-12 {
        return None;
    }
    let offset = 0.5 * (left - right) / curvature;
    (offset.is_finite() && offset.abs() <= 1.0).then_some(offset)
}

#[cfg(test)]
mod tests {
    use super::parabolic_offset;

    #[test]
    fn symmetric_samples_have_no_offset() {
        assert_eq!(parabolic_offset(0.5, 1.0, 0.5), Some(0.0));
    }

    #[test]
    fn recovers_vertex_of_exact_parabola() {
        let f = |x: f64| 2.0 - (x + 0.4).powi(2);
        let offset = parabolic_offset(f(-1.0), f(0.0), f(1.0)).unwrap();
        assert!((offset + 0.4).abs() < 1e-12);
    }

    #[test]
    fn convex_or_flat_samples_are_rejected() {
        assert!(parabolic_offset(1.0, 0.5, 1.0).is_none());
        assert!(parabolic_offset(1.0, 1.0, 1.0).is_none());
        assert!(parabolic_offset(f64::NAN, 1.0, 0.0).is_none());
    }
}
