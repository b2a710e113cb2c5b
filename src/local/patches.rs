//! Patch layout and patch data extraction.

use super::FramePatchMeta;
use crate::movie::Movie;
use crate::shift::{AlignmentResult, Shift};
use crate::util::{MovAlignError, MovAlignResult, Real};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Inclusive rectangle in movie pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PatchRect {
    pub x0: usize,
    pub y0: usize,
    pub x1: usize,
    pub y1: usize,
}

impl PatchRect {
    pub fn width(&self) -> usize {
        self.x1 - self.x0 + 1
    }

    pub fn height(&self) -> usize {
        self.y1 - self.y0 + 1
    }

    /// Geometric centre (may fall between pixels).
    pub fn center(&self) -> (f64, f64) {
        (
            (self.x0 + self.x1) as f64 / 2.0,
            (self.y0 + self.y1) as f64 / 2.0,
        )
    }
}

/// Margin per axis that no frame content can leave under the global shifts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Borders {
    pub x: usize,
    pub y: usize,
}

/// Spread of the global shifts per axis, `|max(ceil s) - min(floor s)|`.
pub fn movie_borders(global: &AlignmentResult) -> Borders {
    let span = |get: fn(&Shift) -> f64| -> usize {
        let shifts = global.shifts();
        if shifts.is_empty() {
            return 0;
        }
        let hi = shifts.iter().map(|s| get(s).ceil()).fold(f64::MIN, f64::max);
        let lo = shifts.iter().map(|s| get(s).floor()).fold(f64::MAX, f64::min);
        (hi - lo).abs() as usize
    };
    Borders {
        x: span(|s| s.x),
        y: span(|s| s.y),
    }
}

/// Default patch grid: enough patches to cover the movie once per axis.
pub fn set_no_of_patches(movie: (usize, usize), patch: (usize, usize)) -> (usize, usize) {
    (
        movie.0.div_ceil(patch.0.max(1)).max(1),
        movie.1.div_ceil(patch.1.max(1)).max(1),
    )
}

/// Top-left coordinates of `count` patches of length `patch` spread evenly
/// over `len - 2 * border` pixels starting at `border`.
fn axis_layout(len: usize, border: usize, patch: usize, count: usize) -> Option<Vec<usize>> {
    let window = len.checked_sub(2 * border)?;
    if window < patch || count == 0 {
        return None;
    }
    if count == 1 {
        return Some(vec![border + (window - patch) / 2]);
    }
    // Overlap between neighbours; negative when the patches leave gaps.
    let needed = (count * patch) as i64 - window as i64;
    let overlap = needed.div_euclid(count as i64 - 1)
        + i64::from(needed.rem_euclid(count as i64 - 1) != 0);
    let step = patch as i64 - overlap;
    Some(
        (0..count)
            .map(|i| (border as i64 + i as i64 * step) as usize)
            .collect(),
    )
}

/// Places a `patches.0 x patches.1` grid of `patch`-sized rectangles over the
/// shift-safe interior of a `movie`-sized frame, row by row.
///
/// Fails with [`MovAlignError::MovieTooSmall`] when the interior cannot hold
/// a single patch.
pub fn patches_location(
    borders: Borders,
    movie: (usize, usize),
    patch: (usize, usize),
    patches: (usize, usize),
) -> MovAlignResult<Vec<FramePatchMeta>> {
    let too_small = || MovAlignError::MovieTooSmall {
        movie_x: movie.0,
        movie_y: movie.1,
        patch_x: patch.0,
        patch_y: patch.1,
    };
    let xs = axis_layout(movie.0, borders.x, patch.0, patches.0).ok_or_else(too_small)?;
    let ys = axis_layout(movie.1, borders.y, patch.1, patches.1).ok_or_else(too_small)?;
    let mut out = Vec::with_capacity(xs.len() * ys.len());
    for (id_y, &y0) in ys.iter().enumerate() {
        for (id_x, &x0) in xs.iter().enumerate() {
            out.push(FramePatchMeta {
                rect: PatchRect {
                    x0,
                    y0,
                    x1: x0 + patch.0 - 1,
                    y1: y0 + patch.1 - 1,
                },
                id_x,
                id_y,
                id_t: 0,
            });
        }
    }
    Ok(out)
}

/// Frame indices summed into patch frame `t` for a temporal window of
/// `avg` frames. Even windows reach one frame further forward than back.
pub fn averaging_window(t: usize, n: usize, avg: usize) -> impl Iterator<Item = usize> {
    let back = avg.saturating_sub(1) / 2;
    let forward = avg / 2;
    let lo = t.saturating_sub(back);
    let hi = (t + forward).min(n.saturating_sub(1));
    lo..=hi
}

/// Extracts the patch `rect` from all `n` movie frames into `out`
/// (`n * rect.width() * rect.height()` samples).
///
/// Each source frame is read at its rounded global shift, so the patch stack
/// is already stabilized against whole-frame drift, and neighbouring frames
/// are summed per [`averaging_window`].
pub fn patch_data<T: Real>(
    movie: &Movie<T>,
    rect: PatchRect,
    global: &AlignmentResult,
    n: usize,
    avg: usize,
    out: &mut [T],
) -> MovAlignResult<()> {
    let (pw, ph) = (rect.width(), rect.height());
    let needed = n * pw * ph;
    if out.len() < needed || global.len() < n {
        return Err(MovAlignError::BufferTooSmall {
            needed,
            got: out.len().min(global.len() * pw * ph),
        });
    }
    let views = (0..n)
        .map(|t| movie.frame_view(t))
        .collect::<MovAlignResult<Vec<_>>>()?;
    let offsets: Vec<(i64, i64)> = global.shifts()[..n]
        .iter()
        .map(|s| (s.x.round() as i64, s.y.round() as i64))
        .collect();

    let fill = |(t, dst): (usize, &mut [T])| {
        dst.fill(T::zero());
        for k in averaging_window(t, n, avg) {
            let view = &views[k];
            let (ox, oy) = offsets[k];
            for (y, row) in dst.chunks_exact_mut(pw).enumerate() {
                let sy = (rect.y0 + y) as i64 + oy;
                for (x, value) in row.iter_mut().enumerate() {
                    let sx = (rect.x0 + x) as i64 + ox;
                    *value += view.get_clamped(sx, sy);
                }
            }
        }
    };
    #[cfg(feature = "parallel")]
    out[..needed].par_chunks_exact_mut(pw * ph).enumerate().for_each(fill);
    #[cfg(not(feature = "parallel"))]
    out[..needed].chunks_exact_mut(pw * ph).enumerate().for_each(fill);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{averaging_window, movie_borders, patches_location, set_no_of_patches, Borders};
    use crate::shift::{AlignmentResult, Shift};
    use crate::util::MovAlignError;

    #[test]
    fn layout_tiles_large_movie() {
        let patches = patches_location(Borders::default(), (4096, 4096), (512, 512), (5, 5)).unwrap();
        assert_eq!(patches.len(), 25);
        let row: Vec<usize> = patches.iter().take(5).map(|p| p.rect.x0).collect();
        assert_eq!(row, vec![0, 896, 1792, 2688, 3584]);
        for w in row.windows(2) {
            assert!(w[1] > w[0]);
            assert_eq!(w[1] - w[0], 896);
        }
        assert!(patches.iter().all(|p| p.rect.x1 < 4096 && p.rect.y1 < 4096));
        assert_eq!(patches[7].id_x, 2);
        assert_eq!(patches[7].id_y, 1);
    }

    #[test]
    fn overlapping_layout_respects_borders() {
        let b = Borders { x: 10, y: 4 };
        let patches = patches_location(b, (200, 100), (64, 64), (4, 2)).unwrap();
        let xs: Vec<usize> = patches.iter().take(4).map(|p| p.rect.x0).collect();
        // window 180, overlap ceil((256 - 180) / 3) = 26, step 38
        assert_eq!(xs, vec![10, 48, 86, 124]);
        assert!(patches.iter().all(|p| p.rect.x1 <= 190 && p.rect.y1 <= 96));
    }

    #[test]
    fn single_patch_is_centred() {
        let patches = patches_location(Borders::default(), (100, 80), (40, 40), (1, 1)).unwrap();
        assert_eq!((patches[0].rect.x0, patches[0].rect.y0), (30, 20));
    }

    #[test]
    fn small_movie_is_rejected() {
        let err = patches_location(Borders { x: 20, y: 0 }, (100, 100), (80, 80), (2, 2));
        assert!(matches!(err, Err(MovAlignError::MovieTooSmall { .. })));
    }

    #[test]
    fn borders_span_extreme_shifts() {
        let global = AlignmentResult::new(
            0,
            vec![Shift::new(0.0, 0.0), Shift::new(2.3, -1.2), Shift::new(-1.5, 0.4)],
        );
        assert_eq!(movie_borders(&global), Borders { x: 5, y: 3 });
        assert_eq!(set_no_of_patches((4096, 4000), (500, 500)), (9, 8));
    }

    #[test]
    fn even_windows_lean_forward() {
        assert_eq!(averaging_window(5, 10, 3).collect::<Vec<_>>(), vec![4, 5, 6]);
        assert_eq!(averaging_window(5, 10, 2).collect::<Vec<_>>(), vec![5, 6]);
        assert_eq!(averaging_window(0, 10, 4).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(averaging_window(9, 10, 1).collect::<Vec<_>>(), vec![9]);
    }
}
