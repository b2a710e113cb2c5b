//! Layout of pairwise results.
//!
//! Results for the unique frame pairs `(i, j)`, `i < j`, of an `n`-frame
//! stack are stored densely in enumeration order: `i` ascending, and `j`
//! ascending within each `i`:
//!
//! ```text
//! (0,1) (0,2) .. (0,n-1) (1,2) .. (1,n-1) .. (n-2,n-1)
//! ```

/// Number of unique pairs among `n` frames.
pub fn pair_count(n: usize) -> usize {
    n * n.saturating_sub(1) / 2
}

/// Position of pair `(i, j)` (`i < j < n`) in enumeration order.
#[inline]
pub fn pair_index(i: usize, j: usize, n: usize) -> usize {
    debug_assert!(i < j && j < n, "pair ({i}, {j}) invalid for {n} frames");
    i * (2 * n - i - 1) / 2 + (j - i - 1)
}

/// All pairs in enumeration order.
pub fn pairs(n: usize) -> impl Iterator<Item = (usize, usize)> {
    (0..n).flat_map(move |i| (i + 1..n).map(move |j| (i, j)))
}
