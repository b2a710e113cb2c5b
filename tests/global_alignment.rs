use movalign::{
    AlignConfig, BufferPool, CpuFft, GainCorrection, HostDevice, InMemoryMovie, MemoryStore,
    MovAlignError, MovieAligner, Shift,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

const MIB: usize = 1024 * 1024;
const SIZE: usize = 128;

fn texture(seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..SIZE * SIZE).map(|_| rng.random::<f32>()).collect()
}

/// Frame `t` shows the texture moved by `shifts[t]` (with wrap-around).
fn shifted_movie(tex: &[f32], shifts: &[(i64, i64)]) -> InMemoryMovie<f32> {
    let n = SIZE as i64;
    let frames = shifts
        .iter()
        .map(|&(sx, sy)| {
            let mut frame = vec![0.0f32; SIZE * SIZE];
            for y in 0..n {
                for x in 0..n {
                    let src = (y - sy).rem_euclid(n) * n + (x - sx).rem_euclid(n);
                    frame[(y * n + x) as usize] = tex[src as usize];
                }
            }
            frame
        })
        .collect();
    InMemoryMovie::new(SIZE, SIZE, frames).unwrap()
}

fn aligner(config: AlignConfig) -> MovieAligner<f32> {
    let pool = BufferPool::new();
    MovieAligner::new(
        config,
        Arc::new(HostDevice::with_pool(512 * MIB, pool.clone())),
        Arc::new(CpuFft::<f32>::new()),
        pool,
        Box::new(MemoryStore::new()),
    )
    .unwrap()
}

fn global_config() -> AlignConfig {
    AlignConfig {
        max_shift: 10,
        sampling_rate: 1.0,
        max_resolution: 4.0,
        local: None,
        ..AlignConfig::default()
    }
}

fn assert_close(got: &[Shift], want: &[(f64, f64)], tol: f64) {
    assert_eq!(got.len(), want.len());
    for (t, (g, &(wx, wy))) in got.iter().zip(want).enumerate() {
        assert!(
            (g.x - wx).abs() < tol && (g.y - wy).abs() < tol,
            "frame {t}: got ({}, {}), want ({wx}, {wy})",
            g.x,
            g.y
        );
    }
}

#[test]
fn linear_drift_is_recovered() {
    let truth: Vec<(i64, i64)> = (0..5).map(|t| (2 * t, -2 * t)).collect();
    let movie = shifted_movie(&texture(7), &truth);
    let mut aligner = aligner(global_config());

    let result = aligner
        .compute_global_alignment(&movie, &GainCorrection::none())
        .unwrap();
    assert_eq!(result.ref_frame(), 0);
    let want: Vec<(f64, f64)> = truth.iter().map(|&(x, y)| (x as f64, y as f64)).collect();
    assert_close(result.shifts(), &want, 0.1);
    aligner.release_all();
}

#[test]
fn irregular_shifts_are_recovered() {
    let truth = [(0, 0), (4, 2), (2, -2), (-2, 0), (0, 6), (6, 4)];
    let movie = shifted_movie(&texture(11), &truth);
    let mut aligner = aligner(global_config());

    let result = aligner
        .compute_global_alignment(&movie, &GainCorrection::none())
        .unwrap();
    let want: Vec<(f64, f64)> = truth.iter().map(|&(x, y)| (x as f64, y as f64)).collect();
    assert_close(result.shifts(), &want, 0.1);
}

#[test]
fn shifts_are_relative_to_the_first_aligned_frame() {
    let truth: Vec<(i64, i64)> = (0..6).map(|t| (2 * t, 0)).collect();
    let movie = shifted_movie(&texture(3), &truth);
    let mut aligner = aligner(AlignConfig {
        first_frame: 1,
        last_frame: Some(4),
        ..global_config()
    });

    let result = aligner
        .compute_global_alignment(&movie, &GainCorrection::none())
        .unwrap();
    assert_close(
        result.shifts(),
        &[(0.0, 0.0), (2.0, 0.0), (4.0, 0.0), (6.0, 0.0)],
        0.1,
    );
}

#[test]
fn gain_reference_does_not_disturb_the_estimate() {
    let truth: Vec<(i64, i64)> = (0..4).map(|t| (0, 2 * t)).collect();
    let movie = shifted_movie(&texture(5), &truth);
    let correction = GainCorrection::new(
        Some(vec![0.25f32; SIZE * SIZE]),
        Some(vec![3.0f32; SIZE * SIZE]),
    );
    let mut aligner = aligner(global_config());

    let result = aligner.compute_global_alignment(&movie, &correction).unwrap();
    assert_close(
        result.shifts(),
        &[(0.0, 0.0), (0.0, 2.0), (0.0, 4.0), (0.0, 6.0)],
        0.1,
    );
}

#[test]
fn single_frame_gives_zero_shift() {
    let movie = shifted_movie(&texture(1), &[(0, 0)]);
    let mut aligner = aligner(global_config());
    let result = aligner
        .compute_global_alignment(&movie, &GainCorrection::none())
        .unwrap();
    assert_eq!(result.shifts(), &[Shift::ZERO]);
}

#[test]
fn frame_range_outside_the_movie_is_rejected() {
    let movie = shifted_movie(&texture(1), &[(0, 0), (2, 2)]);
    let mut aligner = aligner(AlignConfig {
        last_frame: Some(5),
        ..global_config()
    });
    let err = aligner
        .compute_global_alignment(&movie, &GainCorrection::none())
        .err()
        .unwrap();
    assert!(matches!(err, MovAlignError::InvalidConfig { .. }));
}

#[test]
fn invalid_configuration_is_rejected_up_front() {
    let pool = BufferPool::new();
    let result = MovieAligner::<f32>::new(
        AlignConfig {
            max_shift: 0,
            ..AlignConfig::default()
        },
        Arc::new(HostDevice::with_budget(MIB)),
        Arc::new(CpuFft::<f32>::new()),
        pool,
        Box::new(MemoryStore::new()),
    );
    assert!(matches!(result, Err(MovAlignError::InvalidConfig { .. })));
}
