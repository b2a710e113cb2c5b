use movalign::{
    AlignConfig, AlignmentOutcome, BufferPool, ControlPoints, CpuFft, GainCorrection, HostDevice,
    InMemoryMovie, LocalConfig, MemoryStore, MovAlignError, MovieAligner,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

const MIB: usize = 1024 * 1024;
const SIZE: usize = 128;

fn drifting_movie(frames: usize, seed: u64) -> InMemoryMovie<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let tex: Vec<f32> = (0..SIZE * SIZE).map(|_| rng.random::<f32>()).collect();
    let n = SIZE as i64;
    let frames = (0..frames as i64)
        .map(|t| {
            let (sx, sy) = (2 * t, -2 * t);
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

/// Smooth texture: a sum of plane waves, defined at any sub-pixel position.
fn wave_texture(seed: u64) -> impl Fn(f64, f64) -> f64 {
    let mut rng = StdRng::seed_from_u64(seed);
    let waves: Vec<(f64, f64, f64, f64)> = (0..24)
        .map(|_| {
            let wavelength = rng.random_range(6.0..20.0);
            let angle = rng.random_range(0.0..std::f64::consts::TAU);
            let f = std::f64::consts::TAU / wavelength;
            let amp = rng.random_range(0.5..1.0) / 24.0;
            let phase = rng.random_range(0.0..std::f64::consts::TAU);
            (amp, f * angle.cos(), f * angle.sin(), phase)
        })
        .collect();
    move |x, y| {
        waves
            .iter()
            .map(|&(a, fx, fy, p)| a * (fx * x + fy * y + p).cos())
            .sum()
    }
}

/// Shift of pixel `(x, y)` in frame `t`: a rotation about the frame centre
/// growing by one pixel per frame every 96 pixels.
fn swirl(x: f64, y: f64, t: usize) -> (f64, f64) {
    let k = t as f64 / 96.0;
    (k * (y - 64.0), -k * (x - 64.0))
}

fn swirling_movie(frames: usize, tex: &impl Fn(f64, f64) -> f64) -> InMemoryMovie<f32> {
    let frames = (0..frames)
        .map(|t| {
            let mut frame = vec![0.0f32; SIZE * SIZE];
            for y in 0..SIZE {
                for x in 0..SIZE {
                    let (sx, sy) = swirl(x as f64, y as f64, t);
                    frame[y * SIZE + x] = tex(x as f64 - sx, y as f64 - sy) as f32;
                }
            }
            frame
        })
        .collect();
    InMemoryMovie::new(SIZE, SIZE, frames).unwrap()
}

fn local_config(cpu_threads: usize) -> AlignConfig {
    AlignConfig {
        max_shift: 10,
        sampling_rate: 1.0,
        max_resolution: 4.0,
        cpu_threads,
        local: Some(LocalConfig {
            patch_size: (32, 32),
            patches: Some((5, 5)),
            control_points: ControlPoints::new(4, 4, 4),
        }),
        ..AlignConfig::default()
    }
}

fn run(config: AlignConfig, movie: &InMemoryMovie<f32>) -> AlignmentOutcome<f32> {
    let pool = BufferPool::new();
    let mut aligner = MovieAligner::new(
        config,
        Arc::new(HostDevice::with_pool(512 * MIB, pool.clone())),
        Arc::new(CpuFft::<f32>::new()),
        pool.clone(),
        Box::new(MemoryStore::new()),
    )
    .unwrap();
    aligner.run(movie, &GainCorrection::none(), None).unwrap()
}

#[test]
fn patches_follow_the_global_drift() {
    let movie = drifting_movie(5, 21);
    let outcome = run(local_config(0), &movie);
    let local = &outcome.local;

    assert_eq!(local.movie_dim.n(), 5);
    assert_eq!(local.shifts.len(), 25 * 5);
    for (meta, shift) in &local.shifts {
        let t = meta.id_t as f64;
        assert!(
            (shift.x - 2.0 * t).abs() < 0.2 && (shift.y + 2.0 * t).abs() < 0.2,
            "patch ({}, {}) frame {}: ({}, {})",
            meta.id_x,
            meta.id_y,
            meta.id_t,
            shift.x,
            shift.y
        );
    }

    let spline = local.bspline().unwrap();
    for t in 0..5 {
        for (x, y) in [(20.0, 20.0), (64.0, 64.0), (100.0, 40.0)] {
            let s = spline.shift_at(x, y, t as f64);
            assert!((s.x - 2.0 * t as f64).abs() < 0.2, "x at t={t}: {}", s.x);
            assert!((s.y + 2.0 * t as f64).abs() < 0.2, "y at t={t}: {}", s.y);
        }
    }
}

#[test]
fn spatially_varying_motion_is_tracked_per_patch() {
    let tex = wave_texture(41);
    let movie = swirling_movie(5, &tex);
    let outcome = run(
        AlignConfig {
            patches_avg: 1,
            compute_initial: true,
            ..local_config(0)
        },
        &movie,
    );
    let local = &outcome.local;
    assert_eq!(local.shifts.len(), 25 * 5);

    let mut top = None;
    let mut bottom = None;
    for (meta, shift) in &local.shifts {
        let (cx, cy) = meta.rect.center();
        let (wx, wy) = swirl(cx, cy, meta.id_t);
        assert!(
            (shift.x - wx).abs() < 0.5 && (shift.y - wy).abs() < 0.5,
            "patch ({}, {}) frame {}: got ({}, {}), want ({wx}, {wy})",
            meta.id_x,
            meta.id_y,
            meta.id_t,
            shift.x,
            shift.y
        );
        if meta.id_t == 4 && meta.id_x == 2 {
            match meta.id_y {
                0 => top = Some(shift.x),
                4 => bottom = Some(shift.x),
                _ => {}
            }
        }
    }
    // Rows of patches far apart move in opposite directions.
    let (top, bottom) = (top.unwrap(), bottom.unwrap());
    assert!(top < -1.0 && bottom > 1.0 && bottom - top > 3.0, "{top} vs {bottom}");

    let spline = local.bspline().unwrap();
    let s = spline.shift_at(32.0, 96.0, 4.0);
    let (wx, wy) = swirl(32.0, 96.0, 4);
    assert!((s.x - wx).abs() < 0.5 && (s.y - wy).abs() < 0.5);

    let averages = outcome.averages.into_means();
    let aligned = averages.aligned.as_ref().unwrap();
    let initial = averages.initial.as_ref().unwrap();
    let rms = |avg: &[f32]| {
        let mut sum = 0.0f64;
        let mut count = 0.0f64;
        for y in 24..SIZE - 24 {
            for x in 24..SIZE - 24 {
                let d = avg[y * SIZE + x] as f64 - tex(x as f64, y as f64);
                sum += d * d;
                count += 1.0;
            }
        }
        (sum / count).sqrt()
    };
    let (aligned_rms, initial_rms) = (rms(aligned), rms(initial));
    assert!(
        aligned_rms < 0.6 * initial_rms,
        "aligned {aligned_rms} vs initial {initial_rms}"
    );
}

#[test]
fn global_only_runs_cope_with_two_frames() {
    let movie = drifting_movie(2, 8);
    let outcome = run(
        AlignConfig {
            local: None,
            ..local_config(0)
        },
        &movie,
    );
    let spline = outcome.local.bspline().unwrap();
    assert_eq!(spline.control().t, 3);
    let s = spline.shift_at(64.0, 64.0, 1.0);
    assert!((s.x - 2.0).abs() < 0.1 && (s.y + 2.0).abs() < 0.1);
}

#[test]
fn thread_count_does_not_change_the_result() {
    let movie = drifting_movie(4, 33);
    let single = run(local_config(1), &movie);
    let many = run(local_config(6), &movie);
    assert_eq!(single.global, many.global);
    assert_eq!(single.local.shifts, many.local.shifts);
    assert_eq!(single.local.bspline, many.local.bspline);
}

#[test]
fn global_only_runs_still_carry_a_model() {
    let movie = drifting_movie(4, 5);
    let outcome = run(
        AlignConfig {
            local: None,
            ..local_config(0)
        },
        &movie,
    );
    let spline = outcome.local.bspline().unwrap();
    for t in 0..4 {
        let s = spline.shift_at(64.0, 64.0, t as f64);
        let g = outcome.global.shifts()[t];
        assert!((s.x - g.x).abs() < 1e-3 && (s.y - g.y).abs() < 1e-3);
    }
}

#[test]
fn too_few_patches_for_the_control_grid() {
    let movie = drifting_movie(3, 9);
    let pool = BufferPool::new();
    let mut aligner = MovieAligner::new(
        AlignConfig {
            local: Some(LocalConfig {
                patch_size: (64, 64),
                patches: None,
                control_points: ControlPoints::new(4, 4, 3),
            }),
            ..local_config(0)
        },
        Arc::new(HostDevice::with_pool(512 * MIB, pool.clone())),
        Arc::new(CpuFft::<f32>::new()),
        pool.clone(),
        Box::new(MemoryStore::new()),
    )
    .unwrap();
    let err = aligner
        .run(&movie, &GainCorrection::none(), None)
        .err()
        .unwrap();
    assert!(matches!(err, MovAlignError::ControlPointsExceedPatches { .. }));
    // Frames and scratch buffers are released on the error path too.
    assert!(!aligner.movie().has_full_movie());
    assert_eq!(aligner.pool().bytes_cached(movalign::MemKind::Host), 0);
}

#[test]
fn patches_larger_than_the_movie_are_rejected() {
    let movie = drifting_movie(3, 9);
    let pool = BufferPool::new();
    let mut aligner = MovieAligner::new(
        AlignConfig {
            local: Some(LocalConfig {
                patch_size: (200, 200),
                patches: Some((5, 5)),
                control_points: ControlPoints::new(4, 4, 3),
            }),
            ..local_config(0)
        },
        Arc::new(HostDevice::with_pool(512 * MIB, pool.clone())),
        Arc::new(CpuFft::<f32>::new()),
        pool,
        Box::new(MemoryStore::new()),
    )
    .unwrap();
    let err = aligner
        .run(&movie, &GainCorrection::none(), None)
        .err()
        .unwrap();
    assert!(matches!(err, MovAlignError::MovieTooSmall { .. }));
}
