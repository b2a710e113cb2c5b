#![cfg(feature = "parallel")]

use movalign::apply::{sample_bilinear, warp_frame};
use movalign::correlate::{pair_count, PlaneDims};
use movalign::{BufferPool, CorrelationEngine, CpuFft, FftProvider, FrameView, Shift};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustfft::num_complex::Complex;
use std::sync::Arc;

fn noise(len: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.random::<f32>() - 0.5).collect()
}

#[test]
fn batched_forward_matches_frame_by_frame() {
    let fft = CpuFft::<f32>::new();
    let (w, h, n) = (48, 40, 6);
    let frames = noise(w * h * n, 1);
    let spec = (w / 2 + 1) * h;

    let mut batched = vec![Complex::default(); n * spec];
    fft.forward(w, h, &frames, &mut batched).unwrap();

    for (k, frame) in frames.chunks_exact(w * h).enumerate() {
        let mut single = vec![Complex::default(); spec];
        fft.forward(w, h, frame, &mut single).unwrap();
        assert_eq!(&batched[k * spec..(k + 1) * spec], &single[..]);
    }
}

#[test]
fn correlation_batches_do_not_change_windows() {
    let pool = BufferPool::new();
    let engine = CorrelationEngine::<f32>::new(Arc::new(CpuFft::<f32>::new()), pool);
    let dims = PlaneDims::new(32, 32);
    let n = 5;
    let frames = noise(n * dims.len(), 2);
    let filter = vec![1.0f32; dims.spectrum_len()];
    let mut spectra = vec![Complex::default(); n * dims.spectrum_len()];
    engine
        .perform_fft_and_scale(&frames, dims, &mut spectra, dims, &filter)
        .unwrap();

    let window = 9;
    let run = |buffered: usize, batch: usize| {
        let mut out = vec![0.0f32; pair_count(n) * window * window];
        engine
            .compute_correlations(window, n, &spectra, dims, buffered, batch, &mut out)
            .unwrap();
        out
    };
    let reference = run(n, 1);
    assert_eq!(run(n, pair_count(n)), reference);
    assert_eq!(run(2, 3), reference);
}

#[test]
fn parallel_warp_matches_direct_sampling() {
    let (w, h) = (37, 23);
    let data = noise(w * h, 3);
    let view = FrameView::from_slice(&data, w, h).unwrap();
    let field: Vec<Shift> = (0..w * h)
        .map(|i| Shift::new((i % 7) as f64 * 0.3 - 1.0, (i % 5) as f64 * -0.25))
        .collect();
    let mut out = vec![0.0f32; w * h];
    warp_frame(&view, &field, &mut out).unwrap();

    for y in 0..h {
        for x in 0..w {
            let s = field[y * w + x];
            let want = sample_bilinear(&view, x as f64 + s.x, y as f64 + s.y);
            assert_eq!(out[y * w + x], want);
        }
    }
}
