//! SIMD accumulation kernels using the `wide` crate.
//!
//! Frame averaging adds whole frames into a running sum; the loop is
//! vectorized to process 8 (`f32`) or 4 (`f64`) samples at a time.

use wide::{f32x8, f64x4};

const LANES_F32: usize = 8;
const LANES_F64: usize = 4;

/// Load 8 f32 values into f32x8.
#[inline]
fn load_f32x8(slice: &[f32]) -> f32x8 {
    f32x8::from([
        slice[0], slice[1], slice[2], slice[3], slice[4], slice[5], slice[6], slice[7],
    ])
}

#[inline]
fn load_f64x4(slice: &[f64]) -> f64x4 {
    f64x4::from([slice[0], slice[1], slice[2], slice[3]])
}

pub(crate) fn accumulate_f32(dst: &mut [f32], src: &[f32]) {
    let len = dst.len().min(src.len());
    let body = len - len % LANES_F32;
    for start in (0..body).step_by(LANES_F32) {
        let sum = load_f32x8(&dst[start..]) + load_f32x8(&src[start..]);
        dst[start..start + LANES_F32].copy_from_slice(&sum.to_array());
    }
    for idx in body..len {
        dst[idx] += src[idx];
    }
}

pub(crate) fn accumulate_f64(dst: &mut [f64], src: &[f64]) {
    let len = dst.len().min(src.len());
    let body = len - len % LANES_F64;
    for start in (0..body).step_by(LANES_F64) {
        let sum = load_f64x4(&dst[start..]) + load_f64x4(&src[start..]);
        dst[start..start + LANES_F64].copy_from_slice(&sum.to_array());
    }
    for idx in body..len {
        dst[idx] += src[idx];
    }
}
