//! MovAlign is a motion-correction engine for cryo-EM movies.
//!
//! Frames are registered by pairwise cross-correlation of downscaled,
//! low-pass filtered spectra; an over-determined least-squares system turns
//! the pairwise peaks into per-frame shifts. Local alignment repeats this on
//! overlapping patches and smooths the result with a cubic B-spline over
//! space and time, through which every frame is resampled and averaged.
//!
//! The engine runs on the CPU (`CpuFft`, `HostDevice`). Loader and device
//! stages run on two rayon pools; the `parallel` feature additionally splits
//! the inner loops, and `simd` vectorises accumulation.

pub mod align;
pub mod apply;
pub mod bench;
pub mod correlate;
pub mod device;
pub mod fft;
pub mod frame;
pub mod local;
pub mod memory;
pub mod movie;
mod refine;
pub mod settings;
pub mod shift;
mod trace;
pub mod util;

pub use align::{AlignConfig, AlignmentOutcome, FrameRanges, LocalConfig, MovieAligner};
pub use apply::{AlignedFrameSink, ApplyParams, Averages};
pub use bench::{BenchmarkKey, MemoryStore, SettingsStore, SizeSelector, StoredSizes};
pub use correlate::CorrelationEngine;
pub use device::{Device, HostDevice};
pub use fft::{CpuFft, FftProvider};
pub use frame::FrameView;
pub use local::{BSplineGrid, ControlPoints, FramePatchMeta, LocalAlignmentResult, PatchRect};
pub use memory::{BufferPool, MemKind, PooledBuffer};
pub use movie::{GainCorrection, InMemoryMovie, Movie, MovieSource};
pub use settings::{Dimensions, FftSettings};
pub use shift::{AlignmentResult, Shift};
pub use util::{MovAlignError, MovAlignResult, Real};

#[cfg(feature = "settings-file")]
pub use bench::JsonFileStore;
#[cfg(feature = "image-io")]
pub use frame::io::ImageSequence;
