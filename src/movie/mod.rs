//! Movie frame sources and the in-memory frame store.
//!
//! A [`MovieSource`] yields raw frames by index; [`GainCorrection`] applies
//! dark and gain references to them. [`Movie`] owns the corrected frames of
//! the frame range being aligned. Slots are fixed when the full dimension is
//! set, may be filled concurrently and in any order, and are released in bulk.

use crate::frame::FrameView;
use crate::memory::{BufferPool, MemKind, PooledBuffer};
use crate::settings::Dimensions;
use crate::trace::trace_event;
use crate::util::{MovAlignError, MovAlignResult, Real};
use rayon::prelude::*;
use rayon::ThreadPool;
use std::sync::OnceLock;

/// Ordered collection of equally sized raw frames.
pub trait MovieSource<T: Real>: Send + Sync {
    fn frame_count(&self) -> usize;

    /// `(width, height)` shared by every frame.
    fn frame_dims(&self) -> (usize, usize);

    /// Reads frame `index` into `out` (`width * height` samples, row-major).
    fn read_frame(&self, index: usize, out: &mut [T]) -> MovAlignResult<()>;
}

/// Dark and gain references applied to every loaded frame:
/// `out = (raw - dark) * gain`.
#[derive(Clone, Debug, Default)]
pub struct GainCorrection<T> {
    dark: Option<Vec<T>>,
    gain: Option<Vec<T>>,
}

impl<T: Real> GainCorrection<T> {
    /// No correction.
    pub fn none() -> Self {
        Self {
            dark: None,
            gain: None,
        }
    }

    pub fn new(dark: Option<Vec<T>>, gain: Option<Vec<T>>) -> Self {
        Self { dark, gain }
    }

    pub fn is_identity(&self) -> bool {
        self.dark.is_none() && self.gain.is_none()
    }

    /// Corrects `frame` in place. References must match the frame size.
    pub fn apply(&self, frame: &mut [T]) -> MovAlignResult<()> {
        if let Some(dark) = &self.dark {
            check_len(dark.len(), frame.len())?;
            for (v, d) in frame.iter_mut().zip(dark) {
                *v -= *d;
            }
        }
        if let Some(gain) = &self.gain {
            check_len(gain.len(), frame.len())?;
            for (v, g) in frame.iter_mut().zip(gain) {
                *v *= *g;
            }
        }
        Ok(())
    }
}

fn check_len(reference: usize, frame: usize) -> MovAlignResult<()> {
    if reference == frame {
        Ok(())
    } else {
        Err(MovAlignError::config(format!(
            "reference image has {reference} samples, frames have {frame}"
        )))
    }
}

/// Reads frame `index` from `source` and applies `correction`.
pub fn load_frame<T: Real>(
    source: &dyn MovieSource<T>,
    index: usize,
    correction: &GainCorrection<T>,
    out: &mut [T],
) -> MovAlignResult<()> {
    if index >= source.frame_count() {
        return Err(MovAlignError::IndexOutOfBounds {
            index,
            len: source.frame_count(),
            context: "movie frame",
        });
    }
    source.read_frame(index, out)?;
    correction.apply(out)
}

/// Frames held in memory; used by tests, benches and library callers that
/// decode movies themselves.
#[derive(Clone, Debug)]
pub struct InMemoryMovie<T> {
    width: usize,
    height: usize,
    frames: Vec<Vec<T>>,
}

impl<T: Real> InMemoryMovie<T> {
    /// Every frame must hold exactly `width * height` samples.
    pub fn new(width: usize, height: usize, frames: Vec<Vec<T>>) -> MovAlignResult<Self> {
        Dimensions::frames(width, height, frames.len().max(1))?;
        if let Some(bad) = frames.iter().find(|f| f.len() != width * height) {
            return Err(MovAlignError::BufferTooSmall {
                needed: width * height,
                got: bad.len(),
            });
        }
        Ok(Self {
            width,
            height,
            frames,
        })
    }

    pub fn frames(&self) -> &[Vec<T>] {
        &self.frames
    }
}

impl<T: Real> MovieSource<T> for InMemoryMovie<T> {
    fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn frame_dims(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn read_frame(&self, index: usize, out: &mut [T]) -> MovAlignResult<()> {
        let frame = self.frames.get(index).ok_or(MovAlignError::IndexOutOfBounds {
            index,
            len: self.frames.len(),
            context: "in-memory frame",
        })?;
        let got = out.len();
        let dst = out.get_mut(..frame.len()).ok_or(MovAlignError::BufferTooSmall {
            needed: frame.len(),
            got,
        })?;
        dst.copy_from_slice(frame);
        Ok(())
    }
}

/// Store of the corrected frames being aligned.
pub struct Movie<T: Real> {
    pool: BufferPool,
    dim: Option<Dimensions>,
    frames: Vec<OnceLock<PooledBuffer<T>>>,
}

impl<T: Real> Movie<T> {
    pub fn new(pool: BufferPool) -> Self {
        Self {
            pool,
            dim: None,
            frames: Vec::new(),
        }
    }

    /// Fixes the shape of the full movie and allocates one empty slot per
    /// frame. Previously held frames are released.
    pub fn set_full_dim(&mut self, dim: Dimensions) {
        self.frames = (0..dim.n()).map(|_| OnceLock::new()).collect();
        self.dim = Some(dim);
    }

    pub fn full_dim(&self) -> Option<Dimensions> {
        self.dim
    }

    /// `true` once every slot holds a frame.
    pub fn has_full_movie(&self) -> bool {
        self.dim.is_some() && self.frames.iter().all(|slot| slot.get().is_some())
    }

    /// Allocates a frame-sized host buffer from the movie's pool.
    pub fn allocate_frame(&self) -> MovAlignResult<PooledBuffer<T>> {
        let dim = self.dim.ok_or_else(|| MovAlignError::config("movie dimension is not set"))?;
        Ok(self.pool.acquire(MemKind::Host, dim.xy()))
    }

    /// Stores frame `index`. A slot is written at most once; later stores
    /// into a filled slot are dropped.
    pub fn store_frame(&self, index: usize, frame: PooledBuffer<T>) -> MovAlignResult<()> {
        let dim = self.dim.ok_or_else(|| MovAlignError::config("movie dimension is not set"))?;
        if frame.len() != dim.xy() {
            return Err(MovAlignError::BufferTooSmall {
                needed: dim.xy(),
                got: frame.len(),
            });
        }
        let slot = self.frames.get(index).ok_or(MovAlignError::IndexOutOfBounds {
            index,
            len: self.frames.len(),
            context: "movie slot",
        })?;
        let _ = slot.set(frame);
        Ok(())
    }

    /// Samples of frame `index`.
    pub fn frame(&self, index: usize) -> MovAlignResult<&[T]> {
        self.frames
            .get(index)
            .and_then(|slot| slot.get())
            .map(|buf| &buf[..])
            .ok_or(MovAlignError::FrameNotLoaded { index })
    }

    /// Frame `index` as a 2-D view.
    pub fn frame_view(&self, index: usize) -> MovAlignResult<FrameView<'_, T>> {
        let dim = self.dim.ok_or(MovAlignError::FrameNotLoaded { index })?;
        FrameView::from_slice(self.frame(index)?, dim.x(), dim.y())
    }

    /// Loads source frames `first..first + n` into slots `0..n` on `pool`,
    /// skipping slots that are already filled.
    pub fn load_frames(
        &self,
        source: &dyn MovieSource<T>,
        correction: &GainCorrection<T>,
        first: usize,
        pool: &ThreadPool,
    ) -> MovAlignResult<()> {
        let dim = self.dim.ok_or_else(|| MovAlignError::config("movie dimension is not set"))?;
        let (w, h) = source.frame_dims();
        if (w, h) != (dim.x(), dim.y()) {
            return Err(MovAlignError::config(format!(
                "source frames are {w} x {h}, movie expects {} x {}",
                dim.x(),
                dim.y()
            )));
        }
        let missing: Vec<usize> = self
            .frames
            .iter()
            .enumerate()
            .filter(|(_, cell)| cell.get().is_none())
            .map(|(slot, _)| slot)
            .collect();
        pool.install(|| {
            missing.par_iter().try_for_each(|&slot| {
                let mut buffer = self.allocate_frame()?;
                load_frame(source, first + slot, correction, &mut buffer)?;
                self.store_frame(slot, buffer)
            })
        })?;
        trace_event!("movie_loaded", frames = missing.len(), first = first);
        Ok(())
    }

    /// Returns every frame buffer to the pool and forgets the dimension.
    pub fn release_full_frames(&mut self) {
        self.frames.clear();
        self.dim = None;
    }
}
