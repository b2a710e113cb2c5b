//! Frame input and average output through the `image` crate.
//!
//! Available when the `image-io` feature is enabled.

use crate::movie::MovieSource;
use crate::util::{MovAlignError, MovAlignResult, Real};
use image::{DynamicImage, ImageBuffer, Luma};
use std::path::{Path, PathBuf};

fn io_error(err: impl std::fmt::Display) -> MovAlignError {
    MovAlignError::ImageIo {
        reason: err.to_string(),
    }
}

/// Converts a decoded image to grayscale samples.
///
/// 8- and 16-bit grayscale images keep their raw counts; every other layout
/// goes through the crate's luminance conversion.
pub fn gray_samples<T: Real>(img: &DynamicImage) -> (usize, usize, Vec<T>) {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let samples = match img {
        DynamicImage::ImageLuma8(gray) => gray.as_raw().iter().map(|&v| T::cast(v as f64)).collect(),
        DynamicImage::ImageLuma16(gray) => {
            gray.as_raw().iter().map(|&v| T::cast(v as f64)).collect()
        }
        other => other
            .to_luma32f()
            .as_raw()
            .iter()
            .map(|&v| T::cast(v as f64))
            .collect(),
    };
    (w, h, samples)
}

/// Loads one image file as a grayscale frame.
pub fn load_gray_frame<T: Real, P: AsRef<Path>>(path: P) -> MovAlignResult<(usize, usize, Vec<T>)> {
    let img = image::open(path).map_err(io_error)?;
    Ok(gray_samples(&img))
}

/// Writes `data` as a 16-bit grayscale image, stretching its range to the
/// full `u16` scale. A constant image is written as zeros.
pub fn save_gray16<T: Real, P: AsRef<Path>>(
    path: P,
    width: usize,
    height: usize,
    data: &[T],
) -> MovAlignResult<()> {
    let samples = data.get(..width * height).ok_or(MovAlignError::BufferTooSmall {
        needed: width * height,
        got: data.len(),
    })?;
    let (lo, hi) = samples.iter().fold((f64::MAX, f64::MIN), |(lo, hi), v| {
        let v = v.as_f64();
        (lo.min(v), hi.max(v))
    });
    let range = hi - lo;
    let pixels: Vec<u16> = samples
        .iter()
        .map(|v| {
            if range > 0.0 {
                ((v.as_f64() - lo) / range * u16::MAX as f64).round() as u16
            } else {
                0
            }
        })
        .collect();
    let buffer = ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(width as u32, height as u32, pixels)
        .ok_or_else(|| io_error(format!("cannot build a {width} x {height} image")))?;
    buffer.save(path).map_err(io_error)
}

/// Movie stored as one image file per frame.
///
/// Only the frame size is read up front; frames are decoded on demand.
#[derive(Clone, Debug)]
pub struct ImageSequence {
    paths: Vec<PathBuf>,
    width: usize,
    height: usize,
}

impl ImageSequence {
    /// Opens a sequence; all files must share the size of the first one.
    pub fn open(paths: Vec<PathBuf>) -> MovAlignResult<Self> {
        let first = paths
            .first()
            .ok_or_else(|| MovAlignError::config("image sequence is empty"))?;
        let (width, height) = image::image_dimensions(first).map_err(io_error)?;
        Ok(Self {
            paths,
            width: width as usize,
            height: height as usize,
        })
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl<T: Real> MovieSource<T> for ImageSequence {
    fn frame_count(&self) -> usize {
        self.paths.len()
    }

    fn frame_dims(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn read_frame(&self, index: usize, out: &mut [T]) -> MovAlignResult<()> {
        let path = self.paths.get(index).ok_or(MovAlignError::IndexOutOfBounds {
            index,
            len: self.paths.len(),
            context: "image sequence",
        })?;
        let (w, h, samples) = load_gray_frame::<T, _>(path)?;
        if (w, h) != (self.width, self.height) {
            return Err(io_error(format!(
                "{} is {w} x {h}, expected {} x {}",
                path.display(),
                self.width,
                self.height
            )));
        }
        let dst = out.get_mut(..samples.len()).ok_or(MovAlignError::BufferTooSmall {
            needed: samples.len(),
            got: out.len(),
        })?;
        dst.copy_from_slice(&samples);
        Ok(())
    }
}
