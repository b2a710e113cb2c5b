//! Transform size and batch selection.
//!
//! [`SizeSelector::select_settings`] turns a requested buffer shape into
//! [`FftSettings`] that fit the device: a cached answer is reused when the
//! device has at least as much free memory as when it was measured; otherwise
//! the FFT provider is asked for the best shape (or, with autotuning off, the
//! largest batch of the requested shape) and the outcome is cached.

mod store;

#[cfg(feature = "settings-file")]
pub use store::JsonFileStore;
pub use store::{BenchmarkKey, MemoryStore, SettingsStore, StoredSizes};

use crate::device::Device;
use crate::fft::FftProvider;
use crate::settings::{Dimensions, FftSettings};
use crate::trace::{trace_event, trace_span};
use crate::util::math::mb;
use crate::util::{MovAlignError, MovAlignResult, Real};
use std::sync::{Arc, Mutex};

/// Size tolerance when the shape may shrink (data is cropped).
pub const CROP_TOLERANCE_PERCENT: usize = 10;
/// Size tolerance when the shape may grow (data is padded).
pub const PAD_TOLERANCE_PERCENT: usize = 20;

/// Chooses transform shapes and batch sizes against the device memory.
pub struct SizeSelector<T: Real> {
    device: Arc<dyn Device>,
    fft: Arc<dyn FftProvider<T>>,
    store: Mutex<Box<dyn SettingsStore>>,
    skip_autotuning: bool,
}

impl<T: Real> SizeSelector<T> {
    pub fn new(
        device: Arc<dyn Device>,
        fft: Arc<dyn FftProvider<T>>,
        store: Box<dyn SettingsStore>,
        skip_autotuning: bool,
    ) -> Self {
        Self {
            device,
            fft,
            store: Mutex::new(store),
            skip_autotuning,
        }
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub fn fft(&self) -> &Arc<dyn FftProvider<T>> {
        &self.fft
    }

    /// Bytes one batch of `settings` occupies on the device.
    pub fn estimate_bytes(&self, settings: &FftSettings) -> usize {
        self.fft.required_bytes(settings)
    }

    /// Selects settings for `requested`, leaving `extra_bytes` of device
    /// memory untouched. `allow_crop` lets the shape shrink instead of grow.
    ///
    /// Fails with [`MovAlignError::OutOfMemory`] if not a single item fits.
    pub fn select_settings(
        &self,
        operation: &str,
        requested: Dimensions,
        extra_bytes: usize,
        allow_crop: bool,
    ) -> MovAlignResult<FftSettings> {
        let _span = trace_span!("select_settings", operation = operation).entered();
        let key = BenchmarkKey::new(operation, requested, allow_crop);
        self.device.update_memory_info();
        let free = self.device.last_free_bytes();

        let mut store = self.store.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(stored) = store.find(&key) {
            if stored.min_memory_mb <= mb(free) {
                let s_dim = Dimensions::new(stored.x, stored.y, requested.z(), requested.n())?;
                let settings = FftSettings::new(s_dim, stored.batch.min(requested.n()))?;
                trace_event!("settings_cached", key = key.as_str(), batch = settings.batch());
                return Ok(settings);
            }
        }

        let hint = FftSettings::whole(requested)?;
        let found = if self.skip_autotuning {
            self.fft
                .find_max_batch(&hint, free.saturating_sub(extra_bytes))
        } else {
            let tolerance = if allow_crop {
                CROP_TOLERANCE_PERCENT
            } else {
                PAD_TOLERANCE_PERCENT
            };
            self.fft.find_optimal_shape(
                &hint,
                extra_bytes,
                requested.is_square(),
                tolerance,
                allow_crop,
                free,
            )
        };
        let found = found.ok_or(MovAlignError::OutOfMemory {
            context: "no transform shape fits the available device memory",
        })?;
        let settings = found.copy_for_batch(balanced_batch(requested.n(), found.batch()))?;

        store.insert(
            &key,
            StoredSizes {
                x: settings.s_dim().x(),
                y: settings.s_dim().y(),
                batch: settings.batch(),
                min_memory_mb: mb(free),
            },
        );
        store.flush()?;
        trace_event!(
            "settings_benchmarked",
            key = key.as_str(),
            x = settings.s_dim().x(),
            y = settings.s_dim().y(),
            batch = settings.batch()
        );
        Ok(settings)
    }
}

/// Shrinks `batch` so that `n` items split into equally sized batches.
pub(crate) fn balanced_batch(n: usize, batch: usize) -> usize {
    if batch == 0 || batch >= n {
        return batch.min(n).max(1);
    }
    n / n.div_ceil(batch)
}

#[cfg(test)]
mod tests {
    use super::balanced_batch;

    #[test]
    fn batches_are_balanced() {
        assert_eq!(balanced_batch(10, 4), 3);
        assert_eq!(balanced_batch(10, 5), 5);
        assert_eq!(balanced_batch(10, 12), 10);
        assert_eq!(balanced_batch(7, 1), 1);
        assert_eq!(balanced_batch(40, 13), 10);
    }
}
