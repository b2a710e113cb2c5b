//! Compute device abstraction.
//!
//! The alignment engine only needs four things from a device: to make it
//! current, to refresh and read its free memory, and to wait for outstanding
//! work. [`HostDevice`] runs everything on the CPU against a configured memory
//! budget.

use crate::memory::{BufferPool, MemKind};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Handle to the device executing transforms and correlations.
pub trait Device: Send + Sync {
    /// Makes the device current for the calling thread.
    fn set(&self);

    /// Refreshes the cached free-memory figure.
    fn update_memory_info(&self);

    /// Free memory in bytes as of the last [`Device::update_memory_info`].
    fn last_free_bytes(&self) -> usize;

    /// Blocks until all outstanding work on the device completes.
    fn synch(&self);
}

/// CPU-backed device with a fixed memory budget.
///
/// When constructed with a [`BufferPool`], device-kind buffers currently on
/// loan are subtracted from the budget on every memory refresh.
pub struct HostDevice {
    budget: usize,
    last_free: AtomicUsize,
    pool: Option<BufferPool>,
}

impl HostDevice {
    /// Device with `budget` bytes of memory.
    pub fn with_budget(budget: usize) -> Self {
        Self {
            budget,
            last_free: AtomicUsize::new(budget),
            pool: None,
        }
    }

    /// Device whose free memory tracks device buffers on loan from `pool`.
    pub fn with_pool(budget: usize, pool: BufferPool) -> Self {
        Self {
            budget,
            last_free: AtomicUsize::new(budget),
            pool: Some(pool),
        }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }
}

impl Device for HostDevice {
    fn set(&self) {}

    fn update_memory_info(&self) {
        let used = self
            .pool
            .as_ref()
            .map(|pool| pool.bytes_in_use(MemKind::Device))
            .unwrap_or(0);
        self.last_free
            .store(self.budget.saturating_sub(used), Ordering::Relaxed);
    }

    fn last_free_bytes(&self) -> usize {
        self.last_free.load(Ordering::Relaxed)
    }

    fn synch(&self) {}
}

/// Number of concurrent streams for per-frame device work.
///
/// Every stream needs about two full frames of device memory; at most four
/// streams are used and at least one.
pub fn stream_count(device: &dyn Device, frame_bytes: usize) -> usize {
    device.update_memory_info();
    let free = device.last_free_bytes();
    let mut count = 4usize;
    while count > 1 && 2 * count * frame_bytes > free {
        count -= 1;
    }
    count
}
