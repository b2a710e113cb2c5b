//! Typed, reusable scratch buffers.
//!
//! [`BufferPool`] is an explicit, injected allocator: components receive a
//! pool handle through their constructors and acquire buffers by element type,
//! memory kind and length. Returned buffers are cached and handed out again to
//! the next request of the same type and kind whose length fits, smallest
//! capacity first. A [`PooledBuffer`] goes back to the pool when dropped, so
//! every path (including early returns on error) releases its scratch space.

use std::any::{Any, TypeId};
use std::mem::size_of;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};

/// Where a buffer notionally lives.
///
/// The host implementation backs every kind with ordinary heap memory; the
/// kind only keeps pools for different purposes apart and lets device-side
/// caches be dropped independently.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemKind {
    /// Pageable host memory (movie frames, result buffers).
    Host,
    /// Host memory staged for transfers (per-worker frame batches).
    Pinned,
    /// Device memory (transform workspaces, correlation batches).
    Device,
}

struct FreeBlock {
    kind: MemKind,
    type_id: TypeId,
    capacity: usize,
    bytes: usize,
    data: Box<dyn Any + Send>,
}

#[derive(Default)]
struct PoolState {
    free: Vec<FreeBlock>,
    bytes_in_use: [usize; 3],
    bytes_cached: [usize; 3],
}

fn kind_slot(kind: MemKind) -> usize {
    match kind {
        MemKind::Host => 0,
        MemKind::Pinned => 1,
        MemKind::Device => 2,
    }
}

/// Shared pool of reusable buffers. Cloning yields another handle to the
/// same pool.
#[derive(Clone, Default)]
pub struct BufferPool {
    state: Arc<Mutex<PoolState>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // A panic while holding the lock cannot leave the block list in a
        // torn state, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Acquires a zero-filled buffer of `len` elements.
    pub fn acquire<T>(&self, kind: MemKind, len: usize) -> PooledBuffer<T>
    where
        T: Copy + Default + Send + 'static,
    {
        let type_id = TypeId::of::<Vec<T>>();
        let recycled = {
            let mut state = self.lock();
            let best = state
                .free
                .iter()
                .enumerate()
                .filter(|(_, b)| b.kind == kind && b.type_id == type_id && b.capacity >= len)
                .min_by_key(|(_, b)| b.capacity)
                .map(|(idx, _)| idx);
            let block = best.map(|idx| state.free.swap_remove(idx));
            if let Some(block) = &block {
                state.bytes_cached[kind_slot(kind)] -= block.bytes;
            }
            state.bytes_in_use[kind_slot(kind)] += len * size_of::<T>();
            block
        };

        let mut data = recycled
            .and_then(|block| block.data.downcast::<Vec<T>>().ok())
            .map(|boxed| *boxed)
            .unwrap_or_else(|| Vec::with_capacity(len));
        data.clear();
        data.resize(len, T::default());

        PooledBuffer {
            data,
            kind,
            pool: self.clone(),
        }
    }

    fn give<T: Send + 'static>(&self, kind: MemKind, data: Vec<T>, len: usize) {
        let capacity = data.capacity();
        let bytes = capacity * size_of::<T>();
        let mut state = self.lock();
        let slot = kind_slot(kind);
        state.bytes_in_use[slot] = state.bytes_in_use[slot].saturating_sub(len * size_of::<T>());
        if capacity == 0 {
            return;
        }
        state.bytes_cached[slot] += bytes;
        state.free.push(FreeBlock {
            kind,
            type_id: TypeId::of::<Vec<T>>(),
            capacity,
            bytes,
            data: Box::new(data),
        });
    }

    /// Drops all cached (not in-use) buffers of the given kind.
    pub fn release_cached(&self, kind: MemKind) {
        let mut state = self.lock();
        state.free.retain(|b| b.kind != kind);
        state.bytes_cached[kind_slot(kind)] = 0;
    }

    /// Drops every cached buffer.
    pub fn release_all(&self) {
        let mut state = self.lock();
        state.free.clear();
        state.bytes_cached = [0; 3];
    }

    /// Bytes currently handed out for `kind`.
    pub fn bytes_in_use(&self, kind: MemKind) -> usize {
        self.lock().bytes_in_use[kind_slot(kind)]
    }

    /// Bytes held in the free list for `kind`.
    pub fn bytes_cached(&self, kind: MemKind) -> usize {
        self.lock().bytes_cached[kind_slot(kind)]
    }
}

/// Buffer on loan from a [`BufferPool`]; returned to it on drop.
pub struct PooledBuffer<T: Send + 'static> {
    data: Vec<T>,
    kind: MemKind,
    pool: BufferPool,
}

impl<T: Send + 'static> PooledBuffer<T> {
    pub fn kind(&self) -> MemKind {
        self.kind
    }
}

impl<T: Send + 'static> Deref for PooledBuffer<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.data
    }
}

impl<T: Send + 'static> DerefMut for PooledBuffer<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl<T: Send + 'static> Drop for PooledBuffer<T> {
    fn drop(&mut self) {
        let len = self.data.len();
        let data = std::mem::take(&mut self.data);
        self.pool.give(self.kind, data, len);
    }
}

impl<T: Send + 'static> std::fmt::Debug for PooledBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("kind", &self.kind)
            .field("len", &self.data.len())
            .finish()
    }
}
