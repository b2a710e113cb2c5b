//! Named rayon pools for the loader and device stages.
//!
//! A loader job that needs the device calls [`rayon::ThreadPool::install`] on
//! the device pool, which blocks the loader thread until the work is done.
//! At most `cpu_threads` loader jobs and `streams` device jobs run at once.

use crate::util::{MovAlignError, MovAlignResult};
use rayon::{ThreadPool, ThreadPoolBuilder};

/// Builds a pool of `threads` workers (at least one) named after `name`.
pub fn build_pool(name: &'static str, threads: usize) -> MovAlignResult<ThreadPool> {
    ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(move |i| format!("movalign-{name}-{i}"))
        .build()
        .map_err(|e| MovAlignError::ThreadPool {
            pool: name,
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::build_pool;
    use rayon::prelude::*;

    #[test]
    fn pools_are_sized_and_named() {
        let gpu = build_pool("gpu", 0).unwrap();
        assert_eq!(gpu.current_num_threads(), 1);
        let name = gpu.install(|| std::thread::current().name().map(str::to_owned));
        assert_eq!(name.as_deref(), Some("movalign-gpu-0"));
        assert_eq!(build_pool("cpu", 3).unwrap().current_num_threads(), 3);
    }

    #[test]
    fn loader_jobs_wait_on_the_device_pool() {
        let cpu = build_pool("cpu", 3).unwrap();
        let gpu = build_pool("gpu", 1).unwrap();
        let squares: Vec<usize> = cpu.install(|| {
            (0..8usize)
                .into_par_iter()
                .map(|i| {
                    gpu.install(|| {
                        let name = std::thread::current().name().map(str::to_owned);
                        assert_eq!(name.as_deref(), Some("movalign-gpu-0"));
                        i * i
                    })
                })
                .collect()
        });
        assert_eq!(squares, vec![0, 1, 4, 9, 16, 25, 36, 49]);
    }
}
