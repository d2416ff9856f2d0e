// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::core::ShotGeometry;
use crate::error::{FwiError, Result};
use crate::propagator::{check_len, Propagator};

/// Progress information passed to the optional callback.
pub struct ModelingProgress {
    /// Shots finished so far, over all workers.
    pub shots_done: usize,
    /// Total number of shots.
    pub total: usize,
    /// Elapsed time since modeling started.
    pub elapsed: Duration,
}

/// Contiguous split of `ns` shots over `workers`.
///
/// Worker `r` owns `[r k, min(ns, (r + 1) k))` with `k = ceil(ns / workers)`;
/// trailing workers may own nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShotPartition {
    ns: usize,
    workers: usize,
}

impl ShotPartition {
    /// Split `ns` shots over `workers`.
    ///
    /// # Errors
    /// Returns an error if either count is zero.
    pub fn new(ns: usize, workers: usize) -> Result<Self> {
        if ns == 0 {
            return Err(FwiError::InvalidParameter {
                name: "ns",
                reason: "must be at least 1".to_string(),
            });
        }
        if workers == 0 {
            return Err(FwiError::InvalidParameter {
                name: "workers",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(ShotPartition { ns, workers })
    }

    /// Shots per worker.
    pub fn chunk(&self) -> usize {
        self.ns.div_ceil(self.workers)
    }

    /// Shots owned by worker `rank`.
    pub fn range(&self, rank: usize) -> Range<usize> {
        let k = self.chunk();
        (rank * k).min(self.ns)..((rank + 1) * k).min(self.ns)
    }

    /// The non-empty ranges, in worker order.
    pub fn ranges(&self) -> Vec<Range<usize>> {
        (0..self.workers)
            .map(|r| self.range(r))
            .filter(|r| !r.is_empty())
            .collect()
    }
}

/// Models every physical shot of a survey in parallel.
///
/// Each worker runs its contiguous range of shots sequentially and writes
/// its gathers into its own slice of the output, so the result is ordered
/// by shot regardless of thread count.
pub struct ShotModeler<'a> {
    prop: &'a Propagator,
    sources: &'a ShotGeometry,
    receivers: &'a ShotGeometry,
    wavelet: &'a [f32],
    num_threads: Option<usize>,
    progress_callback: Option<Box<dyn Fn(ModelingProgress) + Send + Sync>>,
}

impl<'a> ShotModeler<'a> {
    /// Create a modeler firing `wavelet` from every source in turn.
    pub fn new(
        prop: &'a Propagator,
        sources: &'a ShotGeometry,
        receivers: &'a ShotGeometry,
        wavelet: &'a [f32],
    ) -> Self {
        ShotModeler {
            prop,
            sources,
            receivers,
            wavelet,
            num_threads: None,
            progress_callback: None,
        }
    }

    /// Set the number of worker threads (builder method).
    /// If not specified, defaults to the number of available CPU cores.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.num_threads = Some(threads);
        self
    }

    /// Set a callback invoked after every finished shot (builder method).
    pub fn with_progress(mut self, callback: Box<dyn Fn(ModelingProgress) + Send + Sync>) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Model all shots.
    ///
    /// Returns `ns` gathers of `nt x ng` samples, receiver fastest.
    ///
    /// # Errors
    /// Returns the first error of any worker.
    pub fn model_all(&self) -> Result<Vec<f32>> {
        let ns = self.sources.len();
        let gather = self.wavelet.len() * self.receivers.len();
        let workers = self.get_num_threads().clamp(1, ns.max(1));
        let partition = ShotPartition::new(ns, workers)?;
        let ranges = partition.ranges();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| FwiError::Other(e.to_string()))?;

        let mut out = vec![0.0f32; ns * gather];
        let mut results: Vec<Result<()>> = ranges.iter().map(|_| Ok(())).collect();
        let done = AtomicUsize::new(0);
        let start = Instant::now();

        pool.scope(|s| {
            let chunks = out.chunks_mut(partition.chunk() * gather);
            for ((range, chunk), slot) in ranges.iter().zip(chunks).zip(results.iter_mut()) {
                let done = &done;
                s.spawn(move |_| {
                    *slot = self.model_range(range.clone(), chunk, done, start);
                });
            }
        });

        results.into_iter().collect::<Result<Vec<()>>>()?;
        debug!(
            shots = ns,
            workers,
            elapsed = ?start.elapsed(),
            "modeled all shots"
        );
        Ok(out)
    }

    fn model_range(
        &self,
        range: Range<usize>,
        out: &mut [f32],
        done: &AtomicUsize,
        start: Instant,
    ) -> Result<()> {
        let nt = self.wavelet.len();
        let gather = nt * self.receivers.len();
        check_len(out, range.len(), gather)?;
        for (k, is) in range.enumerate() {
            let shot = self.sources.clip_range(is, is + 1)?;
            self.prop.forward_modeling(
                &shot,
                self.wavelet,
                self.receivers,
                nt,
                &mut out[k * gather..(k + 1) * gather],
            )?;
            let shots_done = done.fetch_add(1, Ordering::AcqRel) + 1;
            debug!(shot = is, shots_done, "shot modeled");
            if let Some(cb) = &self.progress_callback {
                cb(ModelingProgress {
                    shots_done,
                    total: self.sources.len(),
                    elapsed: start.elapsed(),
                });
            }
        }
        Ok(())
    }

    fn get_num_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Grid, VelocityModel};
    use crate::wavelet::ricker;
    use std::sync::Arc;

    #[test]
    fn partition_covers_every_shot_once() {
        let p = ShotPartition::new(10, 4).unwrap();
        assert_eq!(p.chunk(), 3);
        assert_eq!(p.ranges(), vec![0..3, 3..6, 6..9, 9..10]);

        let p = ShotPartition::new(3, 8).unwrap();
        assert_eq!(p.ranges(), vec![0..1, 1..2, 2..3]);
        assert!(p.range(5).is_empty());

        let p = ShotPartition::new(7, 1).unwrap();
        assert_eq!(p.ranges(), vec![0..7]);

        assert!(ShotPartition::new(0, 2).is_err());
        assert!(ShotPartition::new(2, 0).is_err());
    }

    #[test]
    fn gathers_are_ordered_independent_of_threads() {
        let grid = Grid::new(20, 30, 8, 10.0, 10.0).unwrap();
        let velocity = vec![2000.0; grid.interior_len()];
        let prop = Propagator::new(VelocityModel::from_velocity(grid, 0.001, &velocity).unwrap());
        let sources = ShotGeometry::new(&grid, "source", 1, 3, 0, 8, 3).unwrap();
        let receivers = ShotGeometry::new(&grid, "receiver", 1, 0, 0, 3, 10).unwrap();
        let wavelet = ricker(150, 0.001, 20.0, 1.0).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let parallel = ShotModeler::new(&prop, &sources, &receivers, &wavelet)
            .with_threads(2)
            .with_progress(Box::new(move |info: ModelingProgress| {
                assert_eq!(info.total, 3);
                counter.fetch_add(1, Ordering::Relaxed);
            }))
            .model_all()
            .unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), 3);

        let gather = 150 * 10;
        assert_eq!(parallel.len(), 3 * gather);
        for is in 0..3 {
            let shot = sources.clip_range(is, is + 1).unwrap();
            let mut single = vec![0.0; gather];
            prop.forward_modeling(&shot, &wavelet, &receivers, 150, &mut single)
                .unwrap();
            assert_eq!(&parallel[is * gather..(is + 1) * gather], single.as_slice());
        }

        let serial = ShotModeler::new(&prop, &sources, &receivers, &wavelet)
            .with_threads(1)
            .model_all()
            .unwrap();
        assert_eq!(serial, parallel);
    }
}
