// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Forward-field reconstruction for the backward (adjoint) pass.
//!
//! The gradient needs the forward wavefield in reverse time order. A
//! [`Reconstruction`] strategy observes the forward pass through
//! [`Reconstruction::record`] and then hands back the field of each step,
//! latest first, through [`Reconstruction::backward`].

use std::path::PathBuf;

use tracing::debug;

use crate::checkpoint::{BufferRole, CheckpointStore, DiskStore, MemoryStore};
use crate::core::ShotGeometry;
use crate::error::{FwiError, Result};
use crate::propagator::Propagator;

/// The source term injected during the forward pass.
#[derive(Debug, Clone, Copy)]
pub struct ForwardSource<'a> {
    /// Source positions.
    pub geometry: &'a ShotGeometry,
    /// `nt x ns` source samples.
    pub samples: &'a [f32],
}

impl<'a> ForwardSource<'a> {
    /// Source samples of step `it`.
    pub fn at(&self, it: usize) -> &'a [f32] {
        let ns = self.geometry.len();
        &self.samples[it * ns..(it + 1) * ns]
    }
}

/// Strategy for recovering the forward wavefield in reverse time order.
///
/// The forward field of step `it` is `q_it`, the pressure after the source
/// sample of step `it` was injected.
pub trait Reconstruction {
    /// Short strategy name for logs.
    fn name(&self) -> &'static str;

    /// Observe step `it` of the forward pass: `prev` is `q_{it-1}` (zero at
    /// the first step) and `curr` is `q_it`.
    fn record(&mut self, prop: &Propagator, it: usize, prev: &[f32], curr: &[f32]) -> Result<()>;

    /// Hand over the final forward buffers: `prev` is `q_{nt-1}` and `curr`
    /// the field one step later.
    fn begin_backward(&mut self, prop: &Propagator, prev: Vec<f32>, curr: Vec<f32>) -> Result<()>;

    /// Return `q_it`, writing its Laplacian into `lap` and adding its square
    /// into `illum` over the deep interior.
    ///
    /// Must be called for `it = nt - 1, nt - 2, ...` in that order; the
    /// caller may stop early.
    fn backward(
        &mut self,
        prop: &Propagator,
        source: &ForwardSource<'_>,
        it: usize,
        lap: &mut [f32],
        illum: &mut [f32],
    ) -> Result<&[f32]>;
}

/// Configured reconstruction strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconstructionKind {
    /// Save the boundary shell every step and run the stencil backward.
    Boundary,
    /// Save full wavefield pairs every `interval` steps and replay segments.
    Checkpoint {
        /// Steps between checkpoints.
        interval: usize,
        /// Directory for checkpoint files; in memory when `None`.
        dir: Option<PathBuf>,
    },
}

impl ReconstructionKind {
    /// Instantiate the strategy. `tag` separates on-disk checkpoints of
    /// concurrently processed super-shots.
    pub fn build(&self, tag: usize) -> Result<Box<dyn Reconstruction>> {
        match self {
            ReconstructionKind::Boundary => Ok(Box::new(BoundaryReconstruction::new())),
            ReconstructionKind::Checkpoint {
                interval,
                dir: None,
            } => Ok(Box::new(CheckpointReconstruction::new(
                MemoryStore::new(),
                *interval,
            )?)),
            ReconstructionKind::Checkpoint {
                interval,
                dir: Some(dir),
            } => {
                let store = DiskStore::new(dir.join(format!("shot_{}", tag)))?;
                Ok(Box::new(CheckpointReconstruction::new(store, *interval)?))
            }
        }
    }
}

fn out_of_order(expected: Option<usize>, it: usize) -> FwiError {
    FwiError::Other(format!(
        "backward reconstruction requested step {} but expected {:?}",
        it, expected
    ))
}

/// Boundary-trace reconstruction.
///
/// Stores the outermost `FD_HALF` interior layers on the left, right and
/// bottom sides at every step. Backward, the undamped stencil is solved for
/// the earlier level over the deep interior and the stored shell is put
/// back around it.
#[derive(Debug, Default)]
pub struct BoundaryReconstruction {
    shells: Vec<f32>,
    shell_len: usize,
    steps: usize,
    curr: Vec<f32>,
    next: Vec<f32>,
    pending: Option<usize>,
    expected: Option<usize>,
}

impl BoundaryReconstruction {
    /// An empty strategy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded steps.
    pub fn steps(&self) -> usize {
        self.steps
    }
}

impl Reconstruction for BoundaryReconstruction {
    fn name(&self) -> &'static str {
        "boundary"
    }

    fn record(&mut self, prop: &Propagator, it: usize, _prev: &[f32], curr: &[f32]) -> Result<()> {
        if it == 0 {
            self.shells.clear();
            self.shell_len = prop.boundary_len();
            self.steps = 0;
        }
        if it != self.steps {
            return Err(FwiError::Other(format!(
                "forward step {} recorded out of order (expected {})",
                it, self.steps
            )));
        }
        let start = self.shells.len();
        self.shells.resize(start + self.shell_len, 0.0);
        prop.write_boundary(curr, &mut self.shells[start..]);
        self.steps += 1;
        Ok(())
    }

    fn begin_backward(&mut self, _prop: &Propagator, prev: Vec<f32>, curr: Vec<f32>) -> Result<()> {
        self.curr = prev;
        self.next = curr;
        self.pending = None;
        self.expected = self.steps.checked_sub(1);
        Ok(())
    }

    fn backward(
        &mut self,
        prop: &Propagator,
        source: &ForwardSource<'_>,
        it: usize,
        lap: &mut [f32],
        illum: &mut [f32],
    ) -> Result<&[f32]> {
        if self.expected != Some(it) {
            return Err(out_of_order(self.expected, it));
        }
        if let Some(later) = self.pending.take() {
            // curr holds q_later and next holds q_it: strip the source
            // sample so curr becomes the un-injected pressure, then swap
            prop.sub_source(&mut self.curr, source.at(later), source.geometry);
            std::mem::swap(&mut self.curr, &mut self.next);
        }
        prop.step_backward(&mut self.next, &self.curr, lap, illum);
        if it > 0 {
            let l = self.shell_len;
            prop.read_boundary(&self.shells[(it - 1) * l..it * l], &mut self.next);
        }
        self.pending = Some(it);
        self.expected = it.checked_sub(1);
        Ok(&self.curr)
    }
}

/// Checkpoint-replay reconstruction.
///
/// Saves the wavefield pair every `interval` steps into a
/// [`CheckpointStore`]. A backward request loads the checkpoint opening the
/// segment that contains the step, replays that segment forward into a
/// cache and serves fields from it. Replay repeats the forward arithmetic
/// exactly, so the served fields are bit-identical to the forward pass.
#[derive(Debug)]
pub struct CheckpointReconstruction<S: CheckpointStore> {
    store: S,
    interval: usize,
    steps: usize,
    segment: Option<usize>,
    cache: Vec<Vec<f32>>,
}

impl<S: CheckpointStore> CheckpointReconstruction<S> {
    /// Checkpoint every `interval` steps into `store`.
    ///
    /// # Errors
    /// Returns an error if `interval` is zero.
    pub fn new(store: S, interval: usize) -> Result<Self> {
        if interval == 0 {
            return Err(FwiError::InvalidParameter {
                name: "checkpoint_interval",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(CheckpointReconstruction {
            store,
            interval,
            steps: 0,
            segment: None,
            cache: Vec::new(),
        })
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    fn replay(&mut self, prop: &Propagator, source: &ForwardSource<'_>, segment: usize) -> Result<()> {
        let start = segment * self.interval;
        let end = (start + self.interval).min(self.steps);
        let len = prop.grid().padded_len();
        let mut p0 = self.store.load_exact(start, BufferRole::Previous, len)?;
        let mut p1 = self.store.load_exact(start, BufferRole::Current, len)?;
        debug!(start, end, "replaying checkpoint segment");

        self.cache.clear();
        self.cache.push(p1.clone());
        for j in start + 1..end {
            prop.step_forward(&mut p0, &p1);
            std::mem::swap(&mut p0, &mut p1);
            prop.add_source(&mut p1, source.at(j), source.geometry);
            self.cache.push(p1.clone());
        }
        self.segment = Some(segment);
        Ok(())
    }
}

impl<S: CheckpointStore> Reconstruction for CheckpointReconstruction<S> {
    fn name(&self) -> &'static str {
        "checkpoint"
    }

    fn record(&mut self, _prop: &Propagator, it: usize, prev: &[f32], curr: &[f32]) -> Result<()> {
        if it % self.interval == 0 {
            self.store.save(it, BufferRole::Previous, prev)?;
            self.store.save(it, BufferRole::Current, curr)?;
        }
        self.steps = it + 1;
        Ok(())
    }

    fn begin_backward(&mut self, _prop: &Propagator, _prev: Vec<f32>, _curr: Vec<f32>) -> Result<()> {
        self.segment = None;
        self.cache.clear();
        Ok(())
    }

    fn backward(
        &mut self,
        prop: &Propagator,
        source: &ForwardSource<'_>,
        it: usize,
        lap: &mut [f32],
        illum: &mut [f32],
    ) -> Result<&[f32]> {
        if it >= self.steps {
            return Err(out_of_order(self.steps.checked_sub(1), it));
        }
        let segment = it / self.interval;
        if self.segment != Some(segment) {
            self.replay(prop, source, segment)?;
        }
        let field = &self.cache[it - segment * self.interval];
        prop.deep_laplacian(field, lap, illum);
        Ok(field)
    }
}
