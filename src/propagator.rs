// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use rayon::prelude::*;
use tracing::warn;

use crate::core::{Grid, ShotGeometry, VelocityModel, FD_HALF};
use crate::error::{FwiError, Result};
use crate::update_kernels::{self, damping_profile, laplacian_at, MAX_DAMPING};

/// Largest Courant number `vmax * dt / dx` the 10th-order stencil tolerates.
pub const STABILITY_LIMIT: f32 = 0.5;

/// Damped acoustic wave propagator bound to one velocity model.
///
/// Owns the model and the sponge profile; wavefield buffers are owned by the
/// caller and passed in by reference.
#[derive(Debug, Clone)]
pub struct Propagator {
    model: VelocityModel,
    damp: Vec<f32>,
    max_damping: f32,
}

impl Propagator {
    /// Create a propagator with the default sponge strength.
    pub fn new(model: VelocityModel) -> Self {
        let damp = damping_profile(model.grid(), MAX_DAMPING);
        let prop = Propagator {
            model,
            damp,
            max_damping: MAX_DAMPING,
        };
        let courant = prop.courant_number();
        if courant > STABILITY_LIMIT {
            warn!(
                courant,
                limit = STABILITY_LIMIT,
                "Courant number exceeds the stability limit"
            );
        }
        prop
    }

    /// Set the peak sponge damping (builder method). Zero disables the sponge.
    ///
    /// # Errors
    /// Returns an error unless `0 <= max_damping < 1`.
    pub fn with_max_damping(mut self, max_damping: f32) -> Result<Self> {
        if !(0.0..1.0).contains(&max_damping) {
            return Err(FwiError::InvalidParameter {
                name: "max_damping",
                reason: format!("{} (must be in [0, 1))", max_damping),
            });
        }
        self.damp = damping_profile(self.model.grid(), max_damping);
        self.max_damping = max_damping;
        Ok(self)
    }

    /// The velocity model.
    pub fn model(&self) -> &VelocityModel {
        &self.model
    }

    /// The padded grid.
    pub fn grid(&self) -> &Grid {
        self.model.grid()
    }

    /// Peak sponge damping.
    pub fn max_damping(&self) -> f32 {
        self.max_damping
    }

    /// Replace the velocity model, keeping the sponge.
    ///
    /// # Errors
    /// Returns an error if the new model lives on a different grid.
    pub fn set_model(&mut self, model: VelocityModel) -> Result<()> {
        if model.grid() != self.model.grid() {
            return Err(FwiError::ShapeMismatch {
                expected: vec![self.grid().nx_pad(), self.grid().nz_pad()],
                got: vec![model.grid().nx_pad(), model.grid().nz_pad()],
            });
        }
        self.model = model;
        Ok(())
    }

    /// A propagator sharing this sponge but driven by another model.
    pub fn with_model(&self, model: VelocityModel) -> Result<Self> {
        let mut prop = self.clone();
        prop.set_model(model)?;
        Ok(prop)
    }

    /// `vmax * dt / dx` for the current model.
    pub fn courant_number(&self) -> f32 {
        let (_, vmax) = self.model.velocity_range();
        vmax * self.model.dt() / self.grid().dx()
    }

    /// A zeroed wavefield buffer.
    pub fn new_field(&self) -> Vec<f32> {
        vec![0.0; self.grid().padded_len()]
    }

    /// Advance one step: `prev` is overwritten with the next time level.
    pub fn step_forward(&self, prev: &mut [f32], curr: &[f32]) {
        update_kernels::step_forward(
            prev,
            curr,
            self.model.data(),
            &self.damp,
            self.grid().nz_pad(),
        );
    }

    /// Reverse one undamped step over the deep interior: `next` is
    /// overwritten with the earlier level, `lap` receives `L(curr)` and
    /// `illum` accumulates `curr²`.
    pub fn step_backward(
        &self,
        next: &mut [f32],
        curr: &[f32],
        lap: &mut [f32],
        illum: &mut [f32],
    ) {
        update_kernels::step_backward(next, curr, self.model.data(), lap, illum, self.grid());
    }

    /// Laplacian over the deep interior, with `curr²` added to `illum`.
    pub fn deep_laplacian(&self, field: &[f32], lap: &mut [f32], illum: &mut [f32]) {
        let g = self.grid();
        let nz_pad = g.nz_pad();
        update_kernels::laplacian(field, lap, nz_pad, g.deep_rows(), g.deep_cols());
        for ix in g.deep_cols() {
            for iz in g.deep_rows() {
                let i = ix * nz_pad + iz;
                illum[i] += field[i] * field[i];
            }
        }
    }

    /// Add one sample per position.
    pub fn add_source(&self, field: &mut [f32], amps: &[f32], geom: &ShotGeometry) {
        for (&pos, &a) in geom.positions().iter().zip(amps) {
            field[pos] += a;
        }
    }

    /// Subtract one sample per position.
    pub fn sub_source(&self, field: &mut [f32], amps: &[f32], geom: &ShotGeometry) {
        for (&pos, &a) in geom.positions().iter().zip(amps) {
            field[pos] -= a;
        }
    }

    /// Sample the field at every receiver.
    pub fn record_seis(&self, out: &mut [f32], field: &[f32], geom: &ShotGeometry) {
        for (o, &pos) in out.iter_mut().zip(geom.positions()) {
            *o = field[pos];
        }
    }

    /// Samples in one boundary-shell snapshot.
    pub fn boundary_len(&self) -> usize {
        let g = self.grid();
        FD_HALF * (2 * g.nz() + g.nx())
    }

    /// Copy the boundary shell (left columns, right columns, bottom rows)
    /// of `field` into `out`.
    pub fn write_boundary(&self, field: &[f32], out: &mut [f32]) {
        self.visit_boundary(|k, i| out[k] = field[i]);
    }

    /// Restore a boundary shell saved by [`Self::write_boundary`].
    pub fn read_boundary(&self, saved: &[f32], field: &mut [f32]) {
        self.visit_boundary(|k, i| field[i] = saved[k]);
    }

    fn visit_boundary<F: FnMut(usize, usize)>(&self, mut f: F) {
        let g = self.grid();
        let (nz, nx) = (g.nz(), g.nx());
        let mut k = 0;
        for l in 0..FD_HALF {
            let start = g.padded_index(0, l);
            for iz in 0..nz {
                f(k, start + iz);
                k += 1;
            }
        }
        for l in 0..FD_HALF {
            let start = g.padded_index(0, nx - 1 - l);
            for iz in 0..nz {
                f(k, start + iz);
                k += 1;
            }
        }
        for l in 0..FD_HALF {
            for ix in 0..nx {
                f(k, g.padded_index(nz - 1 - l, ix));
                k += 1;
            }
        }
    }

    /// Zero the direct wave in an `nt x ng` gather.
    ///
    /// For every source/receiver pair the arrival time is the offset divided
    /// by the mean interior velocity along the source's depth row; samples
    /// in `[t0, t0 + window]` are zeroed.
    pub fn remove_direct_arrival(
        &self,
        sources: &ShotGeometry,
        receivers: &ShotGeometry,
        data: &mut [f32],
        nt: usize,
        window: f32,
    ) {
        if nt == 0 {
            return;
        }
        let g = self.grid();
        let ng = receivers.len();
        let dt = self.model.dt();
        for is in 0..sources.len() {
            let (sz, sx) = sources.coord(is);
            let row_speed: f32 = (0..g.nx())
                .map(|ix| self.model.velocity_at(g.padded_index(sz, ix)))
                .sum::<f32>()
                / g.nx() as f32;
            for ig in 0..ng {
                let (gz, gx) = receivers.coord(ig);
                let oz = (sz as f32 - gz as f32) * g.dz();
                let ox = (sx as f32 - gx as f32) * g.dx();
                let t0 = (oz * oz + ox * ox).sqrt() / row_speed;
                let first = (t0 / dt).ceil() as usize;
                let last = (((t0 + window) / dt).floor() as usize).min(nt - 1);
                for it in first..=last {
                    data[it * ng + ig] = 0.0;
                }
            }
        }
    }

    /// Forward-only modeling of one (possibly encoded) shot.
    ///
    /// `source` is an `nt x ns` matrix of source samples; the `nt x ng`
    /// receiver gather is written to `out`.
    ///
    /// # Errors
    /// Returns an error on shape mismatch or if the wavefield becomes
    /// non-finite.
    pub fn forward_modeling(
        &self,
        sources: &ShotGeometry,
        source: &[f32],
        receivers: &ShotGeometry,
        nt: usize,
        out: &mut [f32],
    ) -> Result<()> {
        let ns = sources.len();
        let ng = receivers.len();
        check_len(source, nt, ns)?;
        check_len(out, nt, ng)?;

        let mut p0 = self.new_field();
        let mut p1 = self.new_field();
        for it in 0..nt {
            self.add_source(&mut p1, &source[it * ns..(it + 1) * ns], sources);
            self.step_forward(&mut p0, &p1);
            std::mem::swap(&mut p0, &mut p1);
            let trace = &mut out[it * ng..(it + 1) * ng];
            self.record_seis(trace, &p1, receivers);
            check_finite(trace, it)?;
        }
        check_finite(&p1, nt.saturating_sub(1))
    }

    /// Linearized (Born) modeling of one shot about the current model.
    ///
    /// `dw` is a padded perturbation of the transformed velocity. The
    /// scattered field obeys the same damped step as the background field
    /// and is driven by `-dw L(p) / w²` at every step, where `p` is the
    /// background field after source injection. The `nt x ng` scattered
    /// gather is written to `out`.
    ///
    /// # Errors
    /// Returns an error on shape mismatch or if either wavefield becomes
    /// non-finite.
    pub fn born_modeling(
        &self,
        sources: &ShotGeometry,
        source: &[f32],
        receivers: &ShotGeometry,
        nt: usize,
        dw: &[f32],
        out: &mut [f32],
    ) -> Result<()> {
        let ns = sources.len();
        let ng = receivers.len();
        check_len(source, nt, ns)?;
        check_len(out, nt, ng)?;
        check_len(dw, 1, self.grid().padded_len())?;

        let g = self.grid();
        let nz_pad = g.nz_pad();
        let (rows, cols) = update_kernels::updatable_region(g);
        let w = self.model.data();
        // scattering strength per cell, zero where the model is unperturbed
        let scale: Vec<f32> = dw
            .par_iter()
            .zip(w.par_iter())
            .zip(self.damp.par_iter())
            .map(|((&d, &wi), &damp)| d / (wi * wi * (1.0 + damp)))
            .collect();

        let mut p0 = self.new_field();
        let mut p1 = self.new_field();
        let mut d0 = self.new_field();
        let mut d1 = self.new_field();
        let mut lap = self.new_field();
        for it in 0..nt {
            self.add_source(&mut p1, &source[it * ns..(it + 1) * ns], sources);
            update_kernels::laplacian(&p1, &mut lap, nz_pad, rows.clone(), cols.clone());
            self.step_forward(&mut p0, &p1);
            std::mem::swap(&mut p0, &mut p1);

            self.step_forward(&mut d0, &d1);
            d0.par_iter_mut()
                .zip(lap.par_iter())
                .zip(scale.par_iter())
                .for_each(|((d, &l), &s)| *d -= s * l);
            std::mem::swap(&mut d0, &mut d1);

            let trace = &mut out[it * ng..(it + 1) * ng];
            self.record_seis(trace, &d1, receivers);
            check_finite(trace, it)?;
        }
        check_finite(&p1, nt.saturating_sub(1))
    }

    /// Discrete leap-frog energy `Σ w (curr - prev)² - Σ curr · L(prev)`.
    ///
    /// Constant without damping and non-increasing with it.
    pub fn discrete_energy(&self, prev: &[f32], curr: &[f32]) -> f64 {
        let g = self.grid();
        let nz_pad = g.nz_pad();
        let w = self.model.data();
        let (rows, cols) = update_kernels::updatable_region(g);
        let mut energy = 0.0f64;
        for ix in cols {
            for iz in rows.clone() {
                let i = ix * nz_pad + iz;
                let d = (curr[i] - prev[i]) as f64;
                let lap = laplacian_at(prev, i, nz_pad) as f64;
                energy += w[i] as f64 * d * d - curr[i] as f64 * lap;
            }
        }
        energy
    }
}

pub(crate) fn check_len(data: &[f32], nt: usize, n: usize) -> Result<()> {
    if data.len() != nt * n {
        return Err(FwiError::ShapeMismatch {
            expected: vec![nt, n],
            got: vec![data.len()],
        });
    }
    Ok(())
}

pub(crate) fn check_finite(data: &[f32], step: usize) -> Result<()> {
    if data.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(FwiError::NumericalInstability { step })
    }
}
