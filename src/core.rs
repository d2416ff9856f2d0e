// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Padded grid, velocity model and shot geometry.
//!
//! Velocities are stored in the transformed form `w = (dx / (v dt))²` that
//! the stencil divides by, on the padded grid the propagator steps over.

use std::ops::Range;

use crate::error::{FwiError, Result};

/// Half-width of the spatial stencil; also the width of the zero halo.
pub const FD_HALF: usize = 5;

/// Padded 2D grid geometry.
///
/// The interior `nz x nx` model is surrounded by an absorbing sponge of `nb`
/// cells on the left, right and bottom sides (the top is a free surface), and
/// by a halo of [`FD_HALF`] zero cells on every side. Fields are flat arrays
/// in column-major order with depth fastest: `index = ix * nz_pad + iz`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grid {
    nz: usize,
    nx: usize,
    nb: usize,
    dz: f32,
    dx: f32,
}

impl Grid {
    /// Create a new grid.
    ///
    /// # Errors
    /// Returns an error if the interior is smaller than the stencil needs
    /// (`2 * FD_HALF + 1` cells per axis) or if the spacings are not positive,
    /// finite and equal.
    pub fn new(nz: usize, nx: usize, nb: usize, dz: f32, dx: f32) -> Result<Self> {
        let min = 2 * FD_HALF + 1;
        if nz < min {
            return Err(FwiError::InvalidGridShape {
                axis: "nz",
                size: nz,
                min,
            });
        }
        if nx < min {
            return Err(FwiError::InvalidGridShape {
                axis: "nx",
                size: nx,
                min,
            });
        }
        let square = (dz - dx).abs() <= 1e-6 * dx.abs().max(dz.abs());
        if !dz.is_finite() || !dx.is_finite() || dz <= 0.0 || dx <= 0.0 || !square {
            return Err(FwiError::InvalidGridSpacing { dz, dx });
        }
        Ok(Grid { nz, nx, nb, dz, dx })
    }

    /// Interior depth samples.
    pub fn nz(&self) -> usize {
        self.nz
    }

    /// Interior lateral samples.
    pub fn nx(&self) -> usize {
        self.nx
    }

    /// Sponge thickness in cells.
    pub fn nb(&self) -> usize {
        self.nb
    }

    /// Vertical spacing.
    pub fn dz(&self) -> f32 {
        self.dz
    }

    /// Horizontal spacing.
    pub fn dx(&self) -> f32 {
        self.dx
    }

    /// Padded depth samples: halo + interior + sponge + halo.
    pub fn nz_pad(&self) -> usize {
        FD_HALF + self.nz + self.nb + FD_HALF
    }

    /// Padded lateral samples: halo + sponge + interior + sponge + halo.
    pub fn nx_pad(&self) -> usize {
        2 * (FD_HALF + self.nb) + self.nx
    }

    /// Padded depth index of the first interior row.
    pub fn z0(&self) -> usize {
        FD_HALF
    }

    /// Padded lateral index of the first interior column.
    pub fn x0(&self) -> usize {
        FD_HALF + self.nb
    }

    /// Number of cells in a padded field.
    pub fn padded_len(&self) -> usize {
        self.nz_pad() * self.nx_pad()
    }

    /// Number of cells in the interior.
    pub fn interior_len(&self) -> usize {
        self.nz * self.nx
    }

    /// Padded flat index of interior cell `(iz, ix)`.
    pub fn padded_index(&self, iz: usize, ix: usize) -> usize {
        (ix + self.x0()) * self.nz_pad() + iz + self.z0()
    }

    /// Whether padded cell `(iz, ix)` belongs to the interior.
    pub fn is_interior(&self, iz: usize, ix: usize) -> bool {
        (self.z0()..self.z0() + self.nz).contains(&iz)
            && (self.x0()..self.x0() + self.nx).contains(&ix)
    }

    /// Padded depth rows of the deep interior: interior rows at least
    /// `FD_HALF` away from the bottom interior edge.
    pub fn deep_rows(&self) -> Range<usize> {
        self.z0()..self.z0() + self.nz - FD_HALF
    }

    /// Padded columns of the deep interior: interior columns at least
    /// `FD_HALF` away from the left and right interior edges.
    pub fn deep_cols(&self) -> Range<usize> {
        self.x0() + FD_HALF..self.x0() + self.nx - FD_HALF
    }

    /// Embed an interior array into a padded one, extending edge values
    /// into the sponge and halo.
    pub fn expand(&self, interior: &[f32]) -> Result<Vec<f32>> {
        if interior.len() != self.interior_len() {
            return Err(FwiError::ShapeMismatch {
                expected: vec![self.nx, self.nz],
                got: vec![interior.len()],
            });
        }
        let mut padded = vec![0.0; self.padded_len()];
        for ix in 0..self.nx {
            let src = &interior[ix * self.nz..(ix + 1) * self.nz];
            let start = self.padded_index(0, ix);
            padded[start..start + self.nz].copy_from_slice(src);
        }
        self.refill_boundary(&mut padded);
        Ok(padded)
    }

    /// Extract the interior of a padded array.
    pub fn extract(&self, padded: &[f32]) -> Vec<f32> {
        let mut interior = Vec::with_capacity(self.interior_len());
        for ix in 0..self.nx {
            let start = self.padded_index(0, ix);
            interior.extend_from_slice(&padded[start..start + self.nz]);
        }
        interior
    }

    /// Overwrite every non-interior cell with the nearest interior value.
    pub fn refill_boundary(&self, padded: &mut [f32]) {
        let nz_pad = self.nz_pad();
        let (z0, x0) = (self.z0(), self.x0());
        let (z1, x1) = (z0 + self.nz - 1, x0 + self.nx - 1);
        for ix in 0..self.nx_pad() {
            let sx = ix.clamp(x0, x1);
            for iz in 0..nz_pad {
                if self.is_interior(iz, ix) {
                    continue;
                }
                let sz = iz.clamp(z0, z1);
                padded[ix * nz_pad + iz] = padded[sx * nz_pad + sz];
            }
        }
    }

    /// Zero every non-interior cell.
    pub fn mask_outside_interior(&self, field: &mut [f32]) {
        let nz_pad = self.nz_pad();
        for (ix, column) in field.chunks_mut(nz_pad).enumerate() {
            for (iz, v) in column.iter_mut().enumerate() {
                if !self.is_interior(iz, ix) {
                    *v = 0.0;
                }
            }
        }
    }
}

/// Convert a velocity to the transformed coefficient `w = (dx / (v dt))^2`.
pub fn transform_velocity(v: f32, dx: f32, dt: f32) -> f32 {
    let r = dx / (v * dt);
    r * r
}

/// Inverse of [`transform_velocity`].
pub fn physical_velocity(w: f32, dx: f32, dt: f32) -> f32 {
    dx / (dt * w.sqrt())
}

/// Velocity clamp bounds, held in both physical and transformed units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClampBounds {
    vmin: f32,
    vmax: f32,
    wmin: f32,
    wmax: f32,
}

impl ClampBounds {
    /// Build clamp bounds for a `[vmin, vmax]` velocity range.
    ///
    /// # Errors
    /// Returns an error unless `0 < vmin < vmax` and both are finite.
    pub fn new(vmin: f32, vmax: f32, dx: f32, dt: f32) -> Result<Self> {
        if !vmin.is_finite() || !vmax.is_finite() || vmin <= 0.0 || vmax <= vmin {
            return Err(FwiError::InvalidVelocityRange { vmin, vmax });
        }
        Ok(ClampBounds {
            vmin,
            vmax,
            wmin: transform_velocity(vmax, dx, dt),
            wmax: transform_velocity(vmin, dx, dt),
        })
    }

    /// Lower velocity bound.
    pub fn vmin(&self) -> f32 {
        self.vmin
    }

    /// Upper velocity bound.
    pub fn vmax(&self) -> f32 {
        self.vmax
    }

    /// Clamp a transformed coefficient.
    pub fn clamp(&self, w: f32) -> f32 {
        w.clamp(self.wmin, self.wmax)
    }
}

/// Apply `w += steplen * direction`, clamped to the bounds, cell by cell.
pub fn update_vel(w: &mut [f32], direction: &[f32], steplen: f32, bounds: &ClampBounds) {
    for (wi, &di) in w.iter_mut().zip(direction) {
        *wi = bounds.clamp(*wi + steplen * di);
    }
}

/// The padded transformed-velocity field driving the stencil.
#[derive(Debug, Clone, PartialEq)]
pub struct VelocityModel {
    grid: Grid,
    dt: f32,
    w: Vec<f32>,
}

impl VelocityModel {
    /// Build a model from interior velocities in m/s (depth fastest).
    ///
    /// # Errors
    /// Returns an error if the array length does not match the grid, if `dt`
    /// is not positive, or if any velocity is not positive and finite.
    pub fn from_velocity(grid: Grid, dt: f32, velocity: &[f32]) -> Result<Self> {
        if !dt.is_finite() || dt <= 0.0 {
            return Err(FwiError::InvalidParameter {
                name: "dt",
                reason: format!("{} (must be positive and finite)", dt),
            });
        }
        for (index, &value) in velocity.iter().enumerate() {
            if !value.is_finite() || value <= 0.0 {
                return Err(FwiError::InvalidVelocity { index, value });
            }
        }
        let dx = grid.dx();
        let transformed: Vec<f32> = velocity
            .iter()
            .map(|&v| transform_velocity(v, dx, dt))
            .collect();
        let w = grid.expand(&transformed)?;
        Ok(VelocityModel { grid, dt, w })
    }

    /// The grid the model lives on.
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Time step the transform was computed with.
    pub fn dt(&self) -> f32 {
        self.dt
    }

    /// Padded transformed field.
    pub fn data(&self) -> &[f32] {
        &self.w
    }

    /// Interior velocities in m/s.
    pub fn to_velocity(&self) -> Vec<f32> {
        let (dx, dt) = (self.grid.dx(), self.dt);
        self.grid
            .extract(&self.w)
            .into_iter()
            .map(|w| physical_velocity(w, dx, dt))
            .collect()
    }

    /// Velocity in m/s at a padded index.
    pub fn velocity_at(&self, index: usize) -> f32 {
        physical_velocity(self.w[index], self.grid.dx(), self.dt)
    }

    /// Smallest and largest interior velocity.
    pub fn velocity_range(&self) -> (f32, f32) {
        self.to_velocity()
            .into_iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            })
    }

    /// Apply a clamped update along `direction` and refill the boundary.
    ///
    /// # Errors
    /// Returns an error if `direction` is not a padded field.
    pub fn apply_update(
        &mut self,
        direction: &[f32],
        steplen: f32,
        bounds: &ClampBounds,
    ) -> Result<()> {
        if direction.len() != self.w.len() {
            return Err(FwiError::ShapeMismatch {
                expected: vec![self.grid.nx_pad(), self.grid.nz_pad()],
                got: vec![direction.len()],
            });
        }
        update_vel(&mut self.w, direction, steplen, bounds);
        self.grid.refill_boundary(&mut self.w);
        Ok(())
    }

    /// A copy of this model with the update applied.
    pub fn updated(
        &self,
        direction: &[f32],
        steplen: f32,
        bounds: &ClampBounds,
    ) -> Result<VelocityModel> {
        let mut model = self.clone();
        model.apply_update(direction, steplen, bounds)?;
        Ok(model)
    }
}

/// A regular lattice of sources or receivers.
///
/// Shot `i` sits at interior depth `zbeg + i * jz` and lateral position
/// `xbeg + i * jx`.
#[derive(Debug, Clone, PartialEq)]
pub struct ShotGeometry {
    coords: Vec<(usize, usize)>,
    positions: Vec<usize>,
    interior_nz: usize,
}

impl ShotGeometry {
    /// Build and validate a lattice.
    ///
    /// # Parameters
    /// - `role`: "source" or "receiver", used in error messages
    /// - `zbeg`, `xbeg`: interior position of the first shot
    /// - `jz`, `jx`: per-shot increments
    /// - `count`: number of shots (at least one)
    ///
    /// # Errors
    /// Returns an error if the count is zero or any position lies outside
    /// the interior.
    pub fn new(
        grid: &Grid,
        role: &'static str,
        zbeg: usize,
        xbeg: usize,
        jz: usize,
        jx: usize,
        count: usize,
    ) -> Result<Self> {
        if count == 0 {
            return Err(FwiError::InvalidParameter {
                name: role,
                reason: "count must be at least 1".to_string(),
            });
        }
        let capacity = count.min(grid.interior_len());
        let mut coords = Vec::with_capacity(capacity);
        let mut positions = Vec::with_capacity(capacity);
        for i in 0..count {
            // overflow saturates and fails the bounds check
            let iz = i
                .checked_mul(jz)
                .and_then(|d| d.checked_add(zbeg))
                .unwrap_or(usize::MAX);
            let ix = i
                .checked_mul(jx)
                .and_then(|d| d.checked_add(xbeg))
                .unwrap_or(usize::MAX);
            if iz >= grid.nz() || ix >= grid.nx() {
                return Err(FwiError::GeometryOutOfBounds {
                    role,
                    index: i,
                    iz,
                    ix,
                });
            }
            coords.push((iz, ix));
            positions.push(grid.padded_index(iz, ix));
        }
        Ok(ShotGeometry {
            coords,
            positions,
            interior_nz: grid.nz(),
        })
    }

    /// Number of positions.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Always false for a validated geometry.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Padded flat indices.
    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    /// Interior `(iz, ix)` of position `i`.
    pub fn coord(&self, i: usize) -> (usize, usize) {
        self.coords[i]
    }

    /// Interior flat index `ix * nz + iz` of position `i`.
    pub fn interior_index(&self, i: usize) -> usize {
        let (iz, ix) = self.coords[i];
        ix * self.interior_nz + iz
    }

    /// The sub-lattice `[begin, end)`, e.g. one shot or one super-shot.
    ///
    /// # Errors
    /// Returns an error for an empty or out-of-range selection.
    pub fn clip_range(&self, begin: usize, end: usize) -> Result<ShotGeometry> {
        if begin >= end || end > self.len() {
            return Err(FwiError::InvalidParameter {
                name: "range",
                reason: format!("[{}, {}) is not within [0, {})", begin, end, self.len()),
            });
        }
        Ok(ShotGeometry {
            coords: self.coords[begin..end].to_vec(),
            positions: self.positions[begin..end].to_vec(),
            interior_nz: self.interior_nz,
        })
    }
}
