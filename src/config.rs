// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use serde::{Deserialize, Serialize};

use crate::core::{Grid, ShotGeometry};
use crate::error::{FwiError, Result};
use crate::wavelet::ricker;

/// Default direct-arrival mute length in dominant periods `1 / fm`.
pub const MUTE_PERIODS: f32 = 1.5;

/// Survey geometry and acquisition parameters.
///
/// Written next to every shot-gather file so that inversion can rebuild the
/// exact geometry the data was modeled with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyParams {
    /// Interior depth cells.
    pub nz: usize,
    /// Interior lateral cells.
    pub nx: usize,
    /// Sponge thickness in cells.
    pub nb: usize,
    /// Depth spacing in metres.
    pub dz: f32,
    /// Lateral spacing in metres.
    pub dx: f32,
    /// Time samples per trace.
    pub nt: usize,
    /// Time step in seconds.
    pub dt: f32,
    /// Peak frequency of the Ricker wavelet in Hz.
    pub fm: f32,
    /// Wavelet amplitude.
    #[serde(default = "default_amp")]
    pub amp: f32,
    /// Number of shots.
    pub ns: usize,
    /// Depth of the first source.
    pub szbeg: usize,
    /// Lateral position of the first source.
    pub sxbeg: usize,
    /// Source depth increment.
    pub jsz: usize,
    /// Source lateral increment.
    pub jsx: usize,
    /// Receivers per shot.
    pub ng: usize,
    /// Depth of the first receiver.
    pub gzbeg: usize,
    /// Lateral position of the first receiver.
    pub gxbeg: usize,
    /// Receiver depth increment.
    pub jgz: usize,
    /// Receiver lateral increment.
    pub jgx: usize,
    /// Slowest velocity of the model the data came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vmin: Option<f32>,
    /// Fastest velocity of the model the data came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vmax: Option<f32>,
}

fn default_amp() -> f32 {
    1000.0
}

impl SurveyParams {
    /// Check every parameter and that all shots and receivers fit inside
    /// the interior.
    ///
    /// # Errors
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.nt == 0 {
            return Err(FwiError::InvalidParameter {
                name: "nt",
                reason: "must be at least 1".to_string(),
            });
        }
        if let (Some(lo), Some(hi)) = (self.vmin, self.vmax) {
            if !(lo > 0.0 && lo <= hi && hi.is_finite()) {
                return Err(FwiError::InvalidVelocityRange { vmin: lo, vmax: hi });
            }
        }
        let grid = self.grid()?;
        self.sources(&grid)?;
        self.receivers(&grid)?;
        self.wavelet()?;
        Ok(())
    }

    /// The padded grid.
    pub fn grid(&self) -> Result<Grid> {
        Grid::new(self.nz, self.nx, self.nb, self.dz, self.dx)
    }

    /// Source lattice.
    pub fn sources(&self, grid: &Grid) -> Result<ShotGeometry> {
        ShotGeometry::new(
            grid, "source", self.szbeg, self.sxbeg, self.jsz, self.jsx, self.ns,
        )
    }

    /// Receiver lattice.
    pub fn receivers(&self, grid: &Grid) -> Result<ShotGeometry> {
        ShotGeometry::new(
            grid, "receiver", self.gzbeg, self.gxbeg, self.jgz, self.jgx, self.ng,
        )
    }

    /// The Ricker source wavelet.
    pub fn wavelet(&self) -> Result<Vec<f32>> {
        ricker(self.nt, self.dt, self.fm, self.amp)
    }

    /// Samples in one shot gather.
    pub fn gather_len(&self) -> usize {
        self.nt * self.ng
    }

    /// Default direct-arrival mute window, [`MUTE_PERIODS`]` / fm` seconds.
    pub fn mute_window(&self) -> f32 {
        MUTE_PERIODS / self.fm
    }
}
