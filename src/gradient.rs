// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Adjoint-state gradient of the L2 waveform misfit.
//!
//! A forward pass injects the (encoded) source and records the synthetic
//! gather while a [`Reconstruction`] strategy keeps what it needs to rebuild
//! the forward field. The backward pass propagates an adjoint field seeded
//! at the receivers and cross-correlates it with the rebuilt forward field.
//! The resulting image is a descent direction for the transformed velocity:
//! moving the model along `+gradient` lowers the misfit to first order.

use rayon::prelude::*;
use tracing::debug;

use crate::core::ShotGeometry;
use crate::error::{FwiError, Result};
use crate::propagator::{check_finite, check_len, Propagator};
use crate::reconstruct::{ForwardSource, Reconstruction};

/// Time ramp applied to the cross-correlation.
///
/// Weight is 0 up to `start`, rises linearly to 1 at `full` and stays 1
/// afterwards. Suppresses the strong early-time correlation near sources.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrelationWindow {
    start: f32,
    full: f32,
}

/// Default ramp start as a fraction of the record length.
pub const RAMP_START_FRACTION: f32 = 0.1;

/// Default ramp end as a fraction of the record length.
pub const RAMP_FULL_FRACTION: f32 = 0.2;

impl CorrelationWindow {
    /// The default ramp for a record of `nt` steps of `dt` seconds: from
    /// [`RAMP_START_FRACTION`] to [`RAMP_FULL_FRACTION`] of its length.
    pub fn for_record(nt: usize, dt: f32) -> Self {
        let length = nt as f32 * dt;
        CorrelationWindow {
            start: RAMP_START_FRACTION * length,
            full: RAMP_FULL_FRACTION * length,
        }
    }

    /// A ramp from `start` to `full` seconds.
    ///
    /// # Errors
    /// Returns an error unless `0 <= start <= full` and both are finite.
    pub fn new(start: f32, full: f32) -> Result<Self> {
        if !start.is_finite() || !full.is_finite() || start < 0.0 || full < start {
            return Err(FwiError::InvalidParameter {
                name: "correlation window",
                reason: format!("start {} / full {} (need 0 <= start <= full)", start, full),
            });
        }
        Ok(CorrelationWindow { start, full })
    }

    /// Ramp start in seconds.
    pub fn start(&self) -> f32 {
        self.start
    }

    /// Time in seconds from which the weight is 1.
    pub fn full(&self) -> f32 {
        self.full
    }

    /// Weight at time `t`.
    pub fn weight(&self, t: f32) -> f32 {
        if t <= self.start {
            0.0
        } else if t >= self.full {
            1.0
        } else {
            (t - self.start) / (self.full - self.start)
        }
    }
}

/// What drives the adjoint field at the receivers.
#[derive(Debug, Clone, Copy)]
pub enum AdjointSeed<'a> {
    /// The data residual `syn - obs`; the image correlates the adjoint
    /// field with the Laplacian of the forward field.
    Residual,
    /// A caller-built virtual source (the second time derivative of
    /// `obs - syn`); the image correlates the adjoint field with the forward
    /// field itself.
    VirtualSource(&'a [f32]),
}

/// Result of one gradient computation.
#[derive(Debug, Clone)]
pub struct GradientOutput {
    /// Sum of squared residuals.
    pub misfit: f64,
    /// `nt x ng` residual `syn - obs`.
    pub residual: Vec<f32>,
    /// Padded descent image.
    pub gradient: Vec<f32>,
    /// Padded sum of squared forward field over the correlated steps.
    pub illumination: Vec<f32>,
}

impl GradientOutput {
    /// Divide the gradient by `illumination + eps * max(illumination)`.
    ///
    /// Cells without illumination are left at zero instead of dividing by
    /// zero.
    pub fn precondition(&mut self, eps: f32) {
        let peak = self.illumination.iter().fold(0.0f32, |m, &v| m.max(v));
        if peak <= 0.0 {
            tracing::warn!("illumination is empty; gradient left unpreconditioned");
            return;
        }
        let floor = eps * peak;
        self.gradient
            .par_iter_mut()
            .zip(self.illumination.par_iter())
            .for_each(|(g, &il)| {
                let d = il + floor;
                *g = if d > 0.0 { *g / d } else { 0.0 };
            });
    }
}

/// Sum of squared samples, accumulated in f64.
pub fn misfit(residual: &[f32]) -> f64 {
    residual.iter().map(|&r| (r as f64) * (r as f64)).sum()
}

/// Gradient computation for one (encoded) super-shot.
pub struct GradientEngine<'a> {
    prop: &'a Propagator,
    sources: &'a ShotGeometry,
    receivers: &'a ShotGeometry,
    nt: usize,
    window: CorrelationWindow,
    mute: Option<f32>,
}

impl<'a> GradientEngine<'a> {
    /// Create an engine with the record-length correlation window and no
    /// direct-arrival suppression.
    pub fn new(
        prop: &'a Propagator,
        sources: &'a ShotGeometry,
        receivers: &'a ShotGeometry,
        nt: usize,
    ) -> Self {
        GradientEngine {
            prop,
            sources,
            receivers,
            nt,
            window: CorrelationWindow::for_record(nt, prop.model().dt()),
            mute: None,
        }
    }

    /// Set the correlation time ramp (builder method).
    pub fn with_window(mut self, window: CorrelationWindow) -> Self {
        self.window = window;
        self
    }

    /// Suppress direct arrivals over `window` seconds in both gathers
    /// before forming the residual (builder method).
    pub fn with_direct_arrival_mute(mut self, window: Option<f32>) -> Self {
        self.mute = window;
        self
    }

    /// Run the forward and adjoint passes.
    ///
    /// # Parameters
    /// - `source`: `nt x ns` source samples for this engine's sources
    /// - `observed`: `nt x ng` observed (encoded) gather
    /// - `seed`: what drives the adjoint field
    /// - `recon`: forward-field reconstruction strategy
    ///
    /// # Errors
    /// Returns an error on shape mismatch, numerical instability or a
    /// reconstruction failure.
    pub fn compute(
        &self,
        source: &[f32],
        observed: &[f32],
        seed: AdjointSeed<'_>,
        recon: &mut dyn Reconstruction,
    ) -> Result<GradientOutput> {
        let (nt, ng) = (self.nt, self.receivers.len());
        let prop = self.prop;
        check_len(source, nt, self.sources.len())?;
        check_len(observed, nt, ng)?;
        let fsrc = ForwardSource {
            geometry: self.sources,
            samples: source,
        };

        // forward pass
        let mut p0 = prop.new_field();
        let mut p1 = prop.new_field();
        let mut syn = vec![0.0; nt * ng];
        for it in 0..nt {
            prop.add_source(&mut p1, fsrc.at(it), self.sources);
            recon.record(prop, it, &p0, &p1)?;
            prop.step_forward(&mut p0, &p1);
            std::mem::swap(&mut p0, &mut p1);
            let trace = &mut syn[it * ng..(it + 1) * ng];
            prop.record_seis(trace, &p1, self.receivers);
            check_finite(trace, it)?;
        }
        recon.begin_backward(prop, p0, p1)?;

        let mut obs = observed.to_vec();
        if let Some(window) = self.mute {
            prop.remove_direct_arrival(self.sources, self.receivers, &mut syn, nt, window);
            prop.remove_direct_arrival(self.sources, self.receivers, &mut obs, nt, window);
        }
        let residual: Vec<f32> = syn.iter().zip(&obs).map(|(&s, &o)| s - o).collect();
        let misfit = misfit(&residual);

        // backward pass
        let (adjoint, use_laplacian, sign) = match seed {
            AdjointSeed::Residual => (residual.as_slice(), true, 1.0f32),
            AdjointSeed::VirtualSource(v) => {
                check_len(v, nt, ng)?;
                (v, false, -1.0f32)
            }
        };
        let dt = prop.model().dt();
        let mut g0 = prop.new_field();
        let mut g1 = prop.new_field();
        let mut lap = prop.new_field();
        let mut illum = prop.new_field();
        let mut gradient = prop.new_field();
        let mut correlated = 0usize;
        for it in (0..nt).rev() {
            let weight = self.window.weight(it as f32 * dt);
            if weight <= 0.0 {
                break;
            }
            let field = recon.backward(prop, &fsrc, it, &mut lap, &mut illum)?;
            prop.add_source(&mut g1, &adjoint[it * ng..(it + 1) * ng], self.receivers);
            let image = if use_laplacian { lap.as_slice() } else { field };
            correlate(&mut gradient, image, &g1, sign * weight, prop);
            prop.step_forward(&mut g0, &g1);
            std::mem::swap(&mut g0, &mut g1);
            correlated += 1;
        }
        check_finite(&gradient, 0)?;
        debug!(
            strategy = recon.name(),
            misfit,
            correlated,
            "gradient computed"
        );

        Ok(GradientOutput {
            misfit,
            residual,
            gradient,
            illumination: illum,
        })
    }
}

/// `gradient += scale * image * adjoint` over the deep interior.
fn correlate(gradient: &mut [f32], image: &[f32], adjoint: &[f32], scale: f32, prop: &Propagator) {
    let g = prop.grid();
    let nz_pad = g.nz_pad();
    let rows = g.deep_rows();
    let cols = g.deep_cols();
    gradient
        .par_chunks_mut(nz_pad)
        .enumerate()
        .filter(|(ix, _)| cols.contains(ix))
        .for_each(|(ix, column)| {
            let base = ix * nz_pad;
            for iz in rows.clone() {
                column[iz] += scale * image[base + iz] * adjoint[base + iz];
            }
        });
}
