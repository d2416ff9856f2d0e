// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! The outer inversion loop.
//!
//! Every iteration draws a fresh shot encoding, computes the gradient of all
//! encoded super-shots, turns it into a conjugate search direction and moves
//! the model by the step the line search selects.

use std::path::PathBuf;

use ndarray::{Array2, ArrayView2, Axis};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{SurveyParams, MUTE_PERIODS};
use crate::core::{ClampBounds, ShotGeometry, VelocityModel};
use crate::encoder::{EncodedShot, Encoding, ShotEncoder};
use crate::error::{FwiError, Result};
use crate::gradient::{misfit, AdjointSeed, CorrelationWindow, GradientEngine, GradientOutput};
use crate::io::{write_velocity, ModelHeader};
use crate::linesearch::{
    max_step_length, LineSearchConfig, LineSearchReport, MisfitEvaluator, StepLengthSearch,
    StepLengthState,
};
use crate::propagator::{check_len, Propagator};
use crate::reconstruct::ReconstructionKind;
use crate::scheduler::ShotPartition;

/// Default encoding seed.
pub const DEFAULT_SEED: u64 = 10;

/// Default largest velocity decrease per update, in m/s.
pub const DEFAULT_MAX_DV: f32 = 200.0;

/// Fourth-order second-difference weights for offsets 2, 1 and 0.
const SECOND_DIFF: [f32; 3] = [-1.0 / 12.0, 4.0 / 3.0, -5.0 / 2.0];

/// How direct arrivals are suppressed before residuals are formed.
///
/// Samples from the direct travel time to the end of the window are zeroed
/// in both the encoded observed and the synthetic gathers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DirectArrivalMute {
    /// Keep direct arrivals.
    Off,
    /// A window of this many dominant periods `1 / fm`.
    Periods(f32),
    /// A window of this many seconds.
    Seconds(f32),
}

impl Default for DirectArrivalMute {
    fn default() -> Self {
        DirectArrivalMute::Periods(MUTE_PERIODS)
    }
}

impl DirectArrivalMute {
    /// Window length in seconds for a wavelet of peak frequency `fm`, or
    /// `None` when muting is off.
    pub fn window(&self, fm: f32) -> Option<f32> {
        match *self {
            DirectArrivalMute::Off => None,
            DirectArrivalMute::Periods(n) => Some(n / fm),
            DirectArrivalMute::Seconds(s) => Some(s),
        }
    }
}

/// Outer-loop parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct InversionConfig {
    niter: usize,
    vmin: f32,
    vmax: f32,
    max_dv: f32,
    seed: u64,
    super_shots: usize,
    mute: DirectArrivalMute,
    window: Option<CorrelationWindow>,
    reconstruction: ReconstructionKind,
    precondition: Option<f32>,
    line_search: LineSearchConfig,
    snapshot_dir: Option<PathBuf>,
}

impl InversionConfig {
    /// `niter` iterations with velocities clamped to `[vmin, vmax]`.
    ///
    /// Everything else starts at its default: one super-shot, a
    /// direct-arrival mute of [`MUTE_PERIODS`] dominant periods, a
    /// correlation ramp scaled to the record length, boundary
    /// reconstruction and no preconditioning.
    pub fn new(niter: usize, vmin: f32, vmax: f32) -> Self {
        InversionConfig {
            niter,
            vmin,
            vmax,
            max_dv: DEFAULT_MAX_DV,
            seed: DEFAULT_SEED,
            super_shots: 1,
            mute: DirectArrivalMute::default(),
            window: None,
            reconstruction: ReconstructionKind::Boundary,
            precondition: None,
            line_search: LineSearchConfig::default(),
            snapshot_dir: None,
        }
    }

    /// Set the encoding seed (builder method).
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the largest velocity decrease per update (builder method).
    pub fn with_max_dv(mut self, max_dv: f32) -> Self {
        self.max_dv = max_dv;
        self
    }

    /// Split the shots into this many contiguous super-shots (builder method).
    pub fn with_super_shots(mut self, super_shots: usize) -> Self {
        self.super_shots = super_shots;
        self
    }

    /// Zero direct arrivals over `window` seconds (builder method).
    pub fn with_mute_window(mut self, window: Option<f32>) -> Self {
        self.mute = match window {
            Some(seconds) => DirectArrivalMute::Seconds(seconds),
            None => DirectArrivalMute::Off,
        };
        self
    }

    /// Choose the direct-arrival suppression (builder method).
    pub fn with_mute(mut self, mute: DirectArrivalMute) -> Self {
        self.mute = mute;
        self
    }

    /// Set the correlation time ramp (builder method).
    pub fn with_window(mut self, window: CorrelationWindow) -> Self {
        self.window = Some(window);
        self
    }

    /// Choose how the forward field is rebuilt backward (builder method).
    pub fn with_reconstruction(mut self, kind: ReconstructionKind) -> Self {
        self.reconstruction = kind;
        self
    }

    /// Divide the gradient by the regularised illumination (builder method).
    pub fn with_preconditioning(mut self, eps: Option<f32>) -> Self {
        self.precondition = eps;
        self
    }

    /// Set the line-search constants (builder method).
    pub fn with_line_search(mut self, config: LineSearchConfig) -> Self {
        self.line_search = config;
        self
    }

    /// Write the model after every iteration into `dir` (builder method).
    pub fn with_snapshot_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.snapshot_dir = dir;
        self
    }

    /// Number of iterations [`Inversion::run`] performs.
    pub fn niter(&self) -> usize {
        self.niter
    }

    /// Clamp range in m/s.
    pub fn velocity_bounds(&self) -> (f32, f32) {
        (self.vmin, self.vmax)
    }

    /// Encoding seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Check every parameter.
    ///
    /// # Errors
    /// Returns the first invalid parameter.
    pub fn validate(&self) -> Result<()> {
        if !(self.vmin > 0.0 && self.vmin < self.vmax && self.vmax.is_finite()) {
            return Err(FwiError::InvalidVelocityRange {
                vmin: self.vmin,
                vmax: self.vmax,
            });
        }
        if !self.max_dv.is_finite() || self.max_dv <= 0.0 {
            return Err(FwiError::InvalidParameter {
                name: "max_dv",
                reason: format!("{} (must be positive)", self.max_dv),
            });
        }
        if self.super_shots == 0 {
            return Err(FwiError::InvalidParameter {
                name: "super_shots",
                reason: "must be at least 1".to_string(),
            });
        }
        if let DirectArrivalMute::Periods(w) | DirectArrivalMute::Seconds(w) = self.mute {
            if !w.is_finite() || w <= 0.0 {
                return Err(FwiError::InvalidParameter {
                    name: "mute_window",
                    reason: format!("{} (must be positive)", w),
                });
            }
        }
        if let Some(eps) = self.precondition {
            if !eps.is_finite() || eps < 0.0 {
                return Err(FwiError::InvalidParameter {
                    name: "precondition",
                    reason: format!("{} (must be non-negative)", eps),
                });
            }
        }
        if let ReconstructionKind::Checkpoint { interval: 0, .. } = self.reconstruction {
            return Err(FwiError::InvalidParameter {
                name: "checkpoint interval",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Sources, receivers and the wavelet every source fires.
#[derive(Debug, Clone)]
pub struct Survey {
    /// All physical shots.
    pub sources: ShotGeometry,
    /// Receivers shared by every shot.
    pub receivers: ShotGeometry,
    /// Source time function, one sample per step.
    pub wavelet: Vec<f32>,
    /// Peak frequency of the wavelet in Hz.
    pub fm: f32,
}

impl Survey {
    /// Build the geometry and wavelet described by `params`.
    pub fn from_params(params: &SurveyParams) -> Result<Self> {
        params.validate()?;
        let grid = params.grid()?;
        Ok(Survey {
            sources: params.sources(&grid)?,
            receivers: params.receivers(&grid)?,
            wavelet: params.wavelet()?,
            fm: params.fm,
        })
    }

    /// Time steps per trace.
    pub fn nt(&self) -> usize {
        self.wavelet.len()
    }

    /// Number of physical shots.
    pub fn ns(&self) -> usize {
        self.sources.len()
    }

    /// Receivers per shot.
    pub fn ng(&self) -> usize {
        self.receivers.len()
    }
}

/// Polak-Ribière conjugate directions with automatic restart.
#[derive(Debug, Clone, Default)]
pub struct ConjugateDirection {
    previous: Option<Vec<f32>>,
    direction: Vec<f32>,
}

impl ConjugateDirection {
    /// Start with no history; the first direction is the gradient.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in a new gradient and return `β`.
    ///
    /// `β = max(0, (‖g‖² - g·g_prev) / ‖g_prev‖²)` and `d = g + β d_prev`.
    pub fn update(&mut self, gradient: &[f32]) -> f64 {
        let beta = match &self.previous {
            Some(prev) if prev.len() == gradient.len() => {
                let (gg, gp, pp) = gradient.iter().zip(prev).fold(
                    (0.0f64, 0.0f64, 0.0f64),
                    |(gg, gp, pp), (&g, &p)| {
                        let (g, p) = (g as f64, p as f64);
                        (gg + g * g, gp + g * p, pp + p * p)
                    },
                );
                if pp > 0.0 {
                    ((gg - gp) / pp).max(0.0)
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };
        if beta == 0.0 || self.direction.len() != gradient.len() {
            self.direction = gradient.to_vec();
        } else {
            let b = beta as f32;
            for (d, &g) in self.direction.iter_mut().zip(gradient) {
                *d = g + b * *d;
            }
        }
        self.previous = Some(gradient.to_vec());
        beta
    }

    /// The current search direction.
    pub fn direction(&self) -> &[f32] {
        &self.direction
    }
}

/// Second time derivative of every trace of an `nt x ng` gather.
///
/// The two samples at each end of a trace are zero.
///
/// # Errors
/// Returns an error if `data` is not `nt x ng`.
pub fn virtual_source(data: &[f32], nt: usize, ng: usize) -> Result<Vec<f32>> {
    let traces = ArrayView2::from_shape((nt, ng), data).map_err(|_| FwiError::ShapeMismatch {
        expected: vec![nt, ng],
        got: vec![data.len()],
    })?;
    let mut out = Array2::<f32>::zeros((nt, ng));
    for (src, mut dst) in traces.axis_iter(Axis(1)).zip(out.axis_iter_mut(Axis(1))) {
        for it in 2..nt.saturating_sub(2) {
            dst[it] = SECOND_DIFF[0] * (src[it - 2] + src[it + 2])
                + SECOND_DIFF[1] * (src[it - 1] + src[it + 1])
                + SECOND_DIFF[2] * src[it];
        }
    }
    Ok(out.into_raw_vec())
}

/// Diagnostics of one outer iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationRecord {
    /// Zero-based iteration number.
    pub iteration: usize,
    /// Misfit of the model entering the iteration.
    pub misfit: f64,
    /// Euclidean norm of the masked gradient.
    pub gradient_norm: f64,
    /// Conjugate-direction coefficient.
    pub beta: f64,
    /// Accepted step length.
    pub steplen: f32,
    /// Full line-search trace.
    pub search: LineSearchReport,
    /// Interior velocity range after the update.
    pub velocity_range: (f32, f32),
}

/// One contiguous group of shots fired simultaneously.
#[derive(Debug, Clone)]
struct SuperShot {
    sources: ShotGeometry,
    encoded: EncodedShot,
}

/// `obs - syn` of one super-shot, both direct-arrival suppressed.
fn muted_residual(
    prop: &Propagator,
    shot: &SuperShot,
    receivers: &ShotGeometry,
    nt: usize,
    mute: Option<f32>,
) -> Result<Vec<f32>> {
    let mut syn = vec![0.0; nt * receivers.len()];
    prop.forward_modeling(&shot.sources, &shot.encoded.source, receivers, nt, &mut syn)?;
    let mut obs = shot.encoded.observed.clone();
    if let Some(window) = mute {
        prop.remove_direct_arrival(&shot.sources, receivers, &mut syn, nt, window);
        prop.remove_direct_arrival(&shot.sources, receivers, &mut obs, nt, window);
    }
    for (o, &s) in obs.iter_mut().zip(&syn) {
        *o -= s;
    }
    Ok(obs)
}

/// Misfit of the model moved along a fixed direction.
struct TrialMisfit<'a> {
    prop: &'a Propagator,
    receivers: &'a ShotGeometry,
    nt: usize,
    shots: &'a [SuperShot],
    direction: &'a [f32],
    bounds: &'a ClampBounds,
    mute: Option<f32>,
}

impl MisfitEvaluator for TrialMisfit<'_> {
    fn misfit(&mut self, steplen: f32) -> Result<f64> {
        let model = self
            .prop
            .model()
            .updated(self.direction, steplen, self.bounds)?;
        let prop = self.prop.with_model(model)?;
        let (receivers, nt, mute) = (self.receivers, self.nt, self.mute);
        let parts: Vec<Result<f64>> = self
            .shots
            .par_iter()
            .map(|shot| {
                let residual = muted_residual(&prop, shot, receivers, nt, mute)?;
                Ok(misfit(&residual))
            })
            .collect();
        let mut total = 0.0;
        for part in parts {
            total += part?;
        }
        debug!(steplen, misfit = total, "trial step evaluated");
        Ok(total)
    }
}

/// Encoded simultaneous-source inversion.
pub struct Inversion {
    prop: Propagator,
    survey: Survey,
    observed: Vec<f32>,
    config: InversionConfig,
    mute: Option<f32>,
    window: CorrelationWindow,
    bounds: ClampBounds,
    encoder: ShotEncoder,
    search: StepLengthSearch,
    state: StepLengthState,
    conjugate: ConjugateDirection,
    history: Vec<IterationRecord>,
}

impl Inversion {
    /// Set up an inversion of `observed` starting from the propagator's
    /// model.
    ///
    /// # Parameters
    /// - `prop`: propagator carrying the initial model
    /// - `survey`: geometry the data was recorded with
    /// - `observed`: all shot gathers, ordered receiver, time, shot
    /// - `config`: outer-loop parameters
    ///
    /// A mute given in dominant periods is converted with the survey's
    /// peak frequency. Without an explicit correlation window the ramp is
    /// scaled to the record length.
    ///
    /// # Errors
    /// Returns an error on an invalid configuration, a mute in periods
    /// without a positive peak frequency, or a data size that does not
    /// match the survey.
    pub fn new(
        prop: Propagator,
        survey: Survey,
        observed: Vec<f32>,
        config: InversionConfig,
    ) -> Result<Self> {
        config.validate()?;
        check_len(&observed, survey.ns(), survey.nt() * survey.ng())?;
        let bounds = ClampBounds::new(
            config.vmin,
            config.vmax,
            prop.grid().dx(),
            prop.model().dt(),
        )?;
        if let DirectArrivalMute::Periods(_) = config.mute {
            if !survey.fm.is_finite() || survey.fm <= 0.0 {
                return Err(FwiError::InvalidParameter {
                    name: "fm",
                    reason: format!(
                        "{} (a mute in periods needs a positive peak frequency)",
                        survey.fm
                    ),
                });
            }
        }
        let mute = config.mute.window(survey.fm);
        let window = config
            .window
            .unwrap_or_else(|| CorrelationWindow::for_record(survey.nt(), prop.model().dt()));
        debug!(?mute, ?window, "direct-arrival mute and correlation window");
        let (lo, hi) = prop.model().velocity_range();
        if lo < config.vmin || hi > config.vmax {
            warn!(
                lo,
                hi,
                vmin = config.vmin,
                vmax = config.vmax,
                "initial model exceeds the clamp range; it will be clamped by the first update"
            );
        }
        Ok(Inversion {
            encoder: ShotEncoder::new(config.seed),
            search: StepLengthSearch::new(config.line_search),
            state: StepLengthState::new(1),
            conjugate: ConjugateDirection::new(),
            history: Vec::new(),
            prop,
            survey,
            observed,
            config,
            mute,
            window,
            bounds,
        })
    }

    /// The current model.
    pub fn model(&self) -> &VelocityModel {
        self.prop.model()
    }

    /// The propagator carrying the current model.
    pub fn propagator(&self) -> &Propagator {
        &self.prop
    }

    /// Records of all completed iterations.
    pub fn history(&self) -> &[IterationRecord] {
        &self.history
    }

    /// The configuration.
    pub fn config(&self) -> &InversionConfig {
        &self.config
    }

    /// Direct-arrival mute length in seconds, if any.
    pub fn mute_window(&self) -> Option<f32> {
        self.mute
    }

    /// Correlation ramp used for every gradient.
    pub fn window(&self) -> CorrelationWindow {
        self.window
    }

    /// Consume the inversion and return the final model.
    pub fn into_model(self) -> VelocityModel {
        self.prop.model().clone()
    }

    /// Run the configured number of iterations.
    ///
    /// # Errors
    /// Stops at the first failing iteration.
    pub fn run(&mut self) -> Result<&[IterationRecord]> {
        for _ in 0..self.config.niter {
            self.run_iteration()?;
        }
        Ok(&self.history)
    }

    /// One outer iteration.
    ///
    /// # Errors
    /// Returns an error on numerical instability or I/O failure.
    pub fn run_iteration(&mut self) -> Result<&IterationRecord> {
        let iteration = self.history.len();
        let encoding = self.encoder.next_encoding(self.survey.ns());
        let shots = self.encode(&encoding)?;

        let grid = *self.prop.grid();
        let mut gradient = vec![0.0f32; grid.padded_len()];
        let mut illumination = vec![0.0f32; grid.padded_len()];
        let mut baseline = 0.0f64;
        let parts: Vec<_> = shots
            .par_iter()
            .enumerate()
            .map(|(k, shot)| self.super_shot_gradient(k, shot))
            .collect();
        for part in parts {
            let out = part?;
            baseline += out.misfit;
            for (g, v) in gradient.iter_mut().zip(&out.gradient) {
                *g += v;
            }
            for (i, v) in illumination.iter_mut().zip(&out.illumination) {
                *i += v;
            }
        }

        if let Some(eps) = self.config.precondition {
            let mut total = GradientOutput {
                misfit: baseline,
                residual: Vec::new(),
                gradient,
                illumination,
            };
            total.precondition(eps);
            gradient = total.gradient;
        }
        grid.mask_outside_interior(&mut gradient);
        let gradient_norm = gradient
            .iter()
            .map(|&g| (g as f64) * (g as f64))
            .sum::<f64>()
            .sqrt();

        let beta = self.conjugate.update(&gradient);
        let direction = self.conjugate.direction();
        let max_alpha = max_step_length(self.prop.model(), direction, self.config.max_dv);
        let mut trial = TrialMisfit {
            prop: &self.prop,
            receivers: &self.survey.receivers,
            nt: self.survey.nt(),
            shots: &shots,
            direction,
            bounds: &self.bounds,
            mute: self.mute,
        };
        let search = self
            .search
            .run(&mut trial, &mut self.state, 0, baseline, max_alpha)?;

        let steplen = search.steplen();
        if steplen > 0.0 {
            let model = self
                .prop
                .model()
                .updated(direction, steplen, &self.bounds)?;
            self.prop.set_model(model)?;
        }
        let velocity_range = self.prop.model().velocity_range();
        info!(
            iteration,
            misfit = baseline,
            gradient_norm,
            beta,
            steplen,
            vmin = velocity_range.0,
            vmax = velocity_range.1,
            "iteration finished"
        );

        if let Some(dir) = &self.config.snapshot_dir {
            std::fs::create_dir_all(dir)?;
            let path = dir.join(format!("vel_iter_{:03}.bin", iteration));
            let header = ModelHeader {
                nz: grid.nz(),
                nx: grid.nx(),
                dz: grid.dz(),
                dx: grid.dx(),
            };
            write_velocity(&path, &self.prop.model().to_velocity(), &header)?;
            debug!(path = %path.display(), "model snapshot written");
        }

        self.history.push(IterationRecord {
            iteration,
            misfit: baseline,
            gradient_norm,
            beta,
            steplen,
            search,
            velocity_range,
        });
        Ok(&self.history[iteration])
    }

    fn encode(&self, encoding: &Encoding) -> Result<Vec<SuperShot>> {
        let partition = ShotPartition::new(self.survey.ns(), self.config.super_shots)?;
        partition
            .ranges()
            .into_iter()
            .map(|r| {
                Ok(SuperShot {
                    sources: self.survey.sources.clip_range(r.start, r.end)?,
                    encoded: EncodedShot::build(
                        encoding,
                        &self.survey.wavelet,
                        &self.observed,
                        self.survey.ng(),
                        r.start,
                        r.end,
                    )?,
                })
            })
            .collect()
    }

    fn super_shot_gradient(&self, tag: usize, shot: &SuperShot) -> Result<GradientOutput> {
        let (nt, ng) = (self.survey.nt(), self.survey.ng());
        let receivers = &self.survey.receivers;
        let residual = muted_residual(&self.prop, shot, receivers, nt, self.mute)?;
        let vsrc = virtual_source(&residual, nt, ng)?;
        let mut recon = self.config.reconstruction.build(tag)?;
        GradientEngine::new(&self.prop, &shot.sources, receivers, nt)
            .with_window(self.window)
            .with_direct_arrival_mute(self.mute)
            .compute(
                &shot.encoded.source,
                &shot.encoded.observed,
                AdjointSeed::VirtualSource(&vsrc),
                recon.as_mut(),
            )
    }
}
