// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Step-length selection along a search direction.
//!
//! Three points `(0, f0)`, `(α2, f2)`, `(α3, f3)` are bracketed by halving
//! and doubling trial steps, then a parabola through them picks the step.
//! The initial `α3` comes from the previous iteration's accepted step,
//! bounded by the step that changes the most-updated cell by `max_dv` m/s.

use tracing::{debug, info, warn};

use crate::core::{physical_velocity, transform_velocity, VelocityModel};
use crate::error::Result;

/// Evaluates the misfit of the model moved by a trial step.
pub trait MisfitEvaluator {
    /// Misfit at step length `steplen`.
    fn misfit(&mut self, steplen: f32) -> Result<f64>;
}

impl<F> MisfitEvaluator for F
where
    F: FnMut(f32) -> Result<f64>,
{
    fn misfit(&mut self, steplen: f32) -> Result<f64> {
        self(steplen)
    }
}

/// Tuning constants of the search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSearchConfig {
    /// Halving retries while `f(α2)` exceeds the baseline.
    pub max_halvings: usize,
    /// Doubling retries while `f(α3)` keeps improving.
    pub max_doublings: usize,
    /// Warm starts below this are considered negligible.
    pub min_alpha: f32,
    /// Replacement for a negligible warm start.
    pub reset_alpha: f32,
}

impl Default for LineSearchConfig {
    fn default() -> Self {
        LineSearchConfig {
            max_halvings: 5,
            max_doublings: 10,
            min_alpha: 1.0e-7,
            reset_alpha: 1.0e-4,
        }
    }
}

/// Warm-start step lengths, one slot per model parameter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepLengthState {
    slots: Vec<Option<f32>>,
}

impl StepLengthState {
    /// State for `nparams` model parameters, all uninitialized.
    pub fn new(nparams: usize) -> Self {
        StepLengthState {
            slots: vec![None; nparams],
        }
    }

    /// The last accepted step of parameter `ivel`.
    pub fn get(&self, ivel: usize) -> Option<f32> {
        self.slots.get(ivel).copied().flatten()
    }

    /// Remember an accepted step.
    pub fn set(&mut self, ivel: usize, alpha: f32) {
        if ivel >= self.slots.len() {
            self.slots.resize(ivel + 1, None);
        }
        self.slots[ivel] = Some(alpha);
    }
}

/// How the search ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    /// The direction is zero; the step is zero.
    ZeroDirection,
    /// The parabola vertex was accepted.
    Parabolic,
    /// The vertex was worse than the bracket; the best bracket point won.
    VertexRejected,
    /// The three points were nearly collinear (or the fit not convex);
    /// `min(2 α3, max)` was taken without evaluation.
    Collinear,
    /// Halving never beat the baseline.
    HalvingExhausted,
    /// Doubling ran out of retries while still improving.
    DoublingExhausted,
}

/// Trace of one search.
#[derive(Debug, Clone, PartialEq)]
pub struct LineSearchReport {
    /// Upper bound on the step.
    pub max_alpha: f32,
    /// Misfit at zero step.
    pub baseline: f64,
    /// Inner bracket point.
    pub alpha2: f32,
    /// Misfit at `alpha2`.
    pub obj2: f64,
    /// Outer bracket point.
    pub alpha3: f32,
    /// Misfit at `alpha3`.
    pub obj3: f64,
    /// Chosen step.
    pub alpha4: f32,
    /// Misfit at `alpha4`; NaN when not evaluated.
    pub obj4: f64,
    /// Number of misfit evaluations.
    pub evaluations: usize,
    /// Branch taken.
    pub outcome: SearchOutcome,
}

impl LineSearchReport {
    /// The accepted step length.
    pub fn steplen(&self) -> f32 {
        self.alpha4
    }
}

/// Largest step before the most-updated cell slows down by `max_dv`.
///
/// Returns `None` when the direction is zero everywhere.
pub fn max_step_length(model: &VelocityModel, direction: &[f32], max_dv: f32) -> Option<f32> {
    let (dx, dt) = (model.grid().dx(), model.dt());
    let peak = direction.iter().fold(0.0f32, |m, &d| m.max(d.abs()));
    if peak <= 0.0 || !peak.is_finite() {
        return None;
    }
    let threshold = 1e-10 * peak;
    let mut alpha = f32::INFINITY;
    for (&w, &d) in model.data().iter().zip(direction) {
        let magnitude = d.abs();
        if magnitude <= threshold {
            continue;
        }
        let slower = physical_velocity(w, dx, dt) - max_dv;
        if slower <= 0.0 {
            continue;
        }
        let a = (transform_velocity(slower, dx, dt) - w) / magnitude;
        alpha = alpha.min(a);
    }
    alpha.is_finite().then_some(alpha)
}

/// Vertex of the parabola through three points.
pub fn parabola_vertex(x1: f64, y1: f64, x2: f64, y2: f64, x3: f64, y3: f64) -> (f64, f64) {
    let (a, b, c) = parabola_coefficients(x1, y1, x2, y2, x3, y3);
    (-b / (2.0 * a), c - b * b / (4.0 * a))
}

fn parabola_coefficients(x1: f64, y1: f64, x2: f64, y2: f64, x3: f64, y3: f64) -> (f64, f64, f64) {
    let denom = (x1 - x2) * (x1 - x3) * (x2 - x3);
    let a = (x3 * (y2 - y1) + x2 * (y1 - y3) + x1 * (y3 - y2)) / denom;
    let b = (x3 * x3 * (y1 - y2) + x2 * x2 * (y3 - y1) + x1 * x1 * (y2 - y3)) / denom;
    let c = (x2 * x3 * (x2 - x3) * y1 + x3 * x1 * (x3 - x1) * y2 + x1 * x2 * (x1 - x2) * y3)
        / denom;
    (a, b, c)
}

/// Parabola vertex, or `None` when the fit is ill-conditioned: the two
/// chord slopes differ by less than 0.1% of the larger one, the parabola
/// opens downward, or the vertex is not finite.
pub fn guarded_parabola_vertex(
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
    x3: f64,
    y3: f64,
) -> Option<(f64, f64)> {
    let k1 = (y2 - y1) / (x2 - x1);
    let k2 = (y3 - y2) / (x3 - x2);
    if (k2 - k1).abs() < 0.001 * k1.abs().max(k2.abs()) {
        return None;
    }
    let (a, _, _) = parabola_coefficients(x1, y1, x2, y2, x3, y3);
    let (xv, yv) = parabola_vertex(x1, y1, x2, y2, x3, y3);
    if a.is_nan() || a <= 0.0 || !xv.is_finite() {
        return None;
    }
    Some((xv, yv))
}

/// Misfit evaluations made so far, with a cache keyed by exact step.
struct Trials<'e, E: MisfitEvaluator + ?Sized> {
    eval: &'e mut E,
    tried: Vec<(f32, f64)>,
}

impl<'e, E: MisfitEvaluator + ?Sized> Trials<'e, E> {
    fn at(&mut self, alpha: f32) -> Result<f64> {
        if let Some(&(_, obj)) = self.tried.iter().find(|(a, _)| *a == alpha) {
            return Ok(obj);
        }
        let obj = self.eval.misfit(alpha)?;
        debug!(alpha, obj, "trial step");
        self.tried.push((alpha, obj));
        Ok(obj)
    }

    fn best(&self) -> (f32, f64) {
        self.tried
            .iter()
            .copied()
            .fold((0.0, f64::INFINITY), |best, p| if p.1 < best.1 { p } else { best })
    }
}

/// Bracketing and parabolic-fit step-length search.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepLengthSearch {
    config: LineSearchConfig,
}

impl StepLengthSearch {
    /// A search with the given tuning.
    pub fn new(config: LineSearchConfig) -> Self {
        StepLengthSearch { config }
    }

    /// Choose a step along the current direction.
    ///
    /// # Parameters
    /// - `eval`: misfit of the model moved by a trial step
    /// - `state`: warm-start slots; the accepted step is written back
    /// - `ivel`: model parameter index
    /// - `baseline`: misfit at zero step
    /// - `max_alpha`: bound from [`max_step_length`]; `None` for a zero
    ///   direction
    ///
    /// # Errors
    /// Propagates evaluator errors.
    pub fn run<E: MisfitEvaluator + ?Sized>(
        &self,
        eval: &mut E,
        state: &mut StepLengthState,
        ivel: usize,
        baseline: f64,
        max_alpha: Option<f32>,
    ) -> Result<LineSearchReport> {
        let cfg = self.config;
        let max_alpha = match max_alpha.filter(|a| a.is_finite() && *a > 0.0) {
            Some(a) => a,
            None => {
                warn!("search direction is zero; keeping the model");
                return Ok(LineSearchReport {
                    max_alpha: 0.0,
                    baseline,
                    alpha2: 0.0,
                    obj2: baseline,
                    alpha3: 0.0,
                    obj3: baseline,
                    alpha4: 0.0,
                    obj4: baseline,
                    evaluations: 0,
                    outcome: SearchOutcome::ZeroDirection,
                });
            }
        };

        let mut alpha3 = state.get(ivel).unwrap_or(max_alpha).min(max_alpha);
        if alpha3 < cfg.min_alpha {
            alpha3 = cfg.reset_alpha.min(max_alpha);
        }
        let mut alpha2 = alpha3 * 0.5;

        let mut trials = Trials {
            eval,
            tried: Vec::new(),
        };
        let mut obj2 = trials.at(alpha2)?;
        let mut obj3 = trials.at(alpha3)?;

        let mut halvings = 0;
        while halvings < cfg.max_halvings && obj2 > baseline {
            alpha3 = alpha2;
            obj3 = obj2;
            alpha2 *= 0.5;
            obj2 = trials.at(alpha2)?;
            halvings += 1;
        }

        let mut outcome = None;
        if obj2 > baseline {
            warn!(halvings, "halving never beat the baseline; taking the best step seen");
            let (a2, o2) = trials.best();
            alpha2 = a2;
            obj2 = o2;
            alpha3 = (2.0 * alpha2).min(max_alpha);
            obj3 = trials.at(alpha3)?;
            outcome = Some(SearchOutcome::HalvingExhausted);
        } else {
            let target = baseline + (obj2 - baseline) / alpha2 as f64 * alpha3 as f64;
            let mut doublings = 0;
            while obj3 < target && obj3 < baseline && alpha3 < max_alpha {
                if doublings == cfg.max_doublings {
                    outcome = Some(SearchOutcome::DoublingExhausted);
                    break;
                }
                alpha2 = alpha3;
                obj2 = obj3;
                alpha3 = (2.0 * alpha3).min(max_alpha);
                obj3 = trials.at(alpha3)?;
                doublings += 1;
            }
            if outcome.is_some() {
                warn!(doublings, "doubling kept improving; taking the best step seen");
                let (a3, o3) = trials.best();
                alpha3 = a3;
                obj3 = o3;
                alpha2 = alpha3 * 0.5;
                obj2 = trials.at(alpha2)?;
            }
        }

        let (alpha4, obj4, outcome) = match outcome {
            Some(fallback) => {
                let (a, o) = if obj2 <= obj3 {
                    (alpha2, obj2)
                } else {
                    (alpha3, obj3)
                };
                (a, o, fallback)
            }
            None => match guarded_parabola_vertex(
                0.0,
                baseline,
                alpha2 as f64,
                obj2,
                alpha3 as f64,
                obj3,
            ) {
                None => {
                    warn!(alpha2, alpha3, "points do not fit a parabola");
                    ((2.0 * alpha3).min(max_alpha), f64::NAN, SearchOutcome::Collinear)
                }
                Some((xv, _)) => {
                    let vertex = (xv as f32).min(max_alpha).max(0.0);
                    let obj = trials.at(vertex)?;
                    if obj <= obj2.min(obj3) {
                        (vertex, obj, SearchOutcome::Parabolic)
                    } else if obj2 <= obj3 {
                        (alpha2, obj2, SearchOutcome::VertexRejected)
                    } else {
                        (alpha3, obj3, SearchOutcome::VertexRejected)
                    }
                }
            },
        };

        state.set(ivel, alpha4);
        let report = LineSearchReport {
            max_alpha,
            baseline,
            alpha2,
            obj2,
            alpha3,
            obj3,
            alpha4,
            obj4,
            evaluations: trials.tried.len(),
            outcome,
        };
        info!(
            alpha2,
            obj2,
            alpha3,
            obj3,
            alpha4,
            obj4,
            outcome = ?report.outcome,
            "step length selected"
        );
        Ok(report)
    }
}
