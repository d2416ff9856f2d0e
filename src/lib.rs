// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Encoded simultaneous-source full-waveform inversion in two dimensions.
//!
//! The library models acoustic waves with a damped 10th-order finite
//! difference stencil, fires many shots at once behind random ±1 codes and
//! updates the velocity model with an adjoint-state gradient, conjugate
//! directions and a bracketing/parabolic step-length search.

#![warn(missing_docs)]

/// Checkpoint stores for wavefield snapshots.
pub mod checkpoint;
/// Survey parameters and their validation.
pub mod config;
/// Padded grid, velocity model and shot geometry.
pub mod core;
/// Random-sign shot encoding.
pub mod encoder;
/// Error types for the library.
pub mod error;
/// Adjoint-state gradient engine.
pub mod gradient;
/// The outer inversion loop.
pub mod inversion;
/// Flat binary arrays with JSON sidecars.
pub mod io;
/// Step-length search.
pub mod linesearch;
/// Wave propagation on a velocity model.
pub mod propagator;
/// Rebuilding the forward field during the backward pass.
pub mod reconstruct;
/// Shot partitioning and parallel shot modeling.
pub mod scheduler;
/// Finite-difference stencil kernels.
pub mod update_kernels;
/// Source wavelets.
pub mod wavelet;

pub use crate::config::SurveyParams;
pub use crate::core::{ClampBounds, Grid, ShotGeometry, VelocityModel};
pub use crate::error::{FwiError, Result};
pub use crate::inversion::{DirectArrivalMute, Inversion, InversionConfig, IterationRecord, Survey};
pub use crate::propagator::Propagator;
pub use crate::reconstruct::ReconstructionKind;
pub use crate::scheduler::{ModelingProgress, ShotModeler};
