// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::fmt;

/// Errors that can occur during inversion setup, I/O, or propagation.
#[derive(Debug)]
pub enum FwiError {
    /// Grid shape is invalid (dimension too small for the stencil).
    InvalidGridShape {
        /// The axis name ("nz" or "nx").
        axis: &'static str,
        /// The size provided.
        size: usize,
        /// The smallest accepted size.
        min: usize,
    },
    /// Grid spacing is not positive and finite, or cells are not square.
    InvalidGridSpacing {
        /// Vertical spacing.
        dz: f32,
        /// Horizontal spacing.
        dx: f32,
    },
    /// A scalar parameter is out of its valid range.
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Explanation of why it's invalid.
        reason: String,
    },
    /// A source or receiver position falls outside the computing zone.
    GeometryOutOfBounds {
        /// "source" or "receiver".
        role: &'static str,
        /// Index of the offending shot within the lattice.
        index: usize,
        /// Interior depth index.
        iz: usize,
        /// Interior lateral index.
        ix: usize,
    },
    /// Clamp bounds are inverted or degenerate.
    InvalidVelocityRange {
        /// Lower velocity bound.
        vmin: f32,
        /// Upper velocity bound.
        vmax: f32,
    },
    /// Velocity value is not positive and finite.
    InvalidVelocity {
        /// The flat index of the invalid value.
        index: usize,
        /// The invalid value.
        value: f32,
    },
    /// Array shape does not match expected shape.
    ShapeMismatch {
        /// The expected shape.
        expected: Vec<usize>,
        /// The actual shape encountered.
        got: Vec<usize>,
    },
    /// A checkpoint requested during reconstruction was never saved.
    CheckpointMissing {
        /// Time step of the checkpoint.
        step: usize,
        /// Buffer role ("prev" or "curr").
        role: &'static str,
    },
    /// A checkpoint has a different length than the wavefield buffer.
    CheckpointSize {
        /// Time step of the checkpoint.
        step: usize,
        /// Expected number of samples.
        expected: usize,
        /// Number of samples found.
        got: usize,
    },
    /// The wavefield blew up (Courant condition violated or bad model).
    NumericalInstability {
        /// Time step at which a non-finite sample was recorded.
        step: usize,
    },
    /// Sidecar metadata could not be parsed or written.
    Metadata(String),
    /// I/O error occurred.
    IoError(std::io::Error),
    /// Other error with a descriptive message.
    Other(String),
}

impl fmt::Display for FwiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FwiError::InvalidGridShape { axis, size, min } => {
                write!(
                    f,
                    "invalid grid shape: {} = {} (must be >= {})",
                    axis, size, min
                )
            }
            FwiError::InvalidGridSpacing { dz, dx } => {
                write!(
                    f,
                    "invalid grid spacing: dz = {}, dx = {} (must be positive, finite and equal)",
                    dz, dx
                )
            }
            FwiError::InvalidParameter { name, reason } => {
                write!(f, "invalid parameter {}: {}", name, reason)
            }
            FwiError::GeometryOutOfBounds { role, index, iz, ix } => {
                write!(
                    f,
                    "{} {} at (iz={}, ix={}) exceeds the computing zone",
                    role, index, iz, ix
                )
            }
            FwiError::InvalidVelocityRange { vmin, vmax } => {
                write!(
                    f,
                    "invalid velocity range: vmin = {}, vmax = {} (need 0 < vmin < vmax)",
                    vmin, vmax
                )
            }
            FwiError::InvalidVelocity { index, value } => {
                write!(
                    f,
                    "invalid velocity at index {}: {} (must be positive and finite)",
                    index, value
                )
            }
            FwiError::ShapeMismatch { expected, got } => {
                write!(f, "shape mismatch: expected {:?}, got {:?}", expected, got)
            }
            FwiError::CheckpointMissing { step, role } => {
                write!(f, "checkpoint missing: step {} ({})", step, role)
            }
            FwiError::CheckpointSize {
                step,
                expected,
                got,
            } => {
                write!(
                    f,
                    "checkpoint at step {} has {} samples, expected {}",
                    step, got, expected
                )
            }
            FwiError::NumericalInstability { step } => {
                write!(
                    f,
                    "numerical instability: non-finite wavefield at step {}",
                    step
                )
            }
            FwiError::Metadata(msg) => write!(f, "metadata error: {}", msg),
            FwiError::IoError(e) => write!(f, "I/O error: {}", e),
            FwiError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for FwiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FwiError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FwiError {
    fn from(e: std::io::Error) -> Self {
        FwiError::IoError(e)
    }
}

impl From<serde_json::Error> for FwiError {
    fn from(e: serde_json::Error) -> Self {
        FwiError::Metadata(e.to_string())
    }
}

/// Convenience type alias for Results with FwiError.
pub type Result<T> = std::result::Result<T, FwiError>;
