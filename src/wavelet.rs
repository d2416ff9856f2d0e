// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::f32::consts::PI;

use crate::error::{FwiError, Result};

/// Ricker wavelet sampled at `nt` steps of `dt`, peaking at `t = 1 / fm`.
///
/// # Errors
/// Returns an error if `fm` or `dt` is not positive and finite.
pub fn ricker(nt: usize, dt: f32, fm: f32, amp: f32) -> Result<Vec<f32>> {
    if !fm.is_finite() || fm <= 0.0 {
        return Err(FwiError::InvalidParameter {
            name: "fm",
            reason: format!("{} (must be positive and finite)", fm),
        });
    }
    if !dt.is_finite() || dt <= 0.0 {
        return Err(FwiError::InvalidParameter {
            name: "dt",
            reason: format!("{} (must be positive and finite)", dt),
        });
    }
    let delay = 1.0 / fm;
    Ok((0..nt)
        .map(|it| {
            let arg = PI * fm * (it as f32 * dt - delay);
            let arg2 = arg * arg;
            amp * (1.0 - 2.0 * arg2) * (-arg2).exp()
        })
        .collect())
}
