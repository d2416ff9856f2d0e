// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Finite-difference kernels for the 2D acoustic wave equation.
//!
//! All kernels operate on padded, depth-fastest flat arrays and parallelize
//! over columns. Every output cell depends only on read-only inputs, so the
//! results do not depend on the thread count.

use std::ops::Range;

use rayon::prelude::*;

use crate::core::{Grid, FD_HALF};

/// Optimized 10th-order Laplacian weights (centre first).
///
/// The centre weight of the 2D operator is `-4 * LAPLACIAN_COEFFS[0]`.
pub const LAPLACIAN_COEFFS: [f32; FD_HALF + 1] = [
    1.534_007_96,
    1.788_587_21,
    -0.316_607_56,
    0.076_121_73,
    -0.016_260_42,
    0.002_167_36,
];

/// Default peak sponge damping.
pub const MAX_DAMPING: f32 = 0.05;

/// Undivided 2D Laplacian at flat index `i`.
///
/// Opposite neighbours are summed pairwise so that mirrored cells see
/// identical sums.
#[inline]
pub fn laplacian_at(field: &[f32], i: usize, nz_pad: usize) -> f32 {
    let mut lap = -4.0 * LAPLACIAN_COEFFS[0] * field[i];
    for (m, &a) in LAPLACIAN_COEFFS.iter().enumerate().skip(1) {
        let s = m * nz_pad;
        lap += a * ((field[i - m] + field[i + m]) + (field[i - s] + field[i + s]));
    }
    lap
}

/// Rows and columns every stencil update touches: everything but the halo.
pub fn updatable_region(grid: &Grid) -> (Range<usize>, Range<usize>) {
    (
        FD_HALF..grid.nz_pad() - FD_HALF,
        FD_HALF..grid.nx_pad() - FD_HALF,
    )
}

/// Quadratic sponge profile `max_damping * d^2`.
///
/// `d` is the normalised distance into the sponge on the left, right and
/// bottom sides (the largest applicable one in corners). The top is a free
/// surface and is never damped.
pub fn damping_profile(grid: &Grid, max_damping: f32) -> Vec<f32> {
    let nz_pad = grid.nz_pad();
    let mut damp = vec![0.0; grid.padded_len()];
    let nb = grid.nb();
    if nb == 0 || max_damping == 0.0 {
        return damp;
    }
    let (x0, z0) = (grid.x0(), grid.z0());
    let (x1, z1) = (x0 + grid.nx(), z0 + grid.nz());
    let width = nb as f32;
    for ix in 0..grid.nx_pad() {
        for iz in 0..nz_pad {
            let mut d: f32 = 0.0;
            if ix < x0 {
                d = d.max((x0 - ix) as f32 / width);
            }
            if ix >= x1 {
                d = d.max((ix - x1 + 1) as f32 / width);
            }
            if iz >= z1 {
                d = d.max((iz - z1 + 1) as f32 / width);
            }
            let d = d.min(1.0);
            damp[ix * nz_pad + iz] = max_damping * d * d;
        }
    }
    damp
}

/// Advance one leap-frog step, overwriting `prev` with the next time level.
///
/// Solves `(1 + δ) p⁺ = 2 p - (1 - δ) p⁻ + L(p) / w` on every non-halo cell.
pub fn step_forward(prev: &mut [f32], curr: &[f32], w: &[f32], damp: &[f32], nz_pad: usize) {
    let nx_pad = curr.len() / nz_pad;
    prev.par_chunks_mut(nz_pad)
        .enumerate()
        .filter(|(ix, _)| *ix >= FD_HALF && *ix < nx_pad - FD_HALF)
        .for_each(|(ix, column)| {
            let base = ix * nz_pad;
            for iz in FD_HALF..nz_pad - FD_HALF {
                let i = base + iz;
                let lap = laplacian_at(curr, i, nz_pad);
                let d = damp[i];
                column[iz] = (2.0 * curr[i] - (1.0 - d) * column[iz] + lap / w[i]) / (1.0 + d);
            }
        });
}

/// Undo one undamped step over the deep interior, overwriting `next` with
/// the earlier time level.
///
/// Also stores `L(curr)` in `lap` and adds `curr²` to `illum` for every
/// deep-interior cell.
pub fn step_backward(
    next: &mut [f32],
    curr: &[f32],
    w: &[f32],
    lap: &mut [f32],
    illum: &mut [f32],
    grid: &Grid,
) {
    let nz_pad = grid.nz_pad();
    let rows = grid.deep_rows();
    let cols = grid.deep_cols();
    next.par_chunks_mut(nz_pad)
        .zip(lap.par_chunks_mut(nz_pad))
        .zip(illum.par_chunks_mut(nz_pad))
        .enumerate()
        .filter(|(ix, _)| cols.contains(ix))
        .for_each(|(ix, ((next_col, lap_col), illum_col))| {
            let base = ix * nz_pad;
            for iz in rows.clone() {
                let i = base + iz;
                let c = curr[i];
                let l = laplacian_at(curr, i, nz_pad);
                lap_col[iz] = l;
                illum_col[iz] += c * c;
                next_col[iz] = 2.0 * c - next_col[iz] + l / w[i];
            }
        });
}

/// Laplacian of `field` over a rectangular region; other cells of `out` are
/// left untouched.
pub fn laplacian(
    field: &[f32],
    out: &mut [f32],
    nz_pad: usize,
    rows: Range<usize>,
    cols: Range<usize>,
) {
    out.par_chunks_mut(nz_pad)
        .enumerate()
        .filter(|(ix, _)| cols.contains(ix))
        .for_each(|(ix, column)| {
            let base = ix * nz_pad;
            for iz in rows.clone() {
                column[iz] = laplacian_at(field, base + iz, nz_pad);
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Grid {
        Grid::new(20, 24, 6, 10.0, 10.0).unwrap()
    }

    #[test]
    fn coefficients_annihilate_constants() {
        // L(const) = const * (-4 a0 + 4 sum a_m) must vanish
        let sum: f32 = LAPLACIAN_COEFFS[1..].iter().sum();
        assert!((sum - LAPLACIAN_COEFFS[0]).abs() < 1e-6);
    }

    #[test]
    fn laplacian_of_quadratic() {
        // f = z^2 has Laplacian 2 (undivided, unit spacing); the optimized
        // weights trade a little Taylor accuracy for less dispersion
        let g = grid();
        let nz_pad = g.nz_pad();
        let mut f = vec![0.0f32; g.padded_len()];
        for ix in 0..g.nx_pad() {
            for iz in 0..nz_pad {
                f[ix * nz_pad + iz] = (iz as f32) * (iz as f32);
            }
        }
        let i = 12 * nz_pad + 14;
        assert!((laplacian_at(&f, i, nz_pad) - 2.0).abs() < 1e-2);
    }

    #[test]
    fn damping_profile_shape() {
        let g = grid();
        let damp = damping_profile(&g, MAX_DAMPING);
        let nz_pad = g.nz_pad();
        // interior and top halo are undamped
        assert_eq!(damp[g.padded_index(0, 0)], 0.0);
        assert_eq!(damp[g.x0() * nz_pad + 1], 0.0);
        // outer edge of the left sponge hits the maximum
        let edge = (g.x0() - g.nb()) * nz_pad + g.z0() + 3;
        assert!((damp[edge] - MAX_DAMPING).abs() < 1e-7);
        // bottom sponge ramps quadratically
        let first = g.padded_index(g.nz(), 3);
        let expected = MAX_DAMPING / (g.nb() * g.nb()) as f32;
        assert!((damp[first] - expected).abs() < 1e-7);
        // zero peak disables damping everywhere
        assert!(damping_profile(&g, 0.0).iter().all(|&d| d == 0.0));
    }

    #[test]
    fn halo_is_never_written() {
        let g = grid();
        let nz_pad = g.nz_pad();
        let w = vec![25.0; g.padded_len()];
        let damp = damping_profile(&g, MAX_DAMPING);
        let mut prev = vec![0.0; g.padded_len()];
        let mut curr = vec![0.0; g.padded_len()];
        curr[g.padded_index(0, 0)] = 1.0;
        for _ in 0..20 {
            step_forward(&mut prev, &curr, &w, &damp, nz_pad);
            std::mem::swap(&mut prev, &mut curr);
        }
        for ix in 0..g.nx_pad() {
            for iz in 0..nz_pad {
                let halo = ix < FD_HALF
                    || ix >= g.nx_pad() - FD_HALF
                    || iz < FD_HALF
                    || iz >= nz_pad - FD_HALF;
                if halo {
                    assert_eq!(curr[ix * nz_pad + iz], 0.0);
                }
            }
        }
    }

    #[test]
    fn backward_step_inverts_forward_step() {
        let g = grid();
        let nz_pad = g.nz_pad();
        let w = vec![25.0; g.padded_len()];
        let damp = vec![0.0; g.padded_len()];
        let mut p0 = vec![0.0f32; g.padded_len()];
        let mut p1 = vec![0.0f32; g.padded_len()];
        let centre = g.padded_index(10, 12);
        p1[centre] = 1.0;
        p0[centre] = 0.5;
        let original = p0.clone();

        step_forward(&mut p0, &p1, &w, &damp, nz_pad);
        let mut lap = vec![0.0; g.padded_len()];
        let mut illum = vec![0.0; g.padded_len()];
        step_backward(&mut p0, &p1, &w, &mut lap, &mut illum, &g);

        for ix in g.deep_cols() {
            for iz in g.deep_rows() {
                let i = ix * nz_pad + iz;
                assert!((p0[i] - original[i]).abs() < 1e-6);
            }
        }
        assert_eq!(illum[centre], 1.0);
        assert!((lap[centre] + 4.0 * LAPLACIAN_COEFFS[0]).abs() < 1e-6);
    }
}
