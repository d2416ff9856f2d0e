// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Random-sign shot encoding.
//!
//! Each outer iteration draws a fresh ±1 code per physical shot. All shots
//! of a super-shot are then fired simultaneously with their signs, and the
//! observed gathers are summed with the same signs.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{FwiError, Result};
use crate::propagator::check_len;

/// Deterministic source of encodings.
#[derive(Debug, Clone)]
pub struct ShotEncoder {
    seed: u64,
    rng: StdRng,
}

impl ShotEncoder {
    /// Create an encoder from a fixed seed.
    pub fn new(seed: u64) -> Self {
        ShotEncoder {
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// The seed this encoder was created with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Draw one independent ±1 code per shot.
    pub fn next_encoding(&mut self, ns: usize) -> Encoding {
        let codes = (0..ns)
            .map(|_| if self.rng.gen_bool(0.5) { 1.0 } else { -1.0 })
            .collect();
        Encoding { codes }
    }
}

/// One ±1 code per physical shot.
#[derive(Debug, Clone, PartialEq)]
pub struct Encoding {
    codes: Vec<f32>,
}

impl Encoding {
    /// Build an encoding from explicit codes.
    ///
    /// # Errors
    /// Returns an error if any code is not exactly ±1.
    pub fn from_codes(codes: Vec<f32>) -> Result<Self> {
        if let Some(bad) = codes.iter().find(|&&c| c != 1.0 && c != -1.0) {
            return Err(FwiError::InvalidParameter {
                name: "encoding",
                reason: format!("code {} is not +1 or -1", bad),
            });
        }
        Ok(Encoding { codes })
    }

    /// The codes.
    pub fn codes(&self) -> &[f32] {
        &self.codes
    }

    /// Number of shots covered.
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// True when no shot is covered.
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Signed `nt x ns` source matrix for shots `[begin, end)`.
    pub fn encode_source(&self, wavelet: &[f32], begin: usize, end: usize) -> Vec<f32> {
        let codes = &self.codes[begin..end];
        let mut out = Vec::with_capacity(wavelet.len() * codes.len());
        for &s in wavelet {
            out.extend(codes.iter().map(|&c| c * s));
        }
        out
    }

    /// Sign-weighted sum of the `nt x ng` gathers of shots `[begin, end)`.
    ///
    /// `dobs` holds all shots, ordered receiver, time, shot.
    ///
    /// # Errors
    /// Returns an error if `dobs` does not hold `len()` gathers.
    pub fn encode_observed(
        &self,
        dobs: &[f32],
        nt: usize,
        ng: usize,
        begin: usize,
        end: usize,
    ) -> Result<Vec<f32>> {
        check_len(dobs, nt * ng, self.codes.len())?;
        let gather = nt * ng;
        let mut out = vec![0.0; gather];
        for is in begin..end {
            let c = self.codes[is];
            let shot = &dobs[is * gather..(is + 1) * gather];
            for (o, &d) in out.iter_mut().zip(shot) {
                *o += c * d;
            }
        }
        Ok(out)
    }
}

/// Encoded super-shot: pseudo-source and pseudo-observed gather.
#[derive(Debug, Clone)]
pub struct EncodedShot {
    /// First physical shot included.
    pub begin: usize,
    /// One past the last physical shot included.
    pub end: usize,
    /// `nt x (end - begin)` signed source samples.
    pub source: Vec<f32>,
    /// `nt x ng` encoded observed gather.
    pub observed: Vec<f32>,
}

impl EncodedShot {
    /// Encode shots `[begin, end)`.
    pub fn build(
        encoding: &Encoding,
        wavelet: &[f32],
        dobs: &[f32],
        ng: usize,
        begin: usize,
        end: usize,
    ) -> Result<Self> {
        let nt = wavelet.len();
        Ok(EncodedShot {
            begin,
            end,
            source: encoding.encode_source(wavelet, begin, end),
            observed: encoding.encode_observed(dobs, nt, ng, begin, end)?,
        })
    }
}
