// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use ess_fwi::core::{ClampBounds, Grid, ShotGeometry, VelocityModel};
use ess_fwi::encoder::{EncodedShot, ShotEncoder};
use ess_fwi::checkpoint::MemoryStore;
use ess_fwi::gradient::{AdjointSeed, CorrelationWindow, GradientEngine};
use ess_fwi::io;
use ess_fwi::propagator::Propagator;
use ess_fwi::reconstruct::{
    BoundaryReconstruction, CheckpointReconstruction, ForwardSource, Reconstruction,
    ReconstructionKind,
};
use ess_fwi::scheduler::ShotModeler;
use ess_fwi::wavelet::ricker;
use ess_fwi::{Inversion, InversionConfig, Survey, SurveyParams};

fn homogeneous(grid: Grid, v: f32, dt: f32) -> VelocityModel {
    VelocityModel::from_velocity(grid, dt, &vec![v; grid.interior_len()]).unwrap()
}

/// Two-layer model: `upper` above interior row `interface`, `lower` below.
fn layered(grid: Grid, interface: usize, upper: f32, lower: f32, dt: f32) -> VelocityModel {
    let velocity: Vec<f32> = (0..grid.interior_len())
        .map(|i| if i % grid.nz() < interface { upper } else { lower })
        .collect();
    VelocityModel::from_velocity(grid, dt, &velocity).unwrap()
}

/// Runs the forward loop through `recon` and returns every q_it.
fn record_forward(
    prop: &Propagator,
    source: &ForwardSource<'_>,
    nt: usize,
    recon: &mut dyn Reconstruction,
) -> Vec<Vec<f32>> {
    let mut p0 = prop.new_field();
    let mut p1 = prop.new_field();
    let mut fields = Vec::with_capacity(nt);
    for it in 0..nt {
        prop.add_source(&mut p1, source.at(it), source.geometry);
        recon.record(prop, it, &p0, &p1).unwrap();
        fields.push(p1.clone());
        prop.step_forward(&mut p0, &p1);
        std::mem::swap(&mut p0, &mut p1);
    }
    recon.begin_backward(prop, p0, p1).unwrap();
    fields
}

/// Test 1: Stencil Symmetry
/// Undamped homogeneous medium, point source on the central column.
/// The field must stay mirror-symmetric about that column.
#[test]
fn stencil_is_laterally_symmetric() {
    let grid = Grid::new(40, 41, 12, 10.0, 10.0).unwrap();
    let prop = Propagator::new(homogeneous(grid, 2000.0, 0.001))
        .with_max_damping(0.0)
        .unwrap();
    let src = ShotGeometry::new(&grid, "source", 15, 20, 0, 0, 1).unwrap();
    let wavelet = ricker(200, 0.001, 20.0, 1.0).unwrap();

    let mut p0 = prop.new_field();
    let mut p1 = prop.new_field();
    for it in 0..200 {
        prop.add_source(&mut p1, &wavelet[it..it + 1], &src);
        prop.step_forward(&mut p0, &p1);
        std::mem::swap(&mut p0, &mut p1);
    }

    let nz_pad = grid.nz_pad();
    let centre = grid.x0() + 20;
    let peak = p1.iter().fold(0.0f32, |m, &v| m.max(v.abs()));
    assert!(peak > 0.0);
    for k in 1..=centre {
        for iz in 0..nz_pad {
            let left = p1[(centre - k) * nz_pad + iz];
            let right = p1[(centre + k) * nz_pad + iz];
            assert!(
                (left - right).abs() <= 1e-4 * peak,
                "offset {} depth {}: {} vs {}",
                k,
                iz,
                left,
                right
            );
        }
    }
}

/// Test 2: Energy Decay Under Damping
/// Gaussian initial pressure, sponge on. The discrete leap-frog energy must
/// never grow and must mostly drain into the sponge.
/// Without the sponge the same energy is conserved.
#[test]
fn discrete_energy_does_not_grow() {
    let grid = Grid::new(40, 40, 20, 10.0, 10.0).unwrap();
    let model = homogeneous(grid, 2000.0, 0.001);
    let nz_pad = grid.nz_pad();

    let gaussian = || {
        let mut field = vec![0.0f32; grid.padded_len()];
        for ix in 0..grid.nx() {
            for iz in 0..grid.nz() {
                let dz = iz as f32 - 20.0;
                let dx = ix as f32 - 20.0;
                field[grid.padded_index(iz, ix)] = (-(dz * dz + dx * dx) / 9.0).exp();
            }
        }
        field
    };

    let run = |prop: &Propagator, steps: usize| -> Vec<f64> {
        let mut p0 = gaussian();
        let mut p1 = gaussian();
        let mut energies = vec![prop.discrete_energy(&p0, &p1)];
        for _ in 0..steps {
            prop.step_forward(&mut p0, &p1);
            std::mem::swap(&mut p0, &mut p1);
            energies.push(prop.discrete_energy(&p0, &p1));
        }
        assert!(p1.iter().all(|v| v.is_finite()));
        // the halo is never written
        for iz in 0..5 {
            assert_eq!(p1[nz_pad * 20 + iz], 0.0);
        }
        energies
    };

    let damped = Propagator::new(model.clone());
    let energies = run(&damped, 800);
    let e0 = energies[0];
    assert!(e0 > 0.0);
    for (k, pair) in energies.windows(2).enumerate() {
        assert!(
            pair[1] <= pair[0] + 1e-4 * e0,
            "energy grew at step {}: {} -> {}",
            k,
            pair[0],
            pair[1]
        );
    }
    let last = *energies.last().unwrap();
    assert!(last < 0.2 * e0, "final energy {} vs initial {}", last, e0);

    let undamped = Propagator::new(model).with_max_damping(0.0).unwrap();
    let energies = run(&undamped, 300);
    for e in &energies {
        assert!(
            ((e - e0) / e0).abs() < 1e-3,
            "undamped energy drifted: {} vs {}",
            e,
            e0
        );
    }
}

/// Test 3: Boundary-Trace Round Trip
/// An encoded three-source shot in a layered model. Rebuilding the forward
/// field backward from boundary traces must match the stored forward field
/// over the deep interior.
#[test]
fn boundary_traces_rebuild_the_forward_field() {
    let grid = Grid::new(32, 40, 10, 10.0, 10.0).unwrap();
    let prop = Propagator::new(layered(grid, 16, 1800.0, 2400.0, 0.001));
    let sources = ShotGeometry::new(&grid, "source", 2, 8, 0, 12, 3).unwrap();
    let nt = 200;
    let wavelet = ricker(nt, 0.001, 20.0, 1.0).unwrap();
    let encoding = ShotEncoder::new(3).next_encoding(3);
    let samples = encoding.encode_source(&wavelet, 0, 3);
    let source = ForwardSource {
        geometry: &sources,
        samples: &samples,
    };

    let mut recon = BoundaryReconstruction::new();
    let fields = record_forward(&prop, &source, nt, &mut recon);
    let peak = fields
        .iter()
        .flat_map(|f| f.iter())
        .fold(0.0f32, |m, &v| m.max(v.abs()));

    let nz_pad = grid.nz_pad();
    let mut lap = prop.new_field();
    let mut illum = prop.new_field();
    let mut worst = 0.0f32;
    for it in (0..nt).rev() {
        let q = recon
            .backward(&prop, &source, it, &mut lap, &mut illum)
            .unwrap();
        for ix in grid.deep_cols() {
            for iz in grid.deep_rows() {
                let i = ix * nz_pad + iz;
                worst = worst.max((q[i] - fields[it][i]).abs());
            }
        }
    }
    assert!(
        worst <= 1e-4 * peak,
        "largest deviation {} (peak {})",
        worst,
        peak
    );
    assert!(illum.iter().any(|&v| v > 0.0));
}

/// Test 4: Checkpoint Round Trip (on disk)
/// Replaying from checkpoint files must reproduce every forward field
/// bit for bit.
#[test]
fn disk_checkpoints_replay_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let grid = Grid::new(24, 30, 8, 10.0, 10.0).unwrap();
    let prop = Propagator::new(layered(grid, 12, 2000.0, 2500.0, 0.001));
    let sources = ShotGeometry::new(&grid, "source", 2, 15, 0, 0, 1).unwrap();
    let nt = 130;
    let wavelet = ricker(nt, 0.001, 25.0, 1.0).unwrap();
    let source = ForwardSource {
        geometry: &sources,
        samples: &wavelet,
    };

    let kind = ReconstructionKind::Checkpoint {
        interval: 40,
        dir: Some(dir.path().to_path_buf()),
    };
    let mut recon = kind.build(7).unwrap();
    let fields = record_forward(&prop, &source, nt, recon.as_mut());
    assert!(dir
        .path()
        .join("shot_7")
        .join("check_time_40_curr.bin")
        .exists());

    let mut lap = prop.new_field();
    let mut illum = prop.new_field();
    for it in (0..nt).rev() {
        let q = recon
            .backward(&prop, &source, it, &mut lap, &mut illum)
            .unwrap();
        assert_eq!(q, fields[it].as_slice(), "step {}", it);
    }
}

/// Test 5: Clamp Idempotence
/// Any update leaves every velocity inside the clamp range with the
/// boundary mirroring the interior; a zero step changes nothing.
#[test]
fn clamped_updates_stay_in_range() {
    let grid = Grid::new(20, 25, 6, 10.0, 10.0).unwrap();
    let dt = 0.001;
    let mut model = layered(grid, 10, 1600.0, 2600.0, dt);
    let bounds = ClampBounds::new(1500.0, 3000.0, grid.dx(), dt).unwrap();
    let untouched = model.clone();
    model.apply_update(&vec![1.0; grid.padded_len()], 0.0, &bounds).unwrap();
    assert_eq!(model, untouched);

    let direction: Vec<f32> = (0..grid.padded_len())
        .map(|i| ((i * 7919) % 13) as f32 - 6.0)
        .collect();
    for &steplen in &[1e3f32, -1e3, 0.3] {
        model.apply_update(&direction, steplen, &bounds).unwrap();
        let (lo, hi) = model.velocity_range();
        assert!(lo >= 1500.0 * (1.0 - 1e-5), "lo = {}", lo);
        assert!(hi <= 3000.0 * (1.0 + 1e-5), "hi = {}", hi);
        for ix in 0..grid.nx_pad() {
            for iz in 0..grid.nz_pad() {
                let w = model.data()[ix * grid.nz_pad() + iz];
                let sz = iz.clamp(grid.z0(), grid.z0() + grid.nz() - 1);
                let sx = ix.clamp(grid.x0(), grid.x0() + grid.nx() - 1);
                assert_eq!(w, model.data()[sx * grid.nz_pad() + sz]);
            }
        }
        let before = model.clone();
        model.apply_update(&direction, 0.0, &bounds).unwrap();
        assert_eq!(model, before);
    }
}

/// Test 6: Layered End-to-End Inversion
/// 1500 m/s above 50 m depth, 2000 m/s below; one co-located source and
/// receiver, 500 steps of 1 ms on a 10 m grid. Starting from 1800 m/s below
/// the interface, five iterations with the default configuration must
/// lower the misfit every time.
#[test]
fn layered_inversion_reduces_misfit() {
    let grid = Grid::new(30, 40, 10, 10.0, 10.0).unwrap();
    let dt = 0.001;
    let nt = 500;
    let truth = Propagator::new(layered(grid, 5, 1500.0, 2000.0, dt));
    let survey = Survey {
        sources: ShotGeometry::new(&grid, "source", 1, 20, 0, 0, 1).unwrap(),
        receivers: ShotGeometry::new(&grid, "receiver", 1, 20, 0, 0, 1).unwrap(),
        wavelet: ricker(nt, dt, 20.0, 1.0).unwrap(),
        fm: 20.0,
    };
    let observed = ShotModeler::new(&truth, &survey.sources, &survey.receivers, &survey.wavelet)
        .model_all()
        .unwrap();

    let start = layered(grid, 5, 1500.0, 1800.0, dt);
    let config = InversionConfig::new(5, 1400.0, 2200.0);
    let mut inversion =
        Inversion::new(Propagator::new(start.clone()), survey, observed, config).unwrap();
    assert_eq!(inversion.window(), CorrelationWindow::for_record(nt, dt));
    assert!(inversion.mute_window().is_some());
    let history = inversion.run().unwrap().to_vec();

    assert_eq!(history.len(), 5);
    assert!(history[0].misfit > 0.0);
    for pair in history.windows(2) {
        assert!(
            pair[1].misfit < pair[0].misfit,
            "iteration {}: {} !< {}",
            pair[1].iteration,
            pair[1].misfit,
            pair[0].misfit
        );
    }
    for record in &history {
        assert!(record.steplen.is_finite() && record.steplen >= 0.0);
        assert!(record.velocity_range.0 >= 1400.0 * (1.0 - 1e-5));
        assert!(record.velocity_range.1 <= 2200.0 * (1.0 + 1e-5));
    }
    assert_ne!(inversion.model(), &start);
}

/// Test 7: Encoding Reproducibility
/// Two inversions with the same seed, fed through the gather file format,
/// must produce identical misfits, step lengths and models.
#[test]
fn same_seed_same_inversion() {
    let dir = tempfile::tempdir().unwrap();
    let params = SurveyParams {
        nz: 24,
        nx: 36,
        nb: 8,
        dz: 10.0,
        dx: 10.0,
        nt: 300,
        dt: 0.001,
        fm: 20.0,
        amp: 1.0,
        ns: 3,
        szbeg: 2,
        sxbeg: 6,
        jsz: 0,
        jsx: 12,
        ng: 36,
        gzbeg: 2,
        gxbeg: 0,
        jgz: 0,
        jgx: 1,
        vmin: Some(1600.0),
        vmax: Some(2300.0),
    };
    let grid = params.grid().unwrap();
    let dt = params.dt;
    let truth = Propagator::new(layered(grid, 12, 1600.0, 2300.0, dt));
    let survey = Survey::from_params(&params).unwrap();
    let data = ShotModeler::new(&truth, &survey.sources, &survey.receivers, &survey.wavelet)
        .with_threads(2)
        .model_all()
        .unwrap();
    let path = dir.path().join("shots.bin");
    io::write_gathers(&path, &data, &params).unwrap();

    let run = |seed: u64| {
        let (observed, params) = io::read_gathers(&path).unwrap();
        let survey = Survey::from_params(&params).unwrap();
        let prop = Propagator::new(layered(grid, 12, 1600.0, 2100.0, dt));
        let config = InversionConfig::new(2, 1500.0, 2400.0)
            .with_seed(seed)
            .with_super_shots(2)
            .with_window(CorrelationWindow::new(0.05, 0.1).unwrap())
            .with_mute_window(Some(params.mute_window()));
        let mut inversion = Inversion::new(prop, survey, observed, config).unwrap();
        inversion.run().unwrap();
        let summary: Vec<(f64, f32)> = inversion
            .history()
            .iter()
            .map(|r| (r.misfit, r.steplen))
            .collect();
        (summary, inversion.into_model())
    };

    let (first, model_a) = run(42);
    let (second, model_b) = run(42);
    assert_eq!(first, second);
    assert_eq!(model_a, model_b);

    // the encoding actually depends on the seed
    let a = ShotEncoder::new(42).next_encoding(64);
    let b = ShotEncoder::new(43).next_encoding(64);
    assert_ne!(a, b);

    // an encoded single shot is its gather up to sign
    let enc = ShotEncoder::new(42).next_encoding(3);
    let shot = EncodedShot::build(&enc, &survey.wavelet, &data, params.ng, 1, 2).unwrap();
    let gather = params.gather_len();
    for (o, d) in shot.observed.iter().zip(&data[gather..2 * gather]) {
        assert_eq!(*o, enc.codes()[1] * d);
    }
}

/// Test 8: Wide-Aperture Inversion
/// A full receiver line over a deeper interface, no direct-arrival mute
/// and an explicit correlation ramp. Five iterations must lower the misfit
/// every time while respecting the clamp range.
#[test]
fn wide_aperture_inversion_reduces_misfit() {
    let grid = Grid::new(30, 40, 10, 10.0, 10.0).unwrap();
    let dt = 0.001;
    let nt = 500;
    let truth = Propagator::new(layered(grid, 15, 1500.0, 2000.0, dt));
    let survey = Survey {
        sources: ShotGeometry::new(&grid, "source", 2, 20, 0, 0, 1).unwrap(),
        receivers: ShotGeometry::new(&grid, "receiver", 2, 0, 0, 1, 40).unwrap(),
        wavelet: ricker(nt, dt, 20.0, 1.0).unwrap(),
        fm: 20.0,
    };
    let observed = ShotModeler::new(&truth, &survey.sources, &survey.receivers, &survey.wavelet)
        .model_all()
        .unwrap();

    let start = layered(grid, 15, 1500.0, 1800.0, dt);
    let config = InversionConfig::new(5, 1400.0, 2200.0)
        .with_mute_window(None)
        .with_window(CorrelationWindow::new(0.05, 0.1).unwrap());
    let mut inversion =
        Inversion::new(Propagator::new(start.clone()), survey, observed, config).unwrap();
    let history = inversion.run().unwrap().to_vec();

    assert_eq!(history.len(), 5);
    for pair in history.windows(2) {
        assert!(
            pair[1].misfit < pair[0].misfit,
            "iteration {}: {} !< {}",
            pair[1].iteration,
            pair[1].misfit,
            pair[0].misfit
        );
    }
    for record in &history {
        assert!(record.velocity_range.0 >= 1400.0 * (1.0 - 1e-5));
        assert!(record.velocity_range.1 <= 2200.0 * (1.0 + 1e-5));
    }
    assert_ne!(inversion.model(), &start);
}

/// Test 9: Point Symmetry
/// Undamped homogeneous medium with a point source at the centre of the
/// interior. Before the wave reaches any edge the field must be symmetric
/// under reflection through the source in depth and laterally, and under
/// exchange of the two axes.
#[test]
fn centred_source_field_is_point_symmetric() {
    let grid = Grid::new(61, 61, 10, 10.0, 10.0).unwrap();
    let prop = Propagator::new(homogeneous(grid, 2000.0, 0.001))
        .with_max_damping(0.0)
        .unwrap();
    let (c, reach) = (30usize, 20usize);
    let src = ShotGeometry::new(&grid, "source", c, c, 0, 0, 1).unwrap();
    let nt = 80;
    let wavelet = ricker(nt, 0.001, 25.0, 1.0).unwrap();

    let mut p0 = prop.new_field();
    let mut p1 = prop.new_field();
    for it in 0..nt {
        prop.add_source(&mut p1, &wavelet[it..it + 1], &src);
        prop.step_forward(&mut p0, &p1);
        std::mem::swap(&mut p0, &mut p1);
    }

    let at = |iz: usize, ix: usize| p1[grid.padded_index(iz, ix)];
    let peak = p1.iter().fold(0.0f32, |m, &v| m.max(v.abs()));
    assert!(peak > 0.0);
    let tol = 1e-5 * peak;
    for a in 0..=reach {
        for b in 0..=reach {
            let v = at(c + a, c + b);
            for (name, other) in [
                ("depth", at(c - a, c + b)),
                ("lateral", at(c + a, c - b)),
                ("point", at(c - a, c - b)),
                ("transpose", at(c + b, c + a)),
            ] {
                assert!(
                    (v - other).abs() <= tol,
                    "{} mirror at offset ({}, {}): {} vs {}",
                    name,
                    a,
                    b,
                    v,
                    other
                );
            }
        }
    }
}

/// Test 10: Boundary-Trace Round Trip with Shell Sources
/// Sources inside the saved boundary shell (one near the left edge, one
/// near the bottom right corner) still let the backward pass rebuild the
/// forward field over the deep interior.
#[test]
fn boundary_traces_rebuild_with_shell_sources() {
    let grid = Grid::new(32, 40, 10, 10.0, 10.0).unwrap();
    let prop = Propagator::new(layered(grid, 16, 1800.0, 2400.0, 0.001));
    let sources = ShotGeometry::new(&grid, "source", 2, 2, 27, 35, 2).unwrap();
    assert_eq!(sources.coord(0), (2, 2));
    assert_eq!(sources.coord(1), (29, 37));
    let nt = 200;
    let wavelet = ricker(nt, 0.001, 20.0, 1.0).unwrap();
    let encoding = ShotEncoder::new(5).next_encoding(2);
    let samples = encoding.encode_source(&wavelet, 0, 2);
    let source = ForwardSource {
        geometry: &sources,
        samples: &samples,
    };

    let mut recon = BoundaryReconstruction::new();
    let fields = record_forward(&prop, &source, nt, &mut recon);
    let peak = fields
        .iter()
        .flat_map(|f| f.iter())
        .fold(0.0f32, |m, &v| m.max(v.abs()));

    let nz_pad = grid.nz_pad();
    let mut lap = prop.new_field();
    let mut illum = prop.new_field();
    let mut worst = 0.0f32;
    for it in (0..nt).rev() {
        let q = recon
            .backward(&prop, &source, it, &mut lap, &mut illum)
            .unwrap();
        for ix in grid.deep_cols() {
            for iz in grid.deep_rows() {
                let i = ix * nz_pad + iz;
                worst = worst.max((q[i] - fields[it][i]).abs());
            }
        }
    }
    assert!(
        worst <= 1e-4 * peak,
        "largest deviation {} (peak {})",
        worst,
        peak
    );
}

/// Test 11: Born Adjoint Identity
/// For a perturbation `dw` of the transformed velocity and a residual `r`,
/// `<r, B dw> = -Σ dw · g / w²`, where `B` is Born modeling and `g` the
/// residual-seeded gradient with exact forward-field replay. Uses an
/// undamped homogeneous model so the time stepping is self-adjoint.
#[test]
fn born_modeling_is_adjoint_to_the_gradient() {
    let grid = Grid::new(30, 40, 10, 10.0, 10.0).unwrap();
    let prop = Propagator::new(homogeneous(grid, 2000.0, 0.001))
        .with_max_damping(0.0)
        .unwrap();
    let nt = 300;
    let src = ShotGeometry::new(&grid, "source", 2, 20, 0, 0, 1).unwrap();
    let rec = ShotGeometry::new(&grid, "receiver", 2, 0, 0, 1, 40).unwrap();
    let wavelet = ricker(nt, 0.001, 20.0, 1.0).unwrap();

    let w = prop.model().data();
    let mut dw = vec![0.0f32; grid.padded_len()];
    for ix in 15..25 {
        for iz in 12..18 {
            let i = grid.padded_index(iz, ix);
            dw[i] = 0.1 * w[i];
        }
    }

    let ng = rec.len();
    let mut born = vec![0.0; nt * ng];
    prop.born_modeling(&src, &wavelet, &rec, nt, &dw, &mut born)
        .unwrap();
    let mut syn = vec![0.0; nt * ng];
    prop.forward_modeling(&src, &wavelet, &rec, nt, &mut syn)
        .unwrap();
    // residual syn - obs equals the Born data
    let observed: Vec<f32> = syn.iter().zip(&born).map(|(s, b)| s - b).collect();

    let mut recon = CheckpointReconstruction::new(MemoryStore::new(), 25).unwrap();
    let out = GradientEngine::new(&prop, &src, &rec, nt)
        .with_window(CorrelationWindow::new(0.0, 0.0).unwrap())
        .compute(&wavelet, &observed, AdjointSeed::Residual, &mut recon)
        .unwrap();

    let lhs: f64 = born.iter().map(|&b| (b as f64) * (b as f64)).sum();
    let rhs: f64 = -dw
        .iter()
        .zip(&out.gradient)
        .zip(w)
        .map(|((&d, &g), &wi)| (d as f64) * (g as f64) / ((wi as f64) * (wi as f64)))
        .sum::<f64>();
    assert!(lhs > 0.0);
    assert!(
        ((lhs - rhs) / lhs).abs() < 1e-3,
        "<r, B dw> = {} but -<dw, g / w²> = {}",
        lhs,
        rhs
    );
}
