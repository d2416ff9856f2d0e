// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ess_fwi::gradient::CorrelationWindow;
use ess_fwi::io::{self, ModelHeader};
use ess_fwi::{
    DirectArrivalMute, Grid, Inversion, InversionConfig, ModelingProgress, Propagator, ReconstructionKind,
    ShotModeler, Survey, SurveyParams, VelocityModel,
};

#[derive(Parser)]
#[command(
    name = "ess-fwi",
    about = "Encoded simultaneous-source 2D acoustic full-waveform inversion"
)]
struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Number of Rayon worker threads
    #[arg(long, global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Model observed shot gathers from a true velocity model
    Model(ModelArgs),
    /// Invert observed shot gathers starting from an initial model
    Invert(InvertArgs),
    /// Model linearized (Born) gathers of a velocity perturbation
    Born(BornArgs),
}

/// Velocity file and the grid size used when it has no sidecar.
#[derive(Args)]
struct VelocityArgs {
    /// Velocity file (f32, depth fastest)
    #[arg(long)]
    vel: PathBuf,

    /// Depth cells (when the file has no sidecar)
    #[arg(long)]
    nz: Option<usize>,

    /// Lateral cells (when the file has no sidecar)
    #[arg(long)]
    nx: Option<usize>,

    /// Cell size in metres (when the file has no sidecar)
    #[arg(long, default_value = "10.0")]
    dx: f32,
}

impl VelocityArgs {
    fn load(&self) -> Result<(Vec<f32>, ModelHeader)> {
        let fallback = match (self.nz, self.nx) {
            (Some(nz), Some(nx)) => Some(ModelHeader {
                nz,
                nx,
                dz: self.dx,
                dx: self.dx,
            }),
            _ => None,
        };
        io::read_velocity(&self.vel, fallback)
            .with_context(|| format!("failed to read velocity {}", self.vel.display()))
    }
}

/// Acquisition and time-stepping parameters shared by `model` and `born`.
#[derive(Args)]
struct SurveyArgs {
    /// Sponge thickness in cells
    #[arg(long, default_value = "30")]
    nb: usize,

    /// Time steps
    #[arg(long)]
    nt: usize,

    /// Time step in seconds
    #[arg(long, default_value = "0.001")]
    dt: f32,

    /// Ricker peak frequency in Hz
    #[arg(long, default_value = "10.0")]
    fm: f32,

    /// Ricker amplitude
    #[arg(long, default_value = "1000.0")]
    amp: f32,

    /// Number of shots
    #[arg(long)]
    ns: usize,

    /// Depth of the first source
    #[arg(long, default_value = "1")]
    szbeg: usize,

    /// Lateral position of the first source
    #[arg(long, default_value = "0")]
    sxbeg: usize,

    /// Source depth increment
    #[arg(long, default_value = "0")]
    jsz: usize,

    /// Source lateral increment
    #[arg(long, default_value = "1")]
    jsx: usize,

    /// Receivers per shot (default: one per lateral cell)
    #[arg(long)]
    ng: Option<usize>,

    /// Depth of the first receiver
    #[arg(long, default_value = "1")]
    gzbeg: usize,

    /// Lateral position of the first receiver
    #[arg(long, default_value = "0")]
    gxbeg: usize,

    /// Receiver depth increment
    #[arg(long, default_value = "0")]
    jgz: usize,

    /// Receiver lateral increment
    #[arg(long, default_value = "1")]
    jgx: usize,
}

impl SurveyArgs {
    /// Parameters for `header`'s grid; the velocity range is recorded for
    /// later clamping.
    fn params(&self, header: &ModelHeader, range: (f32, f32)) -> SurveyParams {
        SurveyParams {
            nz: header.nz,
            nx: header.nx,
            nb: self.nb,
            dz: header.dz,
            dx: header.dx,
            nt: self.nt,
            dt: self.dt,
            fm: self.fm,
            amp: self.amp,
            ns: self.ns,
            szbeg: self.szbeg,
            sxbeg: self.sxbeg,
            jsz: self.jsz,
            jsx: self.jsx,
            ng: self.ng.unwrap_or(header.nx),
            gzbeg: self.gzbeg,
            gxbeg: self.gxbeg,
            jgz: self.jgz,
            jgx: self.jgx,
            vmin: Some(range.0),
            vmax: Some(range.1),
        }
    }
}

#[derive(Args)]
struct ModelArgs {
    #[command(flatten)]
    velocity: VelocityArgs,

    #[command(flatten)]
    survey: SurveyArgs,

    /// Output gather file (f32, receiver fastest, then time, then shot)
    #[arg(short = 'o', long)]
    output: PathBuf,

    /// Log a line after every finished shot
    #[arg(long)]
    progress: bool,
}

#[derive(Args)]
struct BornArgs {
    #[command(flatten)]
    velocity: VelocityArgs,

    /// Perturbed velocity on the same grid; the perturbation is taken
    /// against the background
    #[arg(long)]
    perturbed: PathBuf,

    #[command(flatten)]
    survey: SurveyArgs,

    /// Output gather file (f32, receiver fastest, then time, then shot)
    #[arg(short = 'o', long)]
    output: PathBuf,
}

#[derive(Args)]
struct InvertArgs {
    #[command(flatten)]
    velocity: VelocityArgs,

    /// Observed gather file written by `model`
    #[arg(long)]
    shots: PathBuf,

    /// Outer iterations
    #[arg(long, default_value = "10")]
    niter: usize,

    /// Lower velocity clamp (default: slowest velocity of the true model)
    #[arg(long)]
    vmin: Option<f32>,

    /// Upper velocity clamp (default: fastest velocity of the true model)
    #[arg(long)]
    vmax: Option<f32>,

    /// Largest velocity decrease of any cell per update, in m/s
    #[arg(long, default_value = "200.0")]
    max_dv: f32,

    /// Encoding seed
    #[arg(long, default_value = "10")]
    seed: u64,

    /// Number of contiguous super-shots
    #[arg(long, default_value = "1")]
    super_shots: usize,

    /// Direct-arrival mute window in seconds (default: 1.5 / fm)
    #[arg(long)]
    mute_window: Option<f32>,

    /// Keep direct arrivals
    #[arg(long, conflicts_with = "mute_window")]
    no_mute: bool,

    /// Correlation ramp start in seconds (default: a tenth of the record)
    #[arg(long, requires = "ramp_full")]
    ramp_start: Option<f32>,

    /// Correlation ramp end in seconds (default: a fifth of the record)
    #[arg(long, requires = "ramp_start")]
    ramp_full: Option<f32>,

    /// Rebuild the forward field from checkpoints every N steps instead of
    /// boundary traces
    #[arg(long)]
    checkpoint_interval: Option<usize>,

    /// Directory for checkpoint files (in memory when omitted)
    #[arg(long, requires = "checkpoint_interval")]
    checkpoint_dir: Option<PathBuf>,

    /// Illumination preconditioning with this relative floor
    #[arg(long)]
    precondition: Option<f32>,

    /// Peak sponge damping
    #[arg(long, default_value = "0.05")]
    max_damping: f32,

    /// Write the model after every iteration into this directory
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,

    /// Output velocity file
    #[arg(short = 'o', long)]
    output: PathBuf,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn build_model(header: &ModelHeader, nb: usize, dt: f32, velocity: &[f32]) -> Result<VelocityModel> {
    let grid = Grid::new(header.nz, header.nx, nb, header.dz, header.dx)?;
    Ok(VelocityModel::from_velocity(grid, dt, velocity)?)
}

fn run_model(args: &ModelArgs, threads: Option<usize>) -> Result<()> {
    let (velocity, header) = args.velocity.load()?;
    let model = build_model(&header, args.survey.nb, args.survey.dt, &velocity)?;
    let params = args.survey.params(&header, model.velocity_range());
    let survey = Survey::from_params(&params).context("invalid survey")?;
    let prop = Propagator::new(model);
    info!(
        ns = survey.ns(),
        ng = survey.ng(),
        nt = survey.nt(),
        courant = prop.courant_number(),
        "modeling observed data"
    );

    let mut modeler = ShotModeler::new(&prop, &survey.sources, &survey.receivers, &survey.wavelet);
    if let Some(n) = threads {
        modeler = modeler.with_threads(n);
    }
    if args.progress {
        modeler = modeler.with_progress(Box::new(|p: ModelingProgress| {
            info!(
                done = p.shots_done,
                total = p.total,
                elapsed = ?p.elapsed,
                "shot finished"
            );
        }));
    }
    let data = modeler.model_all()?;
    io::write_gathers(&args.output, &data, &params)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    info!(path = %args.output.display(), "observed data written");
    Ok(())
}

fn run_born(args: &BornArgs) -> Result<()> {
    let (velocity, header) = args.velocity.load()?;
    let (perturbed, pheader) = io::read_velocity(&args.perturbed, Some(header))
        .with_context(|| format!("failed to read velocity {}", args.perturbed.display()))?;
    if (pheader.nz, pheader.nx) != (header.nz, header.nx) {
        bail!(
            "perturbed model is {}x{} but the background is {}x{}",
            pheader.nz,
            pheader.nx,
            header.nz,
            header.nx
        );
    }
    let (nb, dt) = (args.survey.nb, args.survey.dt);
    let background = build_model(&header, nb, dt, &velocity)?;
    let moved = build_model(&header, nb, dt, &perturbed)?;
    let dw: Vec<f32> = moved
        .data()
        .iter()
        .zip(background.data())
        .map(|(p, b)| p - b)
        .collect();

    let params = args.survey.params(&header, background.velocity_range());
    let survey = Survey::from_params(&params).context("invalid survey")?;
    let prop = Propagator::new(background);
    let (nt, ng) = (survey.nt(), survey.ng());
    info!(
        ns = survey.ns(),
        ng,
        nt,
        courant = prop.courant_number(),
        "modeling Born data"
    );

    let mut data = vec![0.0; survey.ns() * nt * ng];
    for (is, gather) in data.chunks_mut(nt * ng).enumerate() {
        let shot = survey.sources.clip_range(is, is + 1)?;
        prop.born_modeling(&shot, &survey.wavelet, &survey.receivers, nt, &dw, gather)
            .with_context(|| format!("Born modeling failed for shot {}", is))?;
    }
    io::write_gathers(&args.output, &data, &params)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    info!(path = %args.output.display(), "Born data written");
    Ok(())
}

fn reconstruction(args: &InvertArgs) -> ReconstructionKind {
    match args.checkpoint_interval {
        Some(interval) => ReconstructionKind::Checkpoint {
            interval,
            dir: args.checkpoint_dir.clone(),
        },
        None => ReconstructionKind::Boundary,
    }
}

fn clamp_range(args: &InvertArgs, params: &SurveyParams) -> Result<(f32, f32)> {
    let vmin = match args.vmin.or(params.vmin) {
        Some(v) => v,
        None => bail!("--vmin is required when the shot file does not record it"),
    };
    let vmax = match args.vmax.or(params.vmax) {
        Some(v) => v,
        None => bail!("--vmax is required when the shot file does not record it"),
    };
    Ok((vmin, vmax))
}

fn run_invert(args: &InvertArgs) -> Result<()> {
    let (observed, params) = io::read_gathers(&args.shots)
        .with_context(|| format!("failed to read shots {}", args.shots.display()))?;
    let (velocity, header) = args.velocity.load()?;
    if (header.nz, header.nx) != (params.nz, params.nx) {
        bail!(
            "initial model is {}x{} but the shots were modeled on {}x{}",
            header.nz,
            header.nx,
            params.nz,
            params.nx
        );
    }
    let model = build_model(&header, params.nb, params.dt, &velocity)?;
    let prop = Propagator::new(model).with_max_damping(args.max_damping)?;
    let survey = Survey::from_params(&params)?;
    let (vmin, vmax) = clamp_range(args, &params)?;

    let mute = match (args.no_mute, args.mute_window) {
        (true, _) => DirectArrivalMute::Off,
        (false, Some(seconds)) => DirectArrivalMute::Seconds(seconds),
        (false, None) => DirectArrivalMute::default(),
    };
    let mut config = InversionConfig::new(args.niter, vmin, vmax)
        .with_seed(args.seed)
        .with_max_dv(args.max_dv)
        .with_super_shots(args.super_shots)
        .with_mute(mute)
        .with_reconstruction(reconstruction(args))
        .with_preconditioning(args.precondition)
        .with_snapshot_dir(args.snapshot_dir.clone());
    if let (Some(start), Some(full)) = (args.ramp_start, args.ramp_full) {
        config = config.with_window(CorrelationWindow::new(start, full)?);
    }

    info!(
        niter = args.niter,
        ns = survey.ns(),
        vmin,
        vmax,
        courant = prop.courant_number(),
        "starting inversion"
    );
    let mut inversion = Inversion::new(prop, survey, observed, config)?;
    inversion.run()?;
    for record in inversion.history() {
        info!(
            iteration = record.iteration,
            misfit = record.misfit,
            steplen = record.steplen,
            outcome = ?record.search.outcome,
            "summary"
        );
    }

    write_model(&args.output, inversion.model(), &header)
}

fn write_model(path: &Path, model: &VelocityModel, header: &ModelHeader) -> Result<()> {
    io::write_velocity(path, &model.to_velocity(), header)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), "model written");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(n) = cli.threads {
        if n == 0 {
            bail!("--threads must be at least 1");
        }
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build_global()
            .context("failed to configure the thread pool")?;
    }

    match &cli.command {
        Command::Model(args) => run_model(args, cli.threads),
        Command::Invert(args) => run_invert(args),
        Command::Born(args) => run_born(args),
    }
}
