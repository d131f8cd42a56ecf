//! hp-adaptivity demo on the L-shaped domain
//!
//! Adapts an H1 space to the corner singularity u = r^(2/3) sin(2θ/3) of the
//! L-shaped domain. The "solver" is an element-wise H1 projection of u onto
//! the coarse space and onto its reference space, which is enough to watch
//! the selector concentrate small elements at the re-entrant corner and high
//! orders away from it.
//!
//! Usage:
//!   cargo run --release --bin hp-adapt-demo -- --order 2 --steps 20
//!   cargo run --release --bin hp-adapt-demo -- --config adapt.json --history history.json

use anyhow::Context;
use clap::{Parser, ValueEnum};
use math_audio_hpfem::adapt::{
    AdaptType, AdaptationDriver, AdaptivityConfig, FormRegistry, RefinementStrategy, SolutionPair,
};
use math_audio_hpfem::mesh::l_shape_quads;
use math_audio_hpfem::solution::{ExactSolution, FunctionValue, ProjectedSolution};
use math_audio_hpfem::space::{Discretization, SpaceKind};
use std::f64::consts::PI;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "hp-adapt-demo")]
#[command(about = "hp-adaptive approximation of the L-shape corner singularity")]
struct Args {
    /// Adaptivity configuration (JSON); missing fields take their defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Initial polynomial order
    #[arg(long, default_value_t = 2)]
    order: usize,

    /// Cells per unit square of the initial mesh
    #[arg(long, default_value_t = 1)]
    cells: usize,

    /// Maximum number of adaptation steps
    #[arg(long, default_value_t = 30)]
    steps: usize,

    /// Override the ranking strategy
    #[arg(long, value_enum)]
    strategy: Option<CliStrategy>,

    /// Override the ranking threshold
    #[arg(long)]
    threshold: Option<f64>,

    /// Override the refinement type
    #[arg(long, value_enum)]
    adapt_type: Option<CliAdaptType>,

    /// Write the convergence history here (JSON)
    #[arg(long)]
    history: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliStrategy {
    Cumulative,
    RelativeToMax,
    Absolute,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliAdaptType {
    Hp,
    H,
    P,
}

/// u = r^(2/3) sin(2θ/3) with θ in [0, 3π/2] on the L-shape
fn corner_singularity() -> ExactSolution {
    const ALPHA: f64 = 2.0 / 3.0;
    ExactSolution::new(|x, y| {
        let r = x.hypot(y);
        if r < 1e-14 {
            return FunctionValue::new(0.0, 0.0, 0.0);
        }
        let mut theta = y.atan2(x);
        if theta < 0.0 {
            theta += 2.0 * PI;
        }
        let scale = ALPHA * r.powf(ALPHA - 1.0);
        FunctionValue::new(
            r.powf(ALPHA) * (ALPHA * theta).sin(),
            scale * ((ALPHA - 1.0) * theta).sin(),
            scale * ((ALPHA - 1.0) * theta).cos(),
        )
    })
}

fn load_config(args: &Args) -> anyhow::Result<AdaptivityConfig> {
    let mut config = match &args.config {
        Some(path) => {
            println!("Loading configuration from: {}", path.display());
            let json = fs::read_to_string(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            AdaptivityConfig::from_json(&json)?
        }
        None => AdaptivityConfig::default(),
    };

    if let Some(strategy) = args.strategy {
        config.strategy = match strategy {
            CliStrategy::Cumulative => RefinementStrategy::Cumulative,
            CliStrategy::RelativeToMax => RefinementStrategy::RelativeToMax,
            CliStrategy::Absolute => RefinementStrategy::Absolute,
        };
    }
    if let Some(threshold) = args.threshold {
        config.threshold = threshold;
    }
    if let Some(adapt_type) = args.adapt_type {
        config.adapt_type = match adapt_type {
            CliAdaptType::Hp => AdaptType::Hp,
            CliAdaptType::H => AdaptType::H,
            CliAdaptType::P => AdaptType::P,
        };
    }
    config.validate()?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();
    let config = load_config(&args)?;
    println!("{}", config.to_json()?);

    let exact = corner_singularity();
    let mut disc = Discretization::single_mesh(l_shape_quads(args.cells), 1, SpaceKind::H1, args.order);
    let forms = FormRegistry::with_defaults(&disc);
    let order_increase = config.order_increase;
    let mut driver = AdaptationDriver::new(config)?;

    println!();
    println!(
        "{:>5} {:>9} {:>9} {:>12} {:>8} {:>10}",
        "step", "elements", "dofs", "error [%]", "refined", "time [ms]"
    );

    for step in 0..args.steps {
        let start = Instant::now();
        let elements = disc.mesh(0).num_active_elements();

        let reference = disc.reference(order_increase)?;
        let coarse = ProjectedSolution::for_component(&disc, 0, driver.cache(), &exact)?;
        let fine = ProjectedSolution::for_component(&reference, 0, driver.cache(), &exact)?;
        let report = driver.adapt_step(&mut disc, &[SolutionPair::new(&coarse, &fine)], &forms)?;

        let dofs = driver.history().last().map(|r| r.dofs).unwrap_or(0);
        println!(
            "{:>5} {:>9} {:>9} {:>12.5} {:>8} {:>10}",
            step,
            elements,
            dofs,
            report.relative_error_percent(),
            report.applied.len(),
            start.elapsed().as_millis()
        );

        if report.converged() {
            println!("\nStopped: {:?}", report.converged_reason);
            break;
        }
    }

    println!(
        "Final mesh: {} elements, {} dofs, max order {}",
        disc.mesh(0).num_active_elements(),
        disc.num_dofs(),
        disc.space(0).max_order(disc.mesh(0))
    );

    if let Some(path) = &args.history {
        fs::write(path, driver.history().to_json()?)
            .with_context(|| format!("cannot write {}", path.display()))?;
        println!("History written to: {}", path.display());
    }

    Ok(())
}
