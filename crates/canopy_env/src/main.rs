mod step_loop;

use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use canopy_core::{verbose_requested, EnvironmentConfig};
use canopy_tracer::Simulation;

use step_loop::{run_loop, StopHandle};

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <environment-file>", args[0]);
        std::process::exit(1);
    }

    let path = Path::new(&args[1]);
    let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;

    let level = if verbose_requested(&content) {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new().filter_level(level).parse_default_env().init();

    let config = EnvironmentConfig::parse(&content, path.parent())
        .with_context(|| format!("parsing {}", path.display()))?;
    if let Some(version) = &config.version {
        log::info!("environment file version {}", version);
    }
    log::info!(
        "grid {:?} cells over {:?} at {:?}, {} bands, {} rays per unit area",
        config.grid_size,
        config.domain_size,
        config.position,
        config.bands(),
        config.ray_density
    );

    let mut simulation = Simulation::new(config).context("initialising the light environment")?;

    let stdin = io::stdin();
    let stdout = io::stdout();
    let steps = run_loop(&mut simulation, stdin.lock(), stdout.lock(), &StopHandle::new())?;
    log::info!("answered {} steps", steps);
    Ok(())
}
