//! Mesh the pipe at one resolution
//!
//! Writes `<prefix>/pipe-<NCELLS>.msh` in MSH 2.2 ASCII format.

use anyhow::{Context, Result};
use clap::Parser;
use pipe2mesh::quickstart;
use std::path::PathBuf;

/// Parametric pipe mesh generator
#[derive(Parser)]
#[command(name = "create_mesh")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Create a structured pipe mesh for a given circumferential resolution", long_about = None)]
struct Cli {
    /// Number of cells on the circular edge of the pipe
    #[arg(value_name = "NCELLS")]
    ncells: u32,

    /// Directory the mesh file is written to
    #[arg(long, value_name = "PATH", default_value = ".")]
    prefix: PathBuf,

    /// Show debug output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let outcome = quickstart::create_mesh(cli.ncells, &cli.prefix).with_context(|| {
        format!(
            "failed to create mesh with {} cells in {}",
            cli.ncells,
            cli.prefix.display()
        )
    })?;

    log::info!(
        "{}: {} inlet, {} outlet, {} wall faces, {} volume elements",
        outcome.path.display(),
        outcome.statistics.inlet_faces,
        outcome.statistics.outlet_faces,
        outcome.statistics.wall_faces,
        outcome.volume_elements()
    );
    Ok(())
}
