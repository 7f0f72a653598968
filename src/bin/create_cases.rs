//! Provision one simulation case per resolution of the built-in sweep
//!
//! Cases are written to `<root>/cases/airflow-pipe-<n>` from the templates in
//! `<root>/misc`, and the batch report to `<root>/cases/summary.json`.

use anyhow::{bail, Context, Result};
use clap::Parser;
use pipe2mesh::defaults::{
    DEFAULT_NODES, DEFAULT_NTASKS, DEFAULT_PARTITION, DEFAULT_TIME_LIMIT, RESOLUTION_SWEEP,
};
use pipe2mesh::prelude::{BatchScheduler, BuiltinKernel, CaseLayout, CaseProvisioner, JobResources};
use std::path::PathBuf;

/// Airflow pipe case generator
#[derive(Parser)]
#[command(name = "create_cases")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Create meshed simulation cases for the resolution sweep", long_about = None)]
struct Cli {
    /// Name of the Slurm partition to submit to
    #[arg(short, long, value_name = "PARTITION", default_value = DEFAULT_PARTITION)]
    partition: String,

    /// Number of nodes to use in the partition
    #[arg(short = 'N', long, value_name = "NODES", default_value_t = DEFAULT_NODES)]
    nodes: u32,

    /// Total number of tasks
    #[arg(short, long, value_name = "NTASKS", default_value_t = DEFAULT_NTASKS)]
    ntasks: u32,

    /// Job time limit, format {days}-{hours}:{minutes}:{seconds}
    #[arg(short, long, value_name = "TIME", default_value = DEFAULT_TIME_LIMIT)]
    time: String,

    /// Project root holding misc/ and cases/
    #[arg(long, value_name = "PATH", default_value = ".")]
    root: PathBuf,

    /// Worker pool size [default: half the hardware threads]
    #[arg(long, value_name = "N")]
    workers: Option<usize>,

    /// Show debug output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let resources = JobResources::default()
        .with_partition(cli.partition)
        .with_nodes(cli.nodes)
        .with_ntasks(cli.ntasks)
        .with_time(cli.time);
    let provisioner = CaseProvisioner::new(BuiltinKernel::new(), CaseLayout::new(&cli.root), resources);
    let scheduler = cli
        .workers
        .map_or_else(BatchScheduler::from_available_parallelism, BatchScheduler::with_workers);

    let report = scheduler
        .run(&RESOLUTION_SWEEP, &provisioner)
        .context("resolution sweep was not scheduled")?;
    report.log_summary();

    let summary = provisioner.layout().summary_path();
    report
        .write_json(&summary)
        .with_context(|| format!("failed to write {}", summary.display()))?;

    let failed: Vec<u32> = report.failures().map(|c| c.ncells).collect();
    if !failed.is_empty() {
        bail!("{} case(s) failed: {failed:?}", failed.len());
    }
    Ok(())
}
