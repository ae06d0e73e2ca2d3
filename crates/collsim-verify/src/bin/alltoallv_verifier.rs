//! Functional verifier for alltoallv plans.
//!
//! A traffic matrix CSV declares how many chunks every rank sends to every
//! other rank; the expected output table is precomputed from its row and
//! column prefix sums. Plans carry `coll="allreduce"`, matching upstream
//! CCF test fixtures.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use collsim_verify::traffic::TrafficMatrix;

#[derive(Parser)]
#[command(name = "alltoallv-verifier", version)]
#[command(about = "Executes an alltoallv plan and verifies its output against a traffic matrix")]
struct Args {
    /// Plan XML file
    plan: PathBuf,

    /// Number of verification iterations
    run_iters: usize,

    /// Traffic matrix CSV: entry (i, j) is the number of chunks rank i
    /// sends to rank j
    traffic: PathBuf,
}

fn main() -> Result<()> {
    collsim_tracing::init();
    let args = Args::parse();

    let (group, chunk_factor) = collsim_verify::load_group(&args.plan, "allreduce")?;
    let num_ranks = group.num_ranks();
    let num_chunks = group.num_chunks();

    let csv = std::fs::read_to_string(&args.traffic)
        .with_context(|| format!("reading traffic file {}", args.traffic.display()))?;
    let matrix = TrafficMatrix::from_csv(&csv, num_ranks)?;
    matrix.validate_totals(chunk_factor)?;
    let expected = matrix.expected_outputs(chunk_factor);

    collsim_verify::run_iterations(
        &group,
        args.run_iters,
        num_chunks,
        num_chunks,
        move |rank, i| format!("{rank}_{i}"),
        move |rank, i| expected[rank * num_ranks * chunk_factor + i].clone(),
    )
}
