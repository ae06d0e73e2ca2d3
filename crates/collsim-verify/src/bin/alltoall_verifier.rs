//! Functional verifier for alltoall plans.
//!
//! Rank `r`'s input chunk block `d` must land as block `r` of rank `d`'s
//! output. Plans carry `coll="allreduce"`, matching upstream CCF test
//! fixtures.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

#[derive(Parser)]
#[command(name = "alltoall-verifier", version)]
#[command(about = "Executes an alltoall plan and verifies its output chunks")]
struct Args {
    /// Plan XML file
    plan: PathBuf,

    /// Number of verification iterations
    run_iters: usize,
}

fn main() -> Result<()> {
    collsim_tracing::init();
    let args = Args::parse();

    let (group, chunk_factor) = collsim_verify::load_group(&args.plan, "allreduce")?;
    let num_chunks = group.num_chunks();

    collsim_verify::run_iterations(
        &group,
        args.run_iters,
        num_chunks,
        num_chunks,
        move |rank, i| format!("{rank}_{}_{}", i / chunk_factor, i % chunk_factor),
        move |rank, i| format!("{}_{rank}_{}", i / chunk_factor, i % chunk_factor),
    )
}
