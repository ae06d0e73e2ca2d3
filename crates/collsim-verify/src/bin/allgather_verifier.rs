//! Functional verifier for allgather plans.
//!
//! Every rank starts with `chunk_factor` chunks and must end with every
//! rank's chunks in its output buffer, ordered by source rank.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

#[derive(Parser)]
#[command(name = "allgather-verifier", version)]
#[command(about = "Executes an allgather plan and verifies its output chunks")]
struct Args {
    /// Plan XML file
    plan: PathBuf,

    /// Number of verification iterations
    run_iters: usize,
}

fn main() -> Result<()> {
    collsim_tracing::init();
    let args = Args::parse();

    let (group, chunk_factor) = collsim_verify::load_group(&args.plan, "allgather")?;
    let num_chunks = group.num_chunks();

    collsim_verify::run_iterations(
        &group,
        args.run_iters,
        chunk_factor,
        num_chunks,
        move |rank, i| format!("{rank}_{}", i % chunk_factor),
        move |_rank, i| format!("{}_{}", i / chunk_factor, i % chunk_factor),
    )
}
