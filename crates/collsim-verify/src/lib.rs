//! Shared harness for the collective verifier binaries.
//!
//! Each front-end supplies the expected `coll` tag, the buffer sizes its
//! hooks address, and per-chunk init/check functions; the harness drives
//! the engine through `init -> execute -> check -> residual scan`
//! iterations and reports progress on stdout.

use std::path::Path;

use anyhow::{bail, Context, Result};
use collsim_core::{Chunk, CommGroup, Plan};

pub mod traffic;

/// Load a plan file, build its communication group, and check the plan's
/// collective tag. Returns the group together with the chunk factor
/// `num_chunks / num_ranks`.
pub fn load_group(plan_path: &Path, expected_coll: &str) -> Result<(CommGroup, usize)> {
    let xml = std::fs::read_to_string(plan_path)
        .with_context(|| format!("reading plan file {}", plan_path.display()))?;
    let plan = Plan::parse(&xml).context("loading plan document")?;
    let group = CommGroup::from_plan(&plan).context("building communication group")?;

    if group.collective() != expected_coll {
        bail!(
            "unsupported collective: plan declares `{}`, this verifier requires `{expected_coll}`",
            group.collective()
        );
    }

    let num_ranks = group.num_ranks();
    let num_chunks = group.num_chunks();
    if num_ranks == 0 || num_chunks % num_ranks != 0 {
        bail!("number of chunks ({num_chunks}) must be a multiple of number of ranks ({num_ranks})");
    }
    let chunk_factor = num_chunks / num_ranks;
    tracing::debug!(num_ranks, num_chunks, chunk_factor, "group ready");

    println!("Initialized {num_ranks} ranks, {num_chunks} chunks, chunk factor {chunk_factor}");
    println!("Channels built.");
    Ok((group, chunk_factor))
}

/// Drive `run_iters` full verification iterations, with a progress line
/// every 10 iterations and a residual-message scan after each one.
pub fn run_iterations<I, C>(
    group: &CommGroup,
    run_iters: usize,
    init_len: usize,
    check_len: usize,
    init_fn: I,
    check_fn: C,
) -> Result<()>
where
    I: Fn(usize, usize) -> Chunk,
    C: Fn(usize, usize) -> Chunk,
{
    for i in 0..run_iters {
        if i % 10 == 0 {
            println!("Running iteration {i}/{run_iters}");
        }
        group.init_data(&init_fn, init_len)?;
        group.execute()?;
        group.check_data(&check_fn, check_len)?;
        group
            .mailbox_manager()
            .no_pending_messages()
            .with_context(|| format!("after iteration {i}"))?;
    }
    println!("All tests passed.");
    Ok(())
}
